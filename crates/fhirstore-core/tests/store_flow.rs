use std::collections::BTreeSet;
use std::sync::Arc;

use fhirstore_client::{Identifier, ResourceType};
use fhirstore_core::{FhirServerCacheStore, RawStoreConfiguration, ResourceKey, StoreState};
use fhirstore_spi::{
    ClearSummary, InitializationContext, MarshallableEntry, NonBlockingStore, StoreError,
    TokioBlockingExecutor, WriteOutcome,
};
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn attributes(server: &MockServer) -> RawStoreConfiguration {
    let address = server.address();
    RawStoreConfiguration {
        host: Some(address.ip().to_string()),
        port: i64::from(address.port()),
        context_path: "/fhir".to_string(),
        requires_encryption: false,
        persisted_resource_set: "Patient,Task".parse().unwrap(),
        ..Default::default()
    }
}

async fn running_store(attrs: RawStoreConfiguration) -> FhirServerCacheStore {
    let store = FhirServerCacheStore::new();
    let executor = Arc::new(TokioBlockingExecutor::current(8).unwrap());
    store
        .start(InitializationContext::new(Some(attrs), executor))
        .await
        .unwrap();
    assert_eq!(store.state(), StoreState::Running);
    store
}

fn searchset(resources: Vec<Value>) -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "entry": resources.into_iter().map(|r| json!({"resource": r})).collect::<Vec<_>>()
    })
}

fn patient_key() -> ResourceKey {
    ResourceKey::new(ResourceType::Patient, Identifier::new("123").with_system("sys"))
}

fn patient() -> Value {
    json!({
        "resourceType": "Patient",
        "identifier": [{"system": "sys", "value": "123"}],
        "name": [{"family": "Chalmers", "given": ["Peter"]}]
    })
}

#[tokio::test]
async fn test_write_then_load_returns_same_content() {
    let server = MockServer::start().await;

    // Nothing exists before the create
    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param("identifier", "sys|123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(searchset(vec![])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let mut stored = patient();
    stored["id"] = json!("p1");
    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param("identifier", "sys|123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(searchset(vec![stored.clone()])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/fhir/Patient"))
        .respond_with(ResponseTemplate::new(201).set_body_json(stored.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let store = running_store(attributes(&server)).await;

    let outcome = store
        .write(1, MarshallableEntry::new(patient_key(), patient()))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WriteOutcome::Created {
            id: Some("p1".to_string())
        }
    );

    let entry = store.load(1, &patient_key()).await.unwrap().unwrap();
    assert_eq!(entry.key(), &patient_key());
    assert_eq!(entry.value()["name"], patient()["name"]);
    assert_eq!(entry.value()["resourceType"], "Patient");
    assert!(entry.metadata().is_none());
}

#[tokio::test]
async fn test_write_updates_existing_resource() {
    let server = MockServer::start().await;

    let mut existing = patient();
    existing["id"] = json!("p1");
    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .respond_with(ResponseTemplate::new(200).set_body_json(searchset(vec![existing])))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/fhir/Patient/p1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let store = running_store(attributes(&server)).await;
    let outcome = store
        .write(0, MarshallableEntry::new(patient_key(), patient()))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WriteOutcome::Updated {
            id: Some("p1".to_string())
        }
    );
}

#[tokio::test]
async fn test_write_failure_is_an_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(searchset(vec![])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unprocessable"))
        .mount(&server)
        .await;

    let store = running_store(attributes(&server)).await;
    let outcome = store
        .write(0, MarshallableEntry::new(patient_key(), patient()))
        .await
        .unwrap();
    assert!(!outcome.is_success());
}

#[tokio::test]
async fn test_load_miss_and_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param("identifier", "missing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(searchset(vec![])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param("identifier", "sys|123"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("expires", "Thu, 01 Jan 2099 00:00:00 GMT")
                .set_body_json(searchset(vec![json!({"resourceType": "Patient", "id": "p1"})])),
        )
        .mount(&server)
        .await;

    let store = running_store(attributes(&server)).await;

    let miss = ResourceKey::new(ResourceType::Patient, Identifier::new("missing"));
    assert!(store.load(0, &miss).await.unwrap().is_none());

    let entry = store.load(0, &patient_key()).await.unwrap().unwrap();
    let expires = entry.expiry_time().unwrap();
    assert_eq!(expires.to_rfc3339(), "2099-01-01T00:00:00+00:00");
}

#[tokio::test]
async fn test_delete_reports_prior_existence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param("identifier", "sys|123"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(searchset(vec![json!({"resourceType": "Patient", "id": "p1"})])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fhir/Task"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(searchset(vec![json!({"resourceType": "Task", "id": "t1"})])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param("identifier", "gone"))
        .respond_with(ResponseTemplate::new(200).set_body_json(searchset(vec![])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/fhir/Patient/p1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/fhir/Task/t1"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    let store = running_store(attributes(&server)).await;

    assert!(store.delete(0, &patient_key()).await.unwrap());

    let gone = ResourceKey::new(ResourceType::Patient, Identifier::new("gone"));
    assert!(!store.delete(0, &gone).await.unwrap());

    let task = ResourceKey::new(ResourceType::Task, Identifier::new("t"));
    assert!(!store.delete(0, &task).await.unwrap());
}

#[tokio::test]
async fn test_clear_is_best_effort() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient"))
        .and(query_param("_count", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(searchset(vec![
            json!({"resourceType": "Patient", "id": "p1"}),
            json!({"resourceType": "Patient", "id": "p2"}),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fhir/Task"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/fhir/Patient/p1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/fhir/Patient/p2"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let store = running_store(attributes(&server)).await;
    let summary = store.clear().await.unwrap();
    assert_eq!(
        summary,
        ClearSummary {
            removed: 1,
            failed: 2
        }
    );
}

#[tokio::test]
async fn test_live_availability_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/metadata"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"resourceType": "CapabilityStatement"})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let mut attrs = attributes(&server);
    attrs.live_availability_check = true;
    let store = running_store(attrs).await;
    assert!(store.is_available().await.unwrap());

    let down = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&down)
        .await;
    let mut attrs = attributes(&down);
    attrs.live_availability_check = true;
    let store = running_store(attrs).await;
    assert!(!store.is_available().await.unwrap());
}

#[tokio::test]
async fn test_stopped_store_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = running_store(attributes(&server)).await;
    store.add_segments(&BTreeSet::from([1, 2])).await.unwrap();
    store.stop().await.unwrap();

    assert_eq!(store.load(1, &patient_key()).await.unwrap_err(), StoreError::NotRunning);
    assert_eq!(store.delete(1, &patient_key()).await.unwrap_err(), StoreError::NotRunning);
    assert!(store.segments().is_empty());
}
