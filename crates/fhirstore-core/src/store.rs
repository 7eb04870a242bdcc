//! FHIR server backed cache store
//!
//! Implements [`NonBlockingStore`] over one [`ResourceClient`] per persisted
//! resource type. Every operation validates and routes on the calling
//! thread, then hands the HTTP work to the executor lent by the cache
//! engine and returns at once.
//!
//! [`ResourceClient`]: fhirstore_client::ResourceClient

use std::collections::BTreeSet;
use std::sync::Arc;

use fhirstore_client::{DeleteOutcome, IdentifierShape, MethodOutcome, ResourceClient, ResourceType};
use fhirstore_spi::{
    BlockingExecutor, Characteristic, ClearSummary, InitializationContext, MarshallableEntry,
    Metadata, NonBlockingStore, StoreError, StoreFuture, WriteOutcome, supply_blocking,
};
use futures::future;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{RawStoreConfiguration, StoreConfiguration};
use crate::error::CoreError;
use crate::key::ResourceKey;
use crate::router::ResourceTypeRouter;
use crate::segments::{SegmentDescriptor, SegmentMap};

/// Page size used when listing resources to clear
pub const CLEAR_PAGE_SIZE: u32 = 100;

/// Lifecycle of a store. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Point-in-time view of a store for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub state: StoreState,
    pub clients: Vec<ClientStatus>,
    pub segments: Vec<SegmentDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub resource_type: String,
    pub base_url: Option<String>,
}

struct Runtime {
    configuration: Arc<StoreConfiguration>,
    executor: Arc<dyn BlockingExecutor>,
}

/// Cache store persisting FHIR resources to a FHIR server
pub struct FhirServerCacheStore {
    state: RwLock<StoreState>,
    runtime: RwLock<Option<Runtime>>,
    router: ResourceTypeRouter,
    segments: SegmentMap,
}

impl Default for FhirServerCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FhirServerCacheStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::Created),
            runtime: RwLock::new(None),
            router: ResourceTypeRouter::new(),
            segments: SegmentMap::new(),
        }
    }

    pub fn state(&self) -> StoreState {
        *self.state.read()
    }

    pub fn configuration(&self) -> Option<Arc<StoreConfiguration>> {
        self.runtime.read().as_ref().map(|r| r.configuration.clone())
    }

    pub fn segments(&self) -> &SegmentMap {
        &self.segments
    }

    pub fn status(&self) -> StoreStatus {
        StoreStatus {
            state: self.state(),
            clients: self
                .router
                .clients()
                .iter()
                .map(|c| ClientStatus {
                    resource_type: c.resource_type().to_string(),
                    base_url: c.base_url().map(str::to_string),
                })
                .collect(),
            segments: self.segments.descriptors(),
        }
    }

    /// Configuration and executor, or `NotRunning` outside the running state
    fn running(&self) -> Result<(Arc<StoreConfiguration>, Arc<dyn BlockingExecutor>), StoreError> {
        if *self.state.read() != StoreState::Running {
            return Err(StoreError::NotRunning);
        }
        self.runtime
            .read()
            .as_ref()
            .map(|r| (r.configuration.clone(), r.executor.clone()))
            .ok_or(StoreError::NotRunning)
    }

    /// Check the key and pick its client
    ///
    /// The identifier must map to one of the search shapes, otherwise no
    /// lookup could find an existing resource for it.
    fn prepare(
        &self,
        key: &ResourceKey,
    ) -> Result<(Arc<ResourceClient>, Arc<dyn BlockingExecutor>), StoreError> {
        let (_, executor) = self.running()?;
        if let Err(e) = IdentifierShape::of(&key.identifier) {
            return Err(StoreError::InvalidKey(format!("{}: {}", key, e)));
        }
        let client = self.router.route(key.resource_type)?;
        Ok((client, executor))
    }

    fn start_with(
        &self,
        configuration: Option<RawStoreConfiguration>,
        executor: Arc<dyn BlockingExecutor>,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.state.write();
            match *state {
                StoreState::Created => *state = StoreState::Starting,
                StoreState::Starting | StoreState::Running => {
                    return Err(StoreError::AlreadyStarted);
                }
                StoreState::Stopping | StoreState::Stopped => return Err(StoreError::NotRunning),
            }
        }

        info!("Starting FHIR server cache store");

        let configuration = match configuration {
            Some(raw) => StoreConfiguration::from_attributes(raw)
                .map_err(|e| StoreError::from(CoreError::from(e))),
            None => Err(StoreError::Configuration(
                "no store configuration supplied".to_string(),
            )),
        };

        let configuration = match configuration {
            Ok(c) => Arc::new(c),
            Err(e) => {
                error!("Store start failed: {}", e);
                *self.state.write() = StoreState::Created;
                return Err(e);
            }
        };

        let ready = self.router.build(&configuration);
        if ready < configuration.persisted_resource_set().len() {
            warn!(
                "Only {} of {} resource clients are usable",
                ready,
                configuration.persisted_resource_set().len()
            );
        }

        info!(
            "Store configured for {}:{}{} (encrypted={}, api key property={}, api key set={}), \
             persisting {}",
            configuration.host(),
            configuration.port(),
            configuration.context_path(),
            configuration.requires_encryption(),
            configuration.api_key_property(),
            configuration.has_api_key(),
            configuration.persisted_resource_set()
        );

        self.finish_start(configuration, executor)
    }

    /// Move `Starting` to `Running`. A stop that ran while the clients were
    /// being built wins and the new clients are dropped.
    fn finish_start(
        &self,
        configuration: Arc<StoreConfiguration>,
        executor: Arc<dyn BlockingExecutor>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if *state != StoreState::Starting {
            drop(state);
            warn!("Store stopped during start, discarding clients");
            self.router.teardown();
            return Err(StoreError::NotRunning);
        }
        *self.runtime.write() = Some(Runtime {
            configuration,
            executor,
        });
        *state = StoreState::Running;
        drop(state);
        info!("FHIR server cache store running");
        Ok(())
    }

    fn stop_now(&self) {
        {
            let mut state = self.state.write();
            match *state {
                StoreState::Stopped => return,
                StoreState::Created => {
                    *state = StoreState::Stopped;
                    return;
                }
                _ => *state = StoreState::Stopping,
            }
        }

        info!("Stopping FHIR server cache store");
        self.router.teardown();
        self.segments.clear();
        *self.runtime.write() = None;
        *self.state.write() = StoreState::Stopped;
        info!("FHIR server cache store stopped");
    }
}

fn rejected<T: Send + 'static>(err: StoreError) -> StoreFuture<T> {
    Box::pin(future::ready(Err(err)))
}

fn accepted<T: Send + 'static>(value: T) -> StoreFuture<T> {
    Box::pin(future::ready(Ok(value)))
}

fn record_load(outcome: &'static str) {
    metrics::counter!("fhirstore_loads_total", "outcome" => outcome).increment(1);
}

fn record_write(outcome: &WriteOutcome) {
    metrics::counter!("fhirstore_writes_total", "outcome" => outcome.as_str()).increment(1);
}

fn record_delete(outcome: &'static str) {
    metrics::counter!("fhirstore_deletes_total", "outcome" => outcome).increment(1);
}

/// Copy of `resource` carrying the server's logical id
fn with_id(resource: &Value, id: &str) -> Value {
    let mut resource = resource.clone();
    if let Some(object) = resource.as_object_mut() {
        object.insert("id".to_string(), Value::String(id.to_string()));
    }
    resource
}

fn to_write_outcome(outcome: MethodOutcome, updated: bool) -> WriteOutcome {
    if !outcome.succeeded {
        return WriteOutcome::Failed {
            reason: outcome
                .error
                .unwrap_or_else(|| "backend rejected the write".to_string()),
        };
    }
    if updated {
        WriteOutcome::Updated { id: outcome.id }
    } else {
        WriteOutcome::Created { id: outcome.id }
    }
}

async fn write_resource(
    client: &ResourceClient,
    key: &ResourceKey,
    resource: &Value,
) -> WriteOutcome {
    match client.resolve(&key.identifier).await {
        Ok(Some(existing)) => match existing.id() {
            Some(id) => {
                debug!("{} exists as {}, updating", key, id);
                to_write_outcome(client.update(&with_id(resource, id)).await, true)
            }
            None => WriteOutcome::Failed {
                reason: format!("existing resource for {} has no id", key),
            },
        },
        Ok(None) => {
            debug!("{} not found, creating", key);
            to_write_outcome(client.create(resource).await, false)
        }
        Err(e) => WriteOutcome::Failed {
            reason: e.to_string(),
        },
    }
}

async fn delete_resource(client: &ResourceClient, key: &ResourceKey) -> &'static str {
    let existing = match client.resolve(&key.identifier).await {
        Ok(Some(found)) => found,
        Ok(None) => return "absent",
        Err(e) => {
            error!("Failed to look up {} for delete: {}", key, e);
            return "failed";
        }
    };

    let Some(id) = existing.id() else {
        warn!("Resource for {} has no id, cannot delete", key);
        return "failed";
    };

    match client.delete(id).await {
        DeleteOutcome::Deleted => "deleted",
        DeleteOutcome::NotFound => "absent",
        DeleteOutcome::NotSupported => {
            warn!("Backend does not support deleting {}", key.resource_type);
            "failed"
        }
        DeleteOutcome::Failed(reason) => {
            error!("Failed to delete {}: {}", key, reason);
            "failed"
        }
    }
}

async fn clear_type(client: &ResourceClient) -> ClearSummary {
    let mut summary = ClearSummary::default();

    let ids = match client.list_ids(CLEAR_PAGE_SIZE).await {
        Ok(ids) => ids,
        Err(e) => {
            error!("Failed to list {} resources: {}", client.resource_type(), e);
            summary.failed += 1;
            return summary;
        }
    };

    for id in ids {
        match client.delete(&id).await {
            DeleteOutcome::Deleted | DeleteOutcome::NotFound => summary.removed += 1,
            DeleteOutcome::NotSupported | DeleteOutcome::Failed(_) => summary.failed += 1,
        }
    }

    info!(
        "Cleared {}: {} removed, {} failed",
        client.resource_type(),
        summary.removed,
        summary.failed
    );
    summary
}

impl NonBlockingStore<ResourceKey, Value> for FhirServerCacheStore {
    type Configuration = RawStoreConfiguration;

    fn start(&self, mut ctx: InitializationContext<Self::Configuration>) -> StoreFuture<()> {
        let configuration = ctx.take_configuration();
        match self.start_with(configuration, ctx.executor()) {
            Ok(()) => accepted(()),
            Err(e) => rejected(e),
        }
    }

    fn stop(&self) -> StoreFuture<()> {
        self.stop_now();
        accepted(())
    }

    fn load(
        &self,
        segment: u32,
        key: &ResourceKey,
    ) -> StoreFuture<Option<MarshallableEntry<ResourceKey, Value>>> {
        let (client, executor) = match self.prepare(key) {
            Ok(p) => p,
            Err(e) => return rejected(e),
        };
        debug!("Loading {} (segment {})", key, segment);

        let key = key.clone();
        supply_blocking(executor.as_ref(), "load", async move {
            match client.resolve(&key.identifier).await {
                Ok(Some(found)) => {
                    record_load("hit");
                    let metadata = found.expires_at.map(Metadata::expiring_at);
                    Ok(Some(MarshallableEntry::new(key, found.resource).with_metadata(metadata)))
                }
                Ok(None) => {
                    record_load("miss");
                    Ok(None)
                }
                Err(e) => {
                    record_load("error");
                    error!("Failed to load {}: {}", key, e);
                    Err(StoreError::from(CoreError::from(e)))
                }
            }
        })
    }

    fn write(
        &self,
        segment: u32,
        entry: MarshallableEntry<ResourceKey, Value>,
    ) -> StoreFuture<WriteOutcome> {
        let (client, executor) = match self.prepare(entry.key()) {
            Ok(p) => p,
            Err(e) => return rejected(e),
        };

        let (key, resource, _) = entry.into_parts();
        if let Some(actual) = ResourceType::of_resource(&resource) {
            if actual != key.resource_type {
                return rejected(StoreError::InvalidKey(format!(
                    "{} carries a {} resource",
                    key, actual
                )));
            }
        }
        debug!("Writing {} (segment {})", key, segment);

        supply_blocking(executor.as_ref(), "write", async move {
            let outcome = write_resource(&client, &key, &resource).await;
            record_write(&outcome);
            match &outcome {
                WriteOutcome::Failed { reason } => error!("Failed to write {}: {}", key, reason),
                WriteOutcome::Created { id } | WriteOutcome::Updated { id } => {
                    info!("Wrote {} ({}, id={:?})", key, outcome.as_str(), id)
                }
            }
            Ok::<_, StoreError>(outcome)
        })
    }

    fn delete(&self, segment: u32, key: &ResourceKey) -> StoreFuture<bool> {
        let (client, executor) = match self.prepare(key) {
            Ok(p) => p,
            Err(e) => return rejected(e),
        };
        debug!("Deleting {} (segment {})", key, segment);

        let key = key.clone();
        supply_blocking(executor.as_ref(), "delete", async move {
            let outcome = delete_resource(&client, &key).await;
            record_delete(outcome);
            Ok::<_, StoreError>(outcome == "deleted")
        })
    }

    fn clear(&self) -> StoreFuture<ClearSummary> {
        let executor = match self.running() {
            Ok((_, executor)) => executor,
            Err(e) => return rejected(e),
        };
        let clients = self.router.clients();
        info!("Clearing {} resource types", clients.len());

        supply_blocking(executor.as_ref(), "clear", async move {
            let mut summary = ClearSummary::default();
            for client in clients {
                summary.merge(clear_type(&client).await);
            }
            Ok::<_, StoreError>(summary)
        })
    }

    fn characteristics(&self) -> BTreeSet<Characteristic> {
        BTreeSet::from([
            Characteristic::BulkRead,
            Characteristic::Segmentable,
            Characteristic::ExpirationAware,
        ])
    }

    fn add_segments(&self, segments: &BTreeSet<u32>) -> StoreFuture<()> {
        let configuration = match self.running() {
            Ok((configuration, _)) => configuration,
            Err(e) => return rejected(e),
        };
        let added = self.segments.add_segments(
            segments,
            configuration.supported_resource_set(),
            configuration.segments_concurrent(),
        );
        info!("Added {} segments: {:?}", added.len(), added);
        accepted(())
    }

    fn remove_segments(&self, segments: &BTreeSet<u32>) -> StoreFuture<()> {
        if let Err(e) = self.running() {
            return rejected(e);
        }
        let removed = self.segments.remove_segments(segments);
        info!("Removed {} segments: {:?}", removed.len(), removed);
        accepted(())
    }

    fn is_available(&self) -> StoreFuture<bool> {
        let (configuration, executor) = match self.running() {
            Ok(r) => r,
            Err(_) => return accepted(false),
        };
        if !configuration.live_availability_check() {
            return accepted(true);
        }

        let clients = self.router.clients();
        supply_blocking(executor.as_ref(), "is-available", async move {
            let results = future::join_all(clients.iter().map(|c| c.ping())).await;
            let available = !results.is_empty()
                && results.iter().all(|r| matches!(r, Ok(true)));
            if !available {
                let errors = results.iter().filter(|r| r.is_err()).count();
                warn!("FHIR server not available ({} transport errors)", errors);
            }
            Ok::<_, StoreError>(available)
        })
    }
}
