//! Per-resource-type FHIR server client

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE, EXPIRES, HeaderMap, HeaderValue, LOCATION};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, ResolveError};
use crate::model::{Bundle, FhirIdentifier, FhirReference, Identifier, resource_id};
use crate::resolver::IdentifierResolver;
use crate::resource_type::ResourceType;

/// Header carrying the shared static credential
pub const API_KEY_HEADER_NAME: &str = "x-api-key";

/// Property the API key value is read from unless configured otherwise
pub const DEFAULT_API_KEY_PROPERTY_NAME: &str = "HAPI_API_KEY";

const FHIR_JSON: &str = "application/fhir+json";

/// Upper bound on result pages followed when listing a resource type
const MAX_LIST_PAGES: usize = 1000;

/// Connection profile for a backend FHIR server
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub host: String,
    pub port: Option<u16>,
    pub context_path: String,
    pub requires_encryption: bool,
    pub socket_timeout: Duration,
    /// Value for the API key header. Only sent when encryption is required.
    pub api_key: Option<String>,
}

impl ClientSettings {
    /// `http(s)://host:port/context/`, always ending in `/`
    pub fn base_url(&self) -> Result<String, ClientError> {
        if self.host.trim().is_empty() {
            return Err(ClientError::InvalidSettings("host is empty".to_string()));
        }
        let port = self
            .port
            .ok_or_else(|| ClientError::InvalidSettings("port is not set".to_string()))?;

        let scheme = if self.requires_encryption { "https" } else { "http" };

        let mut path = if self.context_path.is_empty() {
            "/".to_string()
        } else if self.context_path.starts_with('/') {
            self.context_path.clone()
        } else {
            format!("/{}", self.context_path)
        };
        if !path.ends_with('/') {
            path.push('/');
        }

        Ok(format!("{}://{}:{}{}", scheme, self.host, port, path))
    }

    /// Headers attached to every request
    ///
    /// With encryption the API key header is always present, empty when
    /// no key value was configured.
    pub fn default_headers(&self) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(FHIR_JSON));

        if self.requires_encryption {
            let mut value = HeaderValue::from_str(self.api_key.as_deref().unwrap_or_default())
                .map_err(|e| ClientError::InvalidSettings(format!("API key: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER_NAME, value);
        }

        Ok(headers)
    }
}

/// Result of a create or update
///
/// Failures are carried here instead of being returned as errors; callers
/// inspect `succeeded`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodOutcome {
    pub succeeded: bool,
    pub created: bool,
    pub id: Option<String>,
    pub status: Option<u16>,
    pub resource: Option<Value>,
    pub error: Option<String>,
}

impl MethodOutcome {
    fn failed(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            created: false,
            status,
            error: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// Result of deleting a resource by id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// The server does not allow deleting this resource type
    NotSupported,
    Failed(String),
}

impl DeleteOutcome {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted)
    }
}

/// A resource returned by an identifier search
#[derive(Debug, Clone, PartialEq)]
pub struct FoundResource {
    pub resource: Value,
    /// From the `Expires` header of the search response, if the server sent one
    pub expires_at: Option<DateTime<Utc>>,
}

impl FoundResource {
    pub fn id(&self) -> Option<&str> {
        resource_id(&self.resource)
    }
}

struct ClientHandle {
    http: Client,
    base_url: String,
}

/// Client bound to a single resource type on a single backend server
pub struct ResourceClient {
    resource_type: ResourceType,
    settings: ClientSettings,
    handle: OnceLock<ClientHandle>,
}

impl ResourceClient {
    /// Create an uninitialised client. Call [`ResourceClient::initialise`] before use.
    pub fn new(resource_type: ResourceType, settings: ClientSettings) -> Self {
        Self {
            resource_type,
            settings,
            handle: OnceLock::new(),
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn is_initialised(&self) -> bool {
        self.handle.get().is_some()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.handle.get().map(|h| h.base_url.as_str())
    }

    /// Build the HTTP client. Idempotent; returns whether the client is usable.
    ///
    /// The server's capability statement is never fetched to validate the
    /// connection; the configuration is trusted.
    pub fn initialise(&self) -> bool {
        if self.handle.get().is_some() {
            info!(resource_type = %self.resource_type, "Nothing to do, client already initialised");
            return true;
        }

        info!(
            resource_type = %self.resource_type,
            "Initialising client: host={}, port={:?}, context_path={}, encrypted={}",
            self.settings.host,
            self.settings.port,
            self.settings.context_path,
            self.settings.requires_encryption
        );

        match self.build_handle() {
            Ok(handle) => {
                info!(
                    resource_type = %self.resource_type,
                    "Client created for {}", handle.base_url
                );
                // A concurrent initialise may have won the race; either handle is equivalent.
                let _ = self.handle.set(handle);
                true
            }
            Err(e) => {
                error!(resource_type = %self.resource_type, "Failed to initialise client: {}", e);
                false
            }
        }
    }

    fn build_handle(&self) -> Result<ClientHandle, ClientError> {
        let base_url = self.settings.base_url()?;
        let headers = self.settings.default_headers()?;

        if self.settings.requires_encryption && self.settings.api_key.is_none() {
            warn!(
                resource_type = %self.resource_type,
                "Encryption required but no API key configured, sending empty {}",
                API_KEY_HEADER_NAME
            );
        }

        let http = Client::builder()
            .default_headers(headers)
            .connect_timeout(self.settings.socket_timeout)
            .read_timeout(self.settings.socket_timeout)
            .build()?;

        Ok(ClientHandle { http, base_url })
    }

    fn handle(&self) -> Result<&ClientHandle, ClientError> {
        self.handle
            .get()
            .ok_or_else(|| ClientError::NotInitialised(self.resource_type.to_string()))
    }

    fn check_type(&self, resource_type: ResourceType) -> Result<(), ClientError> {
        if resource_type != self.resource_type {
            return Err(ClientError::ResourceTypeMismatch {
                expected: self.resource_type.to_string(),
                actual: resource_type.to_string(),
            });
        }
        Ok(())
    }

    // ==================== Write Operations ====================

    /// Create a resource on the server (`POST <Type>`)
    pub async fn create(&self, resource: &Value) -> MethodOutcome {
        debug!(resource_type = %self.resource_type, "Creating resource");
        let outcome = match self.prepare_write(resource, None) {
            Ok(url) => self.send_write(Method::POST, url, resource).await,
            Err(e) => Err(e),
        };
        self.finish_write("create", outcome)
    }

    /// Update a resource on the server (`PUT <Type>/<id>`). The resource must carry its id.
    pub async fn update(&self, resource: &Value) -> MethodOutcome {
        debug!(resource_type = %self.resource_type, "Updating resource");
        let outcome = match resource_id(resource) {
            Some(id) => match self.prepare_write(resource, Some(id)) {
                Ok(url) => self.send_write(Method::PUT, url, resource).await,
                Err(e) => Err(e),
            },
            None => Err(ClientError::InvalidResource(
                "resource to update has no id".to_string(),
            )),
        };
        self.finish_write("update", outcome)
    }

    fn prepare_write(&self, resource: &Value, id: Option<&str>) -> Result<String, ClientError> {
        let handle = self.handle()?;
        let actual = ResourceType::of_resource(resource).ok_or_else(|| {
            ClientError::InvalidResource("resource has no known resourceType".to_string())
        })?;
        self.check_type(actual)?;

        Ok(match id {
            Some(id) => format!("{}{}/{}", handle.base_url, self.resource_type, id),
            None => format!("{}{}", handle.base_url, self.resource_type),
        })
    }

    async fn send_write(
        &self,
        method: Method,
        url: String,
        resource: &Value,
    ) -> Result<MethodOutcome, ClientError> {
        let handle = self.handle()?;
        let body = serde_json::to_vec(resource)
            .map_err(|e| ClientError::InvalidResource(e.to_string()))?;

        let response = handle
            .http
            .request(method, &url)
            .header(CONTENT_TYPE, FHIR_JSON)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Backend {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let location_id = response
            .headers()
            .get(LOCATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|loc| id_from_location(loc, self.resource_type));

        let text = response.text().await.unwrap_or_default();
        let returned: Option<Value> = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&text).ok()
        };

        let id = returned
            .as_ref()
            .and_then(|r| resource_id(r).map(str::to_string))
            .or(location_id)
            .or_else(|| resource_id(resource).map(str::to_string));

        Ok(MethodOutcome {
            succeeded: true,
            created: status == StatusCode::CREATED,
            id,
            status: Some(status.as_u16()),
            resource: returned,
            error: None,
        })
    }

    fn finish_write(
        &self,
        operation: &str,
        result: Result<MethodOutcome, ClientError>,
    ) -> MethodOutcome {
        match result {
            Ok(outcome) => {
                debug!(
                    resource_type = %self.resource_type,
                    "{} finished: status={:?}, id={:?}", operation, outcome.status, outcome.id
                );
                outcome
            }
            Err(e) => {
                error!(resource_type = %self.resource_type, "Error during {}: {}", operation, e);
                let status = match &e {
                    ClientError::Backend { status, .. } => Some(*status),
                    _ => None,
                };
                MethodOutcome::failed(status, e.to_string())
            }
        }
    }

    // ==================== Find Operations ====================

    /// Find a resource by a FHIR `Identifier` element
    pub async fn find_by_identifier(
        &self,
        identifier: &FhirIdentifier,
    ) -> Result<Option<FoundResource>, ClientError> {
        self.resolve(&identifier.to_identifier()).await
    }

    /// Find the resource a FHIR `Reference` element points to by identifier
    pub async fn find_by_reference(
        &self,
        reference: &FhirReference,
    ) -> Result<Option<FoundResource>, ClientError> {
        let reference = reference.to_resource_reference()?;
        self.check_type(reference.resource_type)?;
        self.resolve(&reference.identifier).await
    }

    /// Search by identifier triple and return the first resource of this client's type
    ///
    /// An empty value is rejected. An identifier with a type code but no
    /// system matches none of the search shapes and resolves to nothing.
    pub async fn resolve(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<FoundResource>, ClientError> {
        info!(
            resource_type = %self.resource_type,
            "Finding resource by identifier: {}", identifier
        );

        let query = match IdentifierResolver::search_query(self.resource_type, identifier) {
            Ok(query) => query,
            Err(ResolveError::CodeWithoutSystem) => {
                warn!(
                    resource_type = %self.resource_type,
                    "Identifier {} has a type code but no system, nothing to search", identifier
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let handle = self.handle()?;
        let url = format!("{}{}", handle.base_url, query.relative_url());
        debug!(resource_type = %self.resource_type, "Search URL: {}", url);

        let response = handle.http.get(&url).send().await?;
        let expires_at = expires_header(&response);
        let bundle = self.read_bundle(response).await?;

        let resource = IdentifierResolver::first_of_type(Some(&bundle), self.resource_type);
        info!(
            resource_type = %self.resource_type,
            "Retrieved resource: {}",
            resource.as_ref().and_then(resource_id).unwrap_or("-none-")
        );

        Ok(resource.map(|resource| FoundResource {
            resource,
            expires_at,
        }))
    }

    async fn read_bundle(&self, response: Response) -> Result<Bundle, ClientError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Backend {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let raw: Value = response.json().await?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                resource_type = %self.resource_type,
                "Retrieved bundle: {}",
                serde_json::to_string_pretty(&raw).unwrap_or_default()
            );
        }

        serde_json::from_value(raw).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    // ==================== Delete and Listing ====================

    /// Delete a resource by logical id (`DELETE <Type>/<id>`)
    pub async fn delete(&self, id: &str) -> DeleteOutcome {
        let handle = match self.handle() {
            Ok(h) => h,
            Err(e) => return DeleteOutcome::Failed(e.to_string()),
        };
        let url = format!("{}{}/{}", handle.base_url, self.resource_type, id);
        debug!(resource_type = %self.resource_type, "Deleting {}", url);

        let response = match handle.http.delete(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                error!(resource_type = %self.resource_type, "Error deleting {}: {}", id, e);
                return DeleteOutcome::Failed(e.to_string());
            }
        };

        match response.status() {
            s if s.is_success() => DeleteOutcome::Deleted,
            StatusCode::NOT_FOUND | StatusCode::GONE => DeleteOutcome::NotFound,
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
                warn!(resource_type = %self.resource_type, "Server does not support delete");
                DeleteOutcome::NotSupported
            }
            s => DeleteOutcome::Failed(format!(
                "{} - {}",
                s.as_u16(),
                response.text().await.unwrap_or_default()
            )),
        }
    }

    /// Logical ids of every resource of this type, following result pages
    pub async fn list_ids(&self, page_size: u32) -> Result<Vec<String>, ClientError> {
        let handle = self.handle()?;
        let mut next = Some(format!(
            "{}{}?_count={}&_elements=id",
            handle.base_url, self.resource_type, page_size
        ));
        let mut ids = Vec::new();
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_LIST_PAGES {
                warn!(
                    resource_type = %self.resource_type,
                    "Stopped listing after {} pages", MAX_LIST_PAGES
                );
                break;
            }

            let response = handle.http.get(&url).send().await?;
            let bundle = self.read_bundle(response).await?;
            ids.extend(
                bundle
                    .resources_of_type(self.resource_type)
                    .filter_map(resource_id)
                    .map(str::to_string),
            );
            next = bundle.next_link().map(str::to_string);
        }

        Ok(ids)
    }

    /// Check the server answers its capability endpoint
    pub async fn ping(&self) -> Result<bool, ClientError> {
        let handle = self.handle()?;
        let response = handle
            .http
            .get(format!("{}metadata", handle.base_url))
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

/// Extract the logical id from a `Location` such as `.../Patient/123/_history/1`
fn id_from_location(location: &str, resource_type: ResourceType) -> Option<String> {
    let marker = format!("{}/", resource_type);
    let start = location.rfind(&marker)? + marker.len();
    location[start..]
        .split('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn expires_header(response: &Response) -> Option<DateTime<Utc>> {
    response
        .headers()
        .get(EXPIRES)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
        .map(|d| d.with_timezone(&Utc))
}
