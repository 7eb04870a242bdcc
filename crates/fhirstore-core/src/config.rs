//! Store configuration
//!
//! [`RawStoreConfiguration`] is the attribute form the cache engine (or a
//! config file) hands over, keyed by the `fhir-server-*` attribute names.
//! [`StoreConfiguration`] is the validated, immutable value every client is
//! built from.

use fhirstore_client::{ClientSettings, DEFAULT_API_KEY_PROPERTY_NAME, ResourceTypeSet};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_PORT: i64 = 8080;
pub const DEFAULT_PORT_TIMEOUT_SECS: i64 = 30;
pub const DEFAULT_CONTEXT_PATH: &str = "/";

/// Unvalidated store attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawStoreConfiguration {
    #[serde(rename = "fhir-server-host", default)]
    pub host: Option<String>,

    #[serde(rename = "fhir-server-port", default = "default_port")]
    pub port: i64,

    #[serde(rename = "fhir-server-requires-encryption", default)]
    pub requires_encryption: bool,

    /// Socket timeout in seconds
    #[serde(rename = "fhir-server-port-timeout", default = "default_port_timeout")]
    pub port_timeout: i64,

    #[serde(rename = "fhir-server-context-path", default = "default_context_path")]
    pub context_path: String,

    #[serde(rename = "fhir-server-persisted-resource-set", default)]
    pub persisted_resource_set: ResourceTypeSet,

    /// Types advertised on each segment; the persisted set when absent
    #[serde(rename = "fhir-server-supported-resource-set", default)]
    pub supported_resource_set: Option<ResourceTypeSet>,

    /// Name of the property the API key is read from
    #[serde(rename = "fhir-server-api-key-property", default = "default_api_key_property")]
    pub api_key_property: String,

    #[serde(rename = "fhir-server-api-key", default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub segments_concurrent: bool,

    /// Ping every backend client from `is_available` instead of reporting state only
    #[serde(default)]
    pub live_availability_check: bool,
}

impl Default for RawStoreConfiguration {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            requires_encryption: false,
            port_timeout: default_port_timeout(),
            context_path: default_context_path(),
            persisted_resource_set: ResourceTypeSet::new(),
            supported_resource_set: None,
            api_key_property: default_api_key_property(),
            api_key: None,
            segments_concurrent: false,
            live_availability_check: false,
        }
    }
}

fn default_port() -> i64 {
    DEFAULT_PORT
}

fn default_port_timeout() -> i64 {
    DEFAULT_PORT_TIMEOUT_SECS
}

fn default_context_path() -> String {
    DEFAULT_CONTEXT_PATH.to_string()
}

fn default_api_key_property() -> String {
    DEFAULT_API_KEY_PROPERTY_NAME.to_string()
}

/// Validated store configuration. Built once at store start and shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfiguration {
    host: String,
    port: u16,
    requires_encryption: bool,
    port_timeout: Duration,
    context_path: String,
    persisted_resource_set: ResourceTypeSet,
    supported_resource_set: ResourceTypeSet,
    api_key_property: String,
    api_key: Option<String>,
    segments_concurrent: bool,
    live_availability_check: bool,
}

impl StoreConfiguration {
    /// Validate raw attributes
    pub fn from_attributes(raw: RawStoreConfiguration) -> Result<Self, ConfigError> {
        let host = raw
            .host
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::MissingHost)?;

        let port = u16::try_from(raw.port).map_err(|_| ConfigError::PortOutOfRange(raw.port))?;

        if raw.port_timeout <= 0 {
            return Err(ConfigError::InvalidTimeout(raw.port_timeout));
        }

        if raw.persisted_resource_set.is_empty() {
            return Err(ConfigError::EmptyPersistedSet);
        }

        let context_path = if raw.context_path.trim().is_empty() {
            default_context_path()
        } else {
            raw.context_path.trim().to_string()
        };

        let supported_resource_set = raw
            .supported_resource_set
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| raw.persisted_resource_set.clone());

        Ok(Self {
            host,
            port,
            requires_encryption: raw.requires_encryption,
            port_timeout: Duration::from_secs(raw.port_timeout.unsigned_abs()),
            context_path,
            persisted_resource_set: raw.persisted_resource_set,
            supported_resource_set,
            api_key_property: raw.api_key_property,
            api_key: raw.api_key.filter(|k| !k.trim().is_empty()),
            segments_concurrent: raw.segments_concurrent,
            live_availability_check: raw.live_availability_check,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn requires_encryption(&self) -> bool {
        self.requires_encryption
    }

    pub fn port_timeout(&self) -> Duration {
        self.port_timeout
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn persisted_resource_set(&self) -> &ResourceTypeSet {
        &self.persisted_resource_set
    }

    pub fn supported_resource_set(&self) -> &ResourceTypeSet {
        &self.supported_resource_set
    }

    pub fn api_key_property(&self) -> &str {
        &self.api_key_property
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn segments_concurrent(&self) -> bool {
        self.segments_concurrent
    }

    pub fn live_availability_check(&self) -> bool {
        self.live_availability_check
    }

    /// Connection profile shared by every resource client
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            host: self.host.clone(),
            port: Some(self.port),
            context_path: self.context_path.clone(),
            requires_encryption: self.requires_encryption,
            socket_timeout: self.port_timeout,
            api_key: self.api_key.clone(),
        }
    }
}
