//! Core error types

use fhirstore_client::ResourceType;
use thiserror::Error;

/// Reasons a store configuration is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("fhir-server-host is not set")]
    MissingHost,

    #[error("fhir-server-port {0} is outside 0..=65535")]
    PortOutOfRange(i64),

    #[error("fhir-server-port-timeout must be positive, got {0}")]
    InvalidTimeout(i64),

    #[error("fhir-server-persisted-resource-set is empty")]
    EmptyPersistedSet,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Client error: {0}")]
    Client(#[from] fhirstore_client::ClientError),

    #[error("Resource type {0} is not persisted by this store")]
    NotSupported(ResourceType),

    #[error("No usable client for {0}")]
    ClientUnavailable(ResourceType),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl From<CoreError> for fhirstore_spi::StoreError {
    fn from(err: CoreError) -> Self {
        use fhirstore_spi::StoreError;

        match err {
            CoreError::Config(e) => StoreError::Configuration(e.to_string()),
            CoreError::NotSupported(rt) => StoreError::NotSupported(rt.to_string()),
            CoreError::InvalidKey(k) => StoreError::InvalidKey(k),
            CoreError::Client(fhirstore_client::ClientError::InvalidIdentifier(e)) => {
                StoreError::InvalidKey(e.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}
