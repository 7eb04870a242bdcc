//! FHIR Store Core
//!
//! This crate provides the cache store engine: validated store
//! configuration, routing from resource type to backend client, the
//! segment map, and the [`FhirServerCacheStore`] that implements the
//! non-blocking store contract.

pub mod config;
pub mod error;
pub mod key;
pub mod router;
pub mod segments;
pub mod store;

pub use config::{
    DEFAULT_CONTEXT_PATH, DEFAULT_PORT, DEFAULT_PORT_TIMEOUT_SECS, RawStoreConfiguration,
    StoreConfiguration,
};
pub use error::{ConfigError, CoreError};
pub use key::ResourceKey;
pub use router::ResourceTypeRouter;
pub use segments::{SegmentDescriptor, SegmentMap};
pub use store::{CLEAR_PAGE_SIZE, ClientStatus, FhirServerCacheStore, StoreState, StoreStatus};
