//! FHIR Store Persistence SPI
//!
//! This crate defines the contract between a distributed cache engine
//! and a persistence adapter: the non-blocking store port, the entries
//! it exchanges, and the worker pool the engine lends to the store.

pub mod entry;
pub mod error;
pub mod executor;
pub mod store;

pub use entry::{ClearSummary, MarshallableEntry, Metadata, WriteOutcome};
pub use error::StoreError;
pub use executor::{BlockingExecutor, BlockingTask, TokioBlockingExecutor, supply_blocking};
pub use store::{Characteristic, InitializationContext, NonBlockingStore, StoreFuture};
