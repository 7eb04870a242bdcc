//! Non-blocking store trait

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entry::{ClearSummary, MarshallableEntry, WriteOutcome};
use crate::error::StoreError;
use crate::executor::BlockingExecutor;

/// In-flight handle returned by every store operation
pub type StoreFuture<T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send>>;

/// Capability flags a store advertises to the cache engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Characteristic {
    /// Entries can be published in bulk
    BulkRead,
    /// Operations are addressed per segment
    Segmentable,
    /// Entries may carry expiry metadata
    ExpirationAware,
}

impl Characteristic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Characteristic::BulkRead => "bulk-read",
            Characteristic::Segmentable => "segmentable",
            Characteristic::ExpirationAware => "expiration-aware",
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dependencies supplied by the cache engine when a store starts
pub struct InitializationContext<C> {
    configuration: Option<C>,
    executor: Arc<dyn BlockingExecutor>,
}

impl<C> InitializationContext<C> {
    pub fn new(configuration: Option<C>, executor: Arc<dyn BlockingExecutor>) -> Self {
        Self {
            configuration,
            executor,
        }
    }

    pub fn configuration(&self) -> Option<&C> {
        self.configuration.as_ref()
    }

    pub fn take_configuration(&mut self) -> Option<C> {
        self.configuration.take()
    }

    pub fn executor(&self) -> Arc<dyn BlockingExecutor> {
        self.executor.clone()
    }
}

/// Persistence port driven by the cache engine
///
/// Every method returns immediately. Backend work is dispatched on the
/// executor handed over in [`InitializationContext`] and its result is
/// delivered through the returned [`StoreFuture`]. Dropping a future does
/// not cancel work that was already dispatched.
pub trait NonBlockingStore<K, V>: Send + Sync {
    type Configuration: Send + Sync;

    /// Begin the store lifecycle with engine-supplied dependencies
    fn start(&self, ctx: InitializationContext<Self::Configuration>) -> StoreFuture<()>;

    /// Release backend handles. The store cannot be restarted.
    fn stop(&self) -> StoreFuture<()>;

    /// Load the entry for `key`. `None` is a cache miss.
    fn load(&self, segment: u32, key: &K) -> StoreFuture<Option<MarshallableEntry<K, V>>>;

    /// Persist an entry
    fn write(&self, segment: u32, entry: MarshallableEntry<K, V>) -> StoreFuture<WriteOutcome>;

    /// Remove the entry for `key`, reporting whether something was removed
    fn delete(&self, segment: u32, key: &K) -> StoreFuture<bool>;

    /// Best-effort removal of everything the store persists
    fn clear(&self) -> StoreFuture<ClearSummary>;

    /// Capabilities of this store. Never depends on configuration.
    fn characteristics(&self) -> BTreeSet<Characteristic>;

    /// Take ownership of the given segments
    fn add_segments(&self, segments: &BTreeSet<u32>) -> StoreFuture<()>;

    /// Give up ownership of the given segments
    fn remove_segments(&self, segments: &BTreeSet<u32>) -> StoreFuture<()>;

    /// Whether the store can currently service requests
    fn is_available(&self) -> StoreFuture<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristic_names() {
        assert_eq!(Characteristic::BulkRead.to_string(), "bulk-read");
        assert_eq!(Characteristic::Segmentable.as_str(), "segmentable");
        assert_eq!(Characteristic::ExpirationAware.as_str(), "expiration-aware");
    }
}
