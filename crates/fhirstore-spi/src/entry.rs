//! Entries exchanged between the cache engine and a store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Expiration metadata attached to an entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Absolute point in time after which the entry must be treated as absent
    pub expires_at: Option<DateTime<Utc>>,
}

impl Metadata {
    pub fn expiring_at(expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at: Some(expires_at),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A key/value pair handed to a store on write and returned on load
#[derive(Debug, Clone, PartialEq)]
pub struct MarshallableEntry<K, V> {
    key: K,
    value: V,
    metadata: Option<Metadata>,
}

impl<K, V> MarshallableEntry<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Option<Metadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Expiry instant, if the entry carries one
    pub fn expiry_time(&self) -> Option<DateTime<Utc>> {
        self.metadata.as_ref().and_then(|m| m.expires_at)
    }

    pub fn into_parts(self) -> (K, V, Option<Metadata>) {
        (self.key, self.value, self.metadata)
    }
}

/// Result of writing a single entry
///
/// Backend failures are reported here rather than through the error
/// channel so one bad entry never fails a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Created { id: Option<String> },
    Updated { id: Option<String> },
    Failed { reason: String },
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, WriteOutcome::Failed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOutcome::Created { .. } => "created",
            WriteOutcome::Updated { .. } => "updated",
            WriteOutcome::Failed { .. } => "failed",
        }
    }
}

/// Tally of a best-effort bulk clear
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearSummary {
    pub removed: u64,
    pub failed: u64,
}

impl ClearSummary {
    pub fn merge(&mut self, other: ClearSummary) {
        self.removed += other.removed;
        self.failed += other.failed;
    }
}
