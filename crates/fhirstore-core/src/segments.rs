//! Segment to backend instance mapping

use std::collections::{BTreeMap, BTreeSet};

use fhirstore_client::{ResourceType, ResourceTypeSet};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

/// One cache segment served by this store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentDescriptor {
    pub segment_id: u32,
    pub supported_resource_types: ResourceTypeSet,
    pub concurrent: bool,
}

impl SegmentDescriptor {
    pub fn new(
        segment_id: u32,
        supported_resource_types: ResourceTypeSet,
        concurrent: bool,
    ) -> Self {
        Self {
            segment_id,
            supported_resource_types,
            concurrent,
        }
    }

    pub fn supports(&self, resource_type: ResourceType) -> bool {
        self.supported_resource_types.contains(resource_type)
    }
}

/// Live segment descriptors, keyed by segment id
///
/// Add and remove are idempotent and only hold the lock for the map update.
#[derive(Default)]
pub struct SegmentMap {
    segments: RwLock<BTreeMap<u32, SegmentDescriptor>>,
}

impl SegmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ids`, returning those that were not already present
    pub fn add_segments(
        &self,
        ids: &BTreeSet<u32>,
        supported: &ResourceTypeSet,
        concurrent: bool,
    ) -> Vec<u32> {
        let mut segments = self.segments.write();
        let mut added = Vec::new();
        for &id in ids {
            if segments.contains_key(&id) {
                continue;
            }
            segments.insert(id, SegmentDescriptor::new(id, supported.clone(), concurrent));
            added.push(id);
        }
        debug!("Added segments {:?} ({} live)", added, segments.len());
        added
    }

    /// Unregister `ids`, returning those that were present
    pub fn remove_segments(&self, ids: &BTreeSet<u32>) -> Vec<u32> {
        let mut segments = self.segments.write();
        let removed: Vec<u32> = ids
            .iter()
            .filter(|id| segments.remove(id).is_some())
            .copied()
            .collect();
        debug!("Removed segments {:?} ({} live)", removed, segments.len());
        removed
    }

    pub fn contains(&self, segment_id: u32) -> bool {
        self.segments.read().contains_key(&segment_id)
    }

    pub fn get(&self, segment_id: u32) -> Option<SegmentDescriptor> {
        self.segments.read().get(&segment_id).cloned()
    }

    pub fn segment_ids(&self) -> BTreeSet<u32> {
        self.segments.read().keys().copied().collect()
    }

    /// Snapshot of all live descriptors, ordered by id
    pub fn descriptors(&self) -> Vec<SegmentDescriptor> {
        self.segments.read().values().cloned().collect()
    }

    /// Segments whose instance supports `resource_type`
    pub fn segments_for(&self, resource_type: ResourceType) -> BTreeSet<u32> {
        self.segments
            .read()
            .values()
            .filter(|d| d.supports(resource_type))
            .map(|d| d.segment_id)
            .collect()
    }

    pub fn clear(&self) {
        self.segments.write().clear();
    }

    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[u32]) -> BTreeSet<u32> {
        v.iter().copied().collect()
    }

    fn patients() -> ResourceTypeSet {
        "Patient".parse().unwrap()
    }

    #[test]
    fn test_add_then_remove() {
        let map = SegmentMap::new();
        assert_eq!(map.add_segments(&ids(&[1, 2]), &patients(), false), vec![1, 2]);
        assert_eq!(map.remove_segments(&ids(&[2])), vec![2]);
        assert_eq!(map.segment_ids(), ids(&[1]));
    }

    #[test]
    fn test_operations_are_idempotent() {
        let map = SegmentMap::new();
        map.add_segments(&ids(&[1, 2]), &patients(), false);
        assert!(map.add_segments(&ids(&[1, 2]), &patients(), true).is_empty());
        assert!(!map.get(1).unwrap().concurrent);

        map.remove_segments(&ids(&[2]));
        assert!(map.remove_segments(&ids(&[2, 7])).is_empty());
        assert_eq!(map.segment_ids(), ids(&[1]));
    }

    #[test]
    fn test_segments_for_type() {
        let map = SegmentMap::new();
        map.add_segments(&ids(&[0, 3]), &patients(), true);
        map.add_segments(&ids(&[5]), &"Task".parse().unwrap(), true);

        assert_eq!(map.segments_for(ResourceType::Patient), ids(&[0, 3]));
        assert_eq!(map.segments_for(ResourceType::Task), ids(&[5]));
        assert!(map.segments_for(ResourceType::Device).is_empty());

        let descriptors = map.descriptors();
        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[0].segment_id, 0);
    }

    #[test]
    fn test_clear() {
        let map = SegmentMap::new();
        map.add_segments(&ids(&[1]), &patients(), false);
        map.clear();
        assert!(map.is_empty());
        assert!(!map.contains(1));
    }
}
