//! Resource type to client routing
//!
//! One [`ResourceClient`] per persisted resource type, built when the store
//! starts and dropped when it stops. Nothing else adds or removes clients.

use std::collections::HashMap;
use std::sync::Arc;

use fhirstore_client::{ResourceClient, ResourceType, ResourceTypeSet};
use parking_lot::RwLock;
use tracing::{error, info};

use crate::config::StoreConfiguration;
use crate::error::CoreError;

#[derive(Default)]
struct RouteTable {
    persisted: ResourceTypeSet,
    clients: HashMap<ResourceType, Arc<ResourceClient>>,
}

/// Maps each persisted resource type to its client
#[derive(Default)]
pub struct ResourceTypeRouter {
    table: RwLock<RouteTable>,
}

impl ResourceTypeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and initialise a client for every persisted type, replacing any previous table
    ///
    /// Returns the number of usable clients. A client that fails to
    /// initialise is logged and left out; its type then routes to
    /// [`CoreError::ClientUnavailable`].
    pub fn build(&self, config: &StoreConfiguration) -> usize {
        let settings = config.client_settings();
        let mut clients = HashMap::new();

        for resource_type in config.persisted_resource_set().iter() {
            let client = ResourceClient::new(resource_type, settings.clone());
            if client.initialise() {
                clients.insert(resource_type, Arc::new(client));
            } else {
                error!("Failed to create client for {}", resource_type);
            }
        }

        let count = clients.len();
        *self.table.write() = RouteTable {
            persisted: config.persisted_resource_set().clone(),
            clients,
        };

        info!(
            "Resource router built: {} of {} clients ready",
            count,
            config.persisted_resource_set().len()
        );
        count
    }

    /// Drop every client
    pub fn teardown(&self) {
        let mut table = self.table.write();
        let count = table.clients.len();
        *table = RouteTable::default();
        info!("Resource router torn down, released {} clients", count);
    }

    /// Client for `resource_type`
    pub fn route(&self, resource_type: ResourceType) -> Result<Arc<ResourceClient>, CoreError> {
        let table = self.table.read();
        if !table.persisted.contains(resource_type) {
            return Err(CoreError::NotSupported(resource_type));
        }
        table
            .clients
            .get(&resource_type)
            .cloned()
            .ok_or(CoreError::ClientUnavailable(resource_type))
    }

    /// All live clients, ordered by resource type
    pub fn clients(&self) -> Vec<Arc<ResourceClient>> {
        let table = self.table.read();
        let mut clients: Vec<_> = table.clients.values().cloned().collect();
        clients.sort_by_key(|c| c.resource_type());
        clients
    }

    pub fn len(&self) -> usize {
        self.table.read().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawStoreConfiguration;

    fn config(types: &str) -> StoreConfiguration {
        StoreConfiguration::from_attributes(RawStoreConfiguration {
            host: Some("localhost".to_string()),
            persisted_resource_set: types.parse().unwrap(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_one_client_per_persisted_type() {
        let router = ResourceTypeRouter::new();
        assert_eq!(router.build(&config("Patient,Task,Patient")), 2);

        let a = router.route(ResourceType::Patient).unwrap();
        let b = router.route(ResourceType::Patient).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.resource_type(), ResourceType::Patient);

        let types: Vec<_> = router.clients().iter().map(|c| c.resource_type()).collect();
        assert_eq!(types, vec![ResourceType::Patient, ResourceType::Task]);
    }

    #[test]
    fn test_unsupported_type() {
        let router = ResourceTypeRouter::new();
        router.build(&config("Patient"));
        assert!(matches!(
            router.route(ResourceType::Encounter),
            Err(CoreError::NotSupported(ResourceType::Encounter))
        ));
    }

    #[test]
    fn test_rebuild_replaces_table() {
        let router = ResourceTypeRouter::new();
        router.build(&config("Patient"));
        router.build(&config("Task"));
        assert!(router.route(ResourceType::Patient).is_err());
        assert!(router.route(ResourceType::Task).is_ok());
    }

    #[test]
    fn test_teardown() {
        let router = ResourceTypeRouter::new();
        router.build(&config("Patient"));
        router.teardown();
        assert!(router.is_empty());
        assert!(matches!(
            router.route(ResourceType::Patient),
            Err(CoreError::NotSupported(_))
        ));
    }
}
