//! In-process resource registry

use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use dx_core::{ResolvedResource, ResourceDescriptor, ResourceResolver, StoreError, TabularStore};
use parking_lot::RwLock;
use tracing::info;

/// Maps resource ids to stores for hosts that embed the adapter directly
#[derive(Default)]
pub struct ResourceCatalog {
    resources: RwLock<AHashMap<String, ResolvedResource>>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its descriptor, replacing any previous entry
    pub fn register(&self, descriptor: ResourceDescriptor, store: Arc<dyn TabularStore>) {
        info!("Registered resource '{}' backed by '{}'", descriptor.id, store.name());
        self.resources
            .write()
            .insert(descriptor.id.clone(), ResolvedResource { descriptor, store });
    }

    /// Register a store as a datastore-backed resource
    pub fn register_store(&self, resource_id: impl Into<String>, store: Arc<dyn TabularStore>) {
        self.register(ResourceDescriptor::new(resource_id).with_datastore(true), store);
    }

    pub fn remove(&self, resource_id: &str) -> bool {
        self.resources.write().remove(resource_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }
}

#[async_trait]
impl ResourceResolver for ResourceCatalog {
    async fn resolve(&self, resource_id: &str) -> Result<ResolvedResource, StoreError> {
        self.resources
            .read()
            .get(resource_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(resource_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MemoryStore;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let catalog = ResourceCatalog::new();
        catalog.register_store("r1", Arc::new(MemoryStore::new("r1", Vec::new())));
        assert_eq!(catalog.len(), 1);

        let resolved = catalog.resolve("r1").await.unwrap();
        assert!(resolved.descriptor.datastore_active);
        assert_eq!(resolved.store.name(), "r1");

        assert!(matches!(catalog.resolve("r2").await, Err(StoreError::NotFound(_))));
        assert!(catalog.remove("r1"));
        assert!(catalog.is_empty());
    }
}
