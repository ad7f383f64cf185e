//! In-memory blob store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use seshmux_core::{
    store::{BlobKind, Layer, StateStoreImpl, StoreError, SYNC_ENTRY_MAX_BYTES},
    StateStore,
};

/// A layered blob store held entirely in memory. Clones share contents, so
/// one `MemoryStore` can back several engine instances in tests, surviving
/// a simulated restart the way durable storage survives a real one.
#[derive(Clone, Default)]
pub struct MemoryStore {
    map: Arc<DashMap<(Layer, BlobKind), Vec<u8>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw blob access, for assertions.
    #[must_use]
    pub fn raw(&self, layer: Layer, blob: BlobKind) -> Option<Vec<u8>> {
        self.map.get(&(layer, blob)).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl StateStore for MemoryStore {}

#[async_trait]
impl StateStoreImpl for MemoryStore {
    async fn persist(
        &self,
        layer: Layer,
        blob: BlobKind,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        if layer == Layer::Sync && bytes.len() > SYNC_ENTRY_MAX_BYTES {
            return Err(StoreError::TooLarge {
                layer,
                size: bytes.len(),
                limit: SYNC_ENTRY_MAX_BYTES,
            });
        }
        self.map.insert((layer, blob), bytes.to_vec());
        Ok(())
    }

    async fn load(&self, layer: Layer, blob: BlobKind) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.map.get(&(layer, blob)).map(|entry| entry.value().clone()))
    }

    async fn clear(&self, layer: Layer) -> Result<(), StoreError> {
        self.map.retain(|(l, _), _| *l != layer);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn clones_share_contents() {
        let store = MemoryStore::new();
        let alias = store.clone();
        store
            .persist(Layer::Primary, BlobKind::Snapshot, b"state")
            .await
            .unwrap();
        assert_eq!(
            alias
                .load(Layer::Primary, BlobKind::Snapshot)
                .await
                .unwrap()
                .as_deref(),
            Some(&b"state"[..])
        );
    }

    #[tokio::test]
    async fn sync_layer_enforces_entry_cap() {
        let store = MemoryStore::new();
        let oversized = vec![0u8; SYNC_ENTRY_MAX_BYTES + 1];
        let result = store
            .persist(Layer::Sync, BlobKind::Snapshot, &oversized)
            .await;
        assert!(matches!(result, Err(StoreError::TooLarge { .. })));

        store
            .persist(Layer::Primary, BlobKind::Snapshot, &oversized)
            .await
            .unwrap();
    }
}
