use seshmux_core::{
    store::{BlobKind, Layer, StoreError, SYNC_ENTRY_MAX_BYTES},
    StateStore,
};

pub async fn test_persist_then_load_round_trip(store: impl StateStore) {
    for layer in [Layer::Primary, Layer::Cache] {
        let payload = format!("payload for {layer}").into_bytes();
        store
            .persist(layer, BlobKind::Snapshot, &payload)
            .await
            .unwrap();
        let loaded = store.load(layer, BlobKind::Snapshot).await.unwrap();
        assert_eq!(loaded.as_deref(), Some(payload.as_slice()), "{layer}");
    }
}

pub async fn test_load_missing_returns_none(store: impl StateStore) {
    for layer in Layer::ALL {
        assert!(
            store.load(layer, BlobKind::Snapshot).await.unwrap().is_none(),
            "{layer}"
        );
        assert!(
            store.load(layer, BlobKind::Stamp).await.unwrap().is_none(),
            "{layer}"
        );
    }
}

pub async fn test_overwrite_replaces_blob(store: impl StateStore) {
    store
        .persist(Layer::Primary, BlobKind::Snapshot, b"first")
        .await
        .unwrap();
    store
        .persist(Layer::Primary, BlobKind::Snapshot, b"second")
        .await
        .unwrap();
    let loaded = store.load(Layer::Primary, BlobKind::Snapshot).await.unwrap();
    assert_eq!(loaded.as_deref(), Some(&b"second"[..]));
}

pub async fn test_layers_are_independent(store: impl StateStore) {
    store
        .persist(Layer::Primary, BlobKind::Snapshot, b"primary")
        .await
        .unwrap();
    store
        .persist(Layer::Cache, BlobKind::Snapshot, b"cache")
        .await
        .unwrap();

    let primary = store.load(Layer::Primary, BlobKind::Snapshot).await.unwrap();
    let cache = store.load(Layer::Cache, BlobKind::Snapshot).await.unwrap();
    assert_eq!(primary.as_deref(), Some(&b"primary"[..]));
    assert_eq!(cache.as_deref(), Some(&b"cache"[..]));
}

pub async fn test_blobs_are_independent(store: impl StateStore) {
    store
        .persist(Layer::Primary, BlobKind::Snapshot, b"snapshot")
        .await
        .unwrap();
    store
        .persist(Layer::Primary, BlobKind::Stamp, b"stamp")
        .await
        .unwrap();

    let snapshot = store.load(Layer::Primary, BlobKind::Snapshot).await.unwrap();
    let stamp = store.load(Layer::Primary, BlobKind::Stamp).await.unwrap();
    assert_eq!(snapshot.as_deref(), Some(&b"snapshot"[..]));
    assert_eq!(stamp.as_deref(), Some(&b"stamp"[..]));
}

pub async fn test_sync_layer_rejects_oversized_entries(store: impl StateStore) {
    let oversized = vec![0u8; SYNC_ENTRY_MAX_BYTES + 1];
    let result = store.persist(Layer::Sync, BlobKind::Snapshot, &oversized).await;
    assert!(matches!(result, Err(StoreError::TooLarge { .. })));

    // Under the cap, the sync layer accepts the entry.
    let small = vec![0u8; 64];
    store
        .persist(Layer::Sync, BlobKind::Snapshot, &small)
        .await
        .unwrap();
    let loaded = store.load(Layer::Sync, BlobKind::Snapshot).await.unwrap();
    assert_eq!(loaded.as_deref(), Some(small.as_slice()));
}

pub async fn test_clear_is_scoped_to_layer(store: impl StateStore) {
    for layer in Layer::ALL {
        store.persist(layer, BlobKind::Snapshot, b"x").await.unwrap();
        store.persist(layer, BlobKind::Stamp, b"y").await.unwrap();
    }

    store.clear(Layer::Cache).await.unwrap();

    assert!(store.load(Layer::Cache, BlobKind::Snapshot).await.unwrap().is_none());
    assert!(store.load(Layer::Cache, BlobKind::Stamp).await.unwrap().is_none());
    for layer in [Layer::Primary, Layer::Sync] {
        assert!(
            store.load(layer, BlobKind::Snapshot).await.unwrap().is_some(),
            "{layer}"
        );
    }
}
