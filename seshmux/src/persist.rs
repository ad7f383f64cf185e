//! Layered persistence with debounced and immediate writes.
//!
//! A single task owns all durable writes, so persists never re-order:
//! debounced requests coalesce until the quiescence window elapses, and an
//! immediate request flushes at once, sleeps briefly to let the commit settle
//! (processes can be killed mid-flush), and acknowledges its caller.

use std::sync::Weak;

use time::OffsetDateTime;
use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep, sleep_until, Instant},
};

use seshmux_core::{
    store::{BlobKind, Layer, StateStore, StoreError, SYNC_ENTRY_MAX_BYTES},
    time as clock,
};

use crate::{
    engine::EngineInner,
    snapshot::{Snapshot, Stamp},
    util::ErrorExt,
};

pub(crate) enum PersistMsg {
    Debounced,
    Immediate(oneshot::Sender<Result<(), StoreError>>),
}

/// The error type surfaced to callers of an immediate write.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("persistence task is not running")]
    TaskGone,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Queue handle into the persistence task.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<PersistMsg>,
}

impl PersistHandle {
    /// Requests a coalesced write after the quiescence window.
    pub fn debounced(&self) {
        let _ = self.tx.send(PersistMsg::Debounced);
    }

    /// Writes now and waits for the commit (plus the settle delay).
    pub async fn immediate(&self) -> Result<(), PersistError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(PersistMsg::Immediate(ack))
            .map_err(|_| PersistError::TaskGone)?;
        done.await.map_err(|_| PersistError::TaskGone)??;
        Ok(())
    }
}

/// Spawns the persistence task. It holds the engine weakly and exits when the
/// engine is dropped.
pub(crate) fn spawn(inner: Weak<EngineInner>) -> PersistHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(inner, rx));
    PersistHandle { tx }
}

async fn run(inner: Weak<EngineInner>, mut rx: mpsc::UnboundedReceiver<PersistMsg>) {
    let mut deadline: Option<Instant> = None;

    loop {
        let msg = match deadline {
            Some(at) => {
                tokio::select! {
                    msg = rx.recv() => msg,
                    _ = sleep_until(at) => {
                        deadline = None;
                        flush(&inner).await;
                        continue;
                    }
                }
            }
            None => rx.recv().await,
        };

        match msg {
            None => break,
            Some(PersistMsg::Debounced) => {
                let Some(engine) = inner.upgrade() else { break };
                deadline = Some(Instant::now() + engine.config.debounce_quiescence);
            }
            Some(PersistMsg::Immediate(ack)) => {
                deadline = None;
                let result = match inner.upgrade() {
                    Some(engine) => {
                        let result = write_snapshot(&engine).await;
                        sleep(engine.config.immediate_flush_settle).await;
                        result
                    }
                    None => break,
                };
                let _ = ack.send(result);
            }
        }
    }
}

async fn flush(inner: &Weak<EngineInner>) {
    let Some(engine) = inner.upgrade() else { return };
    if let Err(err) = write_snapshot(&engine).await {
        error!(error = %err.display_chain(), "debounced persist failed");
    }
}

/// Writes the snapshot and stamp to every layer. The primary layer's result
/// is authoritative; cache and sync failures are logged and absorbed, and
/// blobs over the per-entry cap skip the sync layer.
async fn write_snapshot(engine: &EngineInner) -> Result<(), StoreError> {
    let saved_at = clock::now();
    let snapshot = engine.capture_snapshot(saved_at);
    let tier = engine.state.lock().policy.tier();
    let stamp = Stamp {
        version: crate::snapshot::SNAPSHOT_VERSION,
        saved_at,
        tier,
    };

    let snapshot_bytes = encode(&snapshot)?;
    let stamp_bytes = encode(&stamp)?;
    let store = &engine.hooks.store;

    store
        .persist(Layer::Primary, BlobKind::Snapshot, &snapshot_bytes)
        .await?;
    store
        .persist(Layer::Primary, BlobKind::Stamp, &stamp_bytes)
        .await?;

    for layer in [Layer::Cache, Layer::Sync] {
        if layer == Layer::Sync && snapshot_bytes.len() > SYNC_ENTRY_MAX_BYTES {
            debug!(
                size = snapshot_bytes.len(),
                "snapshot exceeds sync-layer entry cap; skipping sync layer"
            );
            continue;
        }
        if let Err(err) = store
            .persist(layer, BlobKind::Snapshot, &snapshot_bytes)
            .await
        {
            warn!(layer = %layer, error = %err.display_chain(), "layer write failed");
            continue;
        }
        if let Err(err) = store.persist(layer, BlobKind::Stamp, &stamp_bytes).await {
            warn!(layer = %layer, error = %err.display_chain(), "stamp write failed");
        }
    }

    trace!(bytes = snapshot_bytes.len(), "snapshot persisted");
    Ok(())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|err| StoreError::Corrupt(err.to_string()))
}

/// Outcome of a layered load.
pub(crate) struct Loaded {
    pub snapshot: Snapshot,
    pub stamp: Stamp,
    pub layer: Layer,
}

/// Reads all layers and adopts the newest by stamp timestamp, falling back
/// through older layers when a blob is missing or corrupt. Returns `None` on
/// first run (no layer holds a snapshot).
pub(crate) async fn load_layered(store: &dyn StateStore) -> Result<Option<Loaded>, StoreError> {
    let mut candidates: Vec<(OffsetDateTime, Layer, Option<Stamp>)> = Vec::new();
    let mut failures = 0usize;

    for layer in Layer::ALL {
        match store.load(layer, BlobKind::Stamp).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Stamp>(&bytes) {
                Ok(stamp) => candidates.push((stamp.saved_at, layer, Some(stamp))),
                Err(err) => {
                    warn!(layer = %layer, error = %err, "corrupt stamp; will try snapshot anyway");
                    candidates.push((OffsetDateTime::UNIX_EPOCH, layer, None));
                }
            },
            // No stamp; the snapshot may still exist after an interrupted
            // write, so keep the layer as a last-resort candidate.
            Ok(None) => candidates.push((OffsetDateTime::UNIX_EPOCH, layer, None)),
            Err(err) => {
                warn!(layer = %layer, error = %err.display_chain(), "stamp read failed");
                failures += 1;
            }
        }
    }

    // Every layer errored out: the store is unusable, not merely empty.
    if failures == Layer::ALL.len() {
        return Err(StoreError::Unavailable(Layer::Primary));
    }

    // Newest first; ties keep primary-cache-sync order.
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, layer, stamp) in candidates {
        match store.load(layer, BlobKind::Snapshot).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) => {
                    let stamp = stamp.unwrap_or(Stamp {
                        version: snapshot.version,
                        saved_at: snapshot.saved_at,
                        tier: Default::default(),
                    });
                    info!(layer = %layer, "snapshot loaded");
                    return Ok(Some(Loaded {
                        snapshot,
                        stamp,
                        layer,
                    }));
                }
                Err(err) => {
                    warn!(layer = %layer, error = %err, "corrupt snapshot; trying next layer");
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(layer = %layer, error = %err.display_chain(), "snapshot read failed");
            }
        }
    }

    Ok(None)
}
