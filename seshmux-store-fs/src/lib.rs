#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! The filesystem store for [`seshmux`].
//!
//! Lays the three persistence layers out under one base directory:
//!
//! * `primary/<blob>.json`: the source of truth, written atomically
//!   (temp file, then rename) so a reader never observes a partial blob;
//! * `cache-<blob>.json`: the fast flat layer, written directly;
//! * `sync/<blob>.json`: the size-capped layer a host may mirror across
//!   devices.
//!
//! [`seshmux`]: https://docs.rs/seshmux/latest/seshmux/

use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::fs;

use seshmux_core::{
    store::{BlobKind, Layer, StateStoreImpl, StoreError, SYNC_ENTRY_MAX_BYTES},
    StateStore,
};

/// A [`StateStore`] over a base directory.
#[derive(Clone, Debug)]
pub struct FsStore {
    config: Config,
}

#[derive(Clone, Debug)]
struct Config {
    base_dir: PathBuf,
    sync_entry_limit: usize,
}

impl FsStore {
    /// Opens (creating if needed) a store rooted at `base_dir`.
    pub fn open(base_dir: impl Into<PathBuf>) -> io::Result<FsStore> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(base_dir.join("primary"))?;
        std::fs::create_dir_all(base_dir.join("sync"))?;
        Ok(FsStore {
            config: Config {
                base_dir,
                sync_entry_limit: SYNC_ENTRY_MAX_BYTES,
            },
        })
    }

    /// Overrides the sync-layer per-entry byte cap.
    #[must_use]
    pub fn with_sync_entry_limit(mut self, limit: usize) -> Self {
        self.config.sync_entry_limit = limit;
        self
    }

    fn path_for(&self, layer: Layer, blob: BlobKind) -> PathBuf {
        let base = &self.config.base_dir;
        match layer {
            Layer::Primary => base.join("primary").join(format!("{blob}.json")),
            Layer::Cache => base.join(format!("cache-{blob}.json")),
            Layer::Sync => base.join("sync").join(format!("{blob}.json")),
        }
    }
}

impl StateStore for FsStore {}

#[async_trait]
impl StateStoreImpl for FsStore {
    async fn persist(
        &self,
        layer: Layer,
        blob: BlobKind,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        if layer == Layer::Sync && bytes.len() > self.config.sync_entry_limit {
            return Err(StoreError::TooLarge {
                layer,
                size: bytes.len(),
                limit: self.config.sync_entry_limit,
            });
        }

        let path = self.path_for(layer, blob);
        match layer {
            // The source of truth is written atomically: temp file in the
            // same directory, then rename.
            Layer::Primary => write_atomic(&path, bytes).await?,
            Layer::Cache | Layer::Sync => fs::write(&path, bytes).await?,
        }
        Ok(())
    }

    async fn load(&self, layer: Layer, blob: BlobKind) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(layer, blob)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn clear(&self, layer: Layer) -> Result<(), StoreError> {
        for blob in [BlobKind::Snapshot, BlobKind::Stamp] {
            match fs::remove_file(self.path_for(layer, blob)).await {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await
}
