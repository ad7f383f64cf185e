//! The `StateStore` trait (and related items).
//!
//! A `StateStore` is the durable side of the persistence layer: an addressed
//! collection of opaque blobs, one address per `(Layer, BlobKind)` pair. The
//! engine is the sole writer; stores never interpret blob contents.
//!
//! # Implementing `StateStore`
//!
//! `StateStore` is sealed with the `StateStoreImpl` trait. To implement
//! `StateStore`, implement `StateStoreImpl` too:
//!
//! ```
//! use async_trait::async_trait;
//! use seshmux_core::store::{BlobKind, Layer, StateStoreImpl, StoreError};
//! use seshmux_core::StateStore;
//!
//! struct StoreImpl {
//!     /* ... */
//! }
//!
//! impl StateStore for StoreImpl {}
//!
//! #[async_trait]
//! impl StateStoreImpl for StoreImpl {
//!     /* ... */
//! # async fn persist(&self, layer: Layer, blob: BlobKind, bytes: &[u8]) -> Result<(), StoreError> { todo!() }
//! # async fn load(&self, layer: Layer, blob: BlobKind) -> Result<Option<Vec<u8>>, StoreError> { todo!() }
//! # async fn clear(&self, layer: Layer) -> Result<(), StoreError> { todo!() }
//! }
//! ```

use std::{error::Error as StdError, fmt};

use async_trait::async_trait;

/// One of the layered durable stores backing a persistence snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Large-quota transactional store; the source of truth.
    Primary,
    /// Fast flat store used for quick-path reads.
    Cache,
    /// Cross-device sync store with per-entry size limits.
    Sync,
}

impl Layer {
    /// All layers, in write order.
    pub const ALL: [Layer; 3] = [Layer::Primary, Layer::Cache, Layer::Sync];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Primary => "primary",
            Layer::Cache => "cache",
            Layer::Sync => "sync",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The blobs a store addresses within each layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlobKind {
    /// The full serialized snapshot.
    Snapshot,
    /// The small version-and-timestamp record used to pick the newest layer.
    Stamp,
}

impl BlobKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BlobKind::Snapshot => "snapshot",
            BlobKind::Stamp => "stamp",
        }
    }
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bound on a single entry written to [`Layer::Sync`]. Larger blobs
/// skip the sync layer entirely.
pub const SYNC_ENTRY_MAX_BYTES: usize = 8 * 1024;

/// Backing storage for persistence snapshots.
///
/// This trait is sealed and intended to be opaque. The details of this trait
/// are open to change across non-major version bumps; as such, depending on
/// them may cause breakage.
pub trait StateStore: 'static + Send + Sync + StateStoreImpl {}

/// The contents of this trait are meant to be kept private and __not__
/// part of `StateStore`'s public API. The details will change over time.
#[doc(hidden)]
#[async_trait]
pub trait StateStoreImpl: 'static + Send + Sync {
    async fn persist(
        &self,
        layer: Layer,
        blob: BlobKind,
        bytes: &[u8],
    ) -> Result<(), StoreError>;

    async fn load(&self, layer: Layer, blob: BlobKind) -> Result<Option<Vec<u8>>, StoreError>;

    async fn clear(&self, layer: Layer) -> Result<(), StoreError>;
}

/// The error type returned by [`StateStore`] operations.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Corrupt(String),
    TooLarge {
        layer: Layer,
        size: usize,
        limit: usize,
    },
    Unavailable(Layer),
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(_) => f.write_str("store i/o failed"),
            StoreError::Corrupt(what) => write!(f, "stored blob is corrupt: {what}"),
            StoreError::TooLarge { layer, size, limit } => {
                write!(f, "blob of {size} bytes exceeds the {layer} layer limit of {limit}")
            }
            StoreError::Unavailable(layer) => write!(f, "{layer} layer is unavailable"),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        StoreError::Io(value)
    }
}

#[cfg(all(not(docsrs), test))]
#[test]
fn dyn_compatible() {
    use std::sync::Arc;

    const _: fn() = || {
        let _dyn_store: Arc<dyn StateStore> = todo!();
    };
}
