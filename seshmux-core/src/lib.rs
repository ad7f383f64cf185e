#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core components for `seshmux` and related crates: the identity key, the
//! cookie model and `Set-Cookie` parser, the cookie-scope classifier, and the
//! layered blob-store abstraction.

#[doc(inline)]
pub use crate::cookie::{Expiry, SameSite, StoredCookie};
#[doc(inline)]
pub use crate::key::IdentityId;
#[doc(inline)]
pub use crate::scope::{classify, is_valid_cookie_scope, HostClass};
#[doc(inline)]
pub use crate::store::{BlobKind, Layer, StateStore, StoreError};

mod macros;

pub mod cookie;
pub mod key;
pub mod scope;
pub mod store;
pub mod time;
pub mod util;

#[doc(hidden)]
pub mod __private {
    #[cfg(feature = "tracing")]
    pub use tracing;
}
