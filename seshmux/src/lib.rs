#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Per-identity cookie and storage isolation for embedding browser hosts.
//!
//! `seshmux` lets several concurrent *identities* (independent sets of
//! credentials and per-origin state) share one browsing surface without
//! leaking cookies or key/value storage across each other. A tab is bound to
//! exactly one identity; requests from that tab carry only that identity's
//! cookies, `Set-Cookie` responses land in that identity's jar instead of the
//! host's global cookie store, and page scripts see only that identity's
//! cookie string and storage keys.
//!
//! The host supplies the transport and browser surface (tab events, HTTP
//! hooks, global cookie store access, durable blob storage); the [`Engine`]
//! owns all identity state behind a single lock and drives the background
//! work: debounced persistence, restart reattachment, native-store scrubbing,
//! expiration sweeps, and tier-driven cleanup.

#[doc(inline)]
pub use engine::{Engine, EngineBuilder};
#[doc(inline)]
pub use init::InitState;
#[doc(inline)]
pub use intercept::{InterceptLayer, TabHandle};
#[doc(inline)]
pub use seshmux_core::IdentityId;

#[macro_use]
mod macros;

pub mod binding;
pub mod color;
pub mod config;
pub mod engine;
pub mod export;
pub mod host;
pub mod init;
pub mod intercept;
pub mod jar;
pub mod namespace;
pub mod persist;
pub mod policy;
pub mod reattach;
pub mod registry;
pub mod scrub;
pub mod shim;
pub mod snapshot;
#[cfg(feature = "memory-store")]
pub mod store;

mod util;
