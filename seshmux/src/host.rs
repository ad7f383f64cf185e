//! Host capability traits the engine consumes.
//!
//! Each trait is one of the abstract operations the embedding host provides:
//! tab lifecycle, global cookie-store access, notifications, scheduled
//! wake-ups, and entitlement. The engine treats the host's global cookie
//! store as adversarial: it reads frequently, writes only to delete, and
//! never relies on it for state.

use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use seshmux_core::cookie::{Expiry, StoredCookie};

use crate::{
    binding::TabId,
    policy::{FeatureSet, Tier},
};

/// A tab as reported by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabInfo {
    pub id: TabId,
    pub url: Option<String>,
    pub title: Option<String>,
    pub opener: Option<TabId>,
}

/// A cookie as it appears in the host's global cookie store.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub expires: Option<OffsetDateTime>,
}

impl NativeCookie {
    /// Converts into a jar cookie, normalizing the domain.
    #[must_use]
    pub fn into_stored(self) -> StoredCookie {
        StoredCookie {
            name: self.name,
            value: self.value,
            domain: self
                .domain
                .trim_start_matches('.')
                .to_ascii_lowercase(),
            declared_domain: None,
            path: if self.path.starts_with('/') {
                self.path
            } else {
                "/".to_owned()
            },
            secure: self.secure,
            http_only: self.http_only,
            same_site: Default::default(),
            expiry: match self.expires {
                Some(instant) => Expiry::At(instant),
                None => Expiry::Session,
            },
        }
    }
}

/// The error type returned by fallible host operations.
#[derive(Debug, thiserror::Error)]
#[error("host operation failed: {0}")]
pub struct HostError(pub String);

/// Tab enumeration and creation.
#[async_trait]
pub trait TabHost: Send + Sync + 'static {
    async fn list_tabs(&self) -> Vec<TabInfo>;

    async fn open_tab(&self, url: Option<&str>) -> Result<TabInfo, HostError>;
}

/// Read/delete access to the host's global cookie store.
#[async_trait]
pub trait NativeCookieStore: Send + Sync + 'static {
    async fn cookies_for_host(&self, host: &str) -> Vec<NativeCookie>;

    async fn delete_cookie(&self, host: &str, name: &str) -> Result<(), HostError>;
}

/// One-shot user notifications.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, title: &str, text: &str);
}

/// Scheduled wake-up events, used by the eager-load mitigations.
pub trait AlarmScheduler: Send + Sync + 'static {
    fn schedule(&self, name: &str, after: Duration);
}

/// The entitlement surface. Offline grace and staleness are the host's
/// concern; a `Tier` is always yielded.
#[async_trait]
pub trait Entitlement: Send + Sync + 'static {
    async fn tier(&self) -> Tier;

    fn features(&self) -> FeatureSet {
        FeatureSet::default()
    }
}

/// A host with no tabs to report and no ability to open any.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTabs;

#[async_trait]
impl TabHost for NoTabs {
    async fn list_tabs(&self) -> Vec<TabInfo> {
        Vec::new()
    }

    async fn open_tab(&self, _url: Option<&str>) -> Result<TabInfo, HostError> {
        Err(HostError("host cannot open tabs".to_owned()))
    }
}

/// A host whose global cookie store is empty and accepts deletions.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoNativeCookies;

#[async_trait]
impl NativeCookieStore for NoNativeCookies {
    async fn cookies_for_host(&self, _host: &str) -> Vec<NativeCookie> {
        Vec::new()
    }

    async fn delete_cookie(&self, _host: &str, _name: &str) -> Result<(), HostError> {
        Ok(())
    }
}

/// Discards notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoNotifications;

impl Notifier for NoNotifications {
    fn notify(&self, _title: &str, _text: &str) {}
}

/// Discards alarms.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAlarms;

impl AlarmScheduler for NoAlarms {
    fn schedule(&self, _name: &str, _after: Duration) {}
}

/// A fixed entitlement, useful as a default and in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedEntitlement {
    pub tier: Tier,
    pub features: FeatureSet,
}

impl FixedEntitlement {
    #[must_use]
    pub fn new(tier: Tier) -> Self {
        FixedEntitlement {
            tier,
            features: FeatureSet::default(),
        }
    }
}

#[async_trait]
impl Entitlement for FixedEntitlement {
    async fn tier(&self) -> Tier {
        self.tier
    }

    fn features(&self) -> FeatureSet {
        self.features
    }
}
