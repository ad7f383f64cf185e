//! Persisted snapshot shapes.
//!
//! Two blobs make up persisted state: the full [`Snapshot`] and a small
//! [`Stamp`] recording version and source-of-truth timestamp. The stamp is
//! written to every layer and read first at load time, so the newest layer
//! can be picked without deserializing every snapshot.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use seshmux_core::IdentityId;

use crate::{
    binding::TabId,
    color::Color,
    jar::Jar,
    policy::Tier,
    registry::{Identity, PersistedTab, Registry},
};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Identity metadata as persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityMeta {
    pub id: IdentityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub color: Color,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub last_accessed_at: OffsetDateTime,
}

/// One identity's persisted state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub meta: IdentityMeta,
    #[serde(default)]
    pub persisted_tabs: Vec<PersistedTab>,
    #[serde(default)]
    pub jar: Jar,
}

impl From<&Identity> for IdentityRecord {
    fn from(identity: &Identity) -> Self {
        IdentityRecord {
            meta: IdentityMeta {
                id: identity.id,
                name: identity.name.clone(),
                color: identity.color,
                created_at: identity.created_at,
                last_accessed_at: identity.last_accessed_at,
            },
            persisted_tabs: identity.persisted_tabs.clone(),
            jar: identity.jar.clone(),
        }
    }
}

impl IdentityRecord {
    /// Rebuilds a runtime identity. Tab bindings are runtime state and start
    /// empty; reattachment re-establishes them.
    #[must_use]
    pub fn into_identity(self) -> Identity {
        Identity {
            id: self.meta.id,
            name: self.meta.name,
            color: self.meta.color,
            created_at: self.meta.created_at,
            last_accessed_at: self.meta.last_accessed_at,
            tabs: Default::default(),
            persisted_tabs: self.persisted_tabs,
            jar: self.jar,
        }
    }
}

/// Last-known URL and binding of a tab, keyed by the (now stale) tab handle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TabRecord {
    pub url: String,
    pub identity: IdentityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// The full persisted state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    pub identities: BTreeMap<IdentityId, IdentityRecord>,
    #[serde(default)]
    pub tab_metadata: HashMap<TabId, TabRecord>,
    #[serde(with = "time::serde::timestamp")]
    pub saved_at: OffsetDateTime,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Snapshot {
    /// Captures the registry and current tab bindings.
    #[must_use]
    pub fn capture(
        registry: &Registry,
        tab_metadata: HashMap<TabId, TabRecord>,
        saved_at: OffsetDateTime,
    ) -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION,
            identities: registry
                .iter()
                .map(|identity| (identity.id, IdentityRecord::from(identity)))
                .collect(),
            tab_metadata,
            saved_at,
        }
    }

    /// Rebuilds a registry; every restored identity starts dormant.
    #[must_use]
    pub fn into_registry(self) -> (Registry, HashMap<TabId, TabRecord>) {
        let mut registry = Registry::new();
        for (_, record) in self.identities {
            registry.insert(record.into_identity());
        }
        (registry, self.tab_metadata)
    }
}

/// The small cross-layer record used to pick the newest layer at load time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(with = "time::serde::timestamp")]
    pub saved_at: OffsetDateTime,
    /// Last tier seen, kept so policy has a stale-offline starting point.
    #[serde(default)]
    pub tier: Tier,
}

#[cfg(test)]
mod test {
    use crate::policy::{FeatureSet, Policy};

    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[test]
    fn snapshot_round_trips_registry() {
        let policy = Policy::new(Tier::Pro, FeatureSet::default());
        let mut registry = Registry::new();
        let id = registry.create(&policy, None, now()).unwrap();
        registry.rename(id, Some("Work")).unwrap();
        registry
            .get_mut(id)
            .unwrap()
            .record_navigation(&url::Url::parse("https://a.test/x").unwrap(), None, now());

        let mut tabs = HashMap::new();
        tabs.insert(
            TabId(3),
            TabRecord {
                url: "https://a.test/x".to_owned(),
                identity: id,
                title: None,
            },
        );

        let snapshot = Snapshot::capture(&registry, tabs, now());
        let json = serde_json::to_vec(&snapshot).unwrap();
        let parsed: Snapshot = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed, snapshot);

        let (restored, tab_metadata) = parsed.into_registry();
        let identity = restored.get(id).unwrap();
        assert_eq!(identity.name.as_deref(), Some("Work"));
        assert_eq!(identity.persisted_tabs.len(), 1);
        assert!(identity.is_dormant());
        assert_eq!(tab_metadata[&TabId(3)].identity, id);
    }

    #[test]
    fn stamp_round_trips() {
        let stamp = Stamp {
            version: SNAPSHOT_VERSION,
            saved_at: now(),
            tier: Tier::Plus,
        };
        let json = serde_json::to_vec(&stamp).unwrap();
        let parsed: Stamp = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed, stamp);
    }
}
