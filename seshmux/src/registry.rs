//! The identity registry.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use unicode_segmentation::UnicodeSegmentation;
use url::Url;

use seshmux_core::IdentityId;

use crate::{binding::TabId, color::Color, jar::Jar, policy::Policy, util};

/// Maximum identity-name length, in grapheme clusters.
pub const NAME_MAX_GRAPHEMES: usize = 50;

/// Maximum number of persisted-tab records kept per identity.
pub const PERSISTED_TABS_MAX: usize = 50;

/// A navigation record captured for post-restart reattachment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedTab {
    pub url: String,
    pub domain: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(with = "time::serde::timestamp")]
    pub saved_at: OffsetDateTime,
}

/// A persistent, named collection of per-origin HTTP state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub color: Color,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub last_accessed_at: OffsetDateTime,
    /// Currently-bound tabs. Runtime state: not persisted, rebuilt by
    /// reattachment.
    #[serde(skip)]
    pub tabs: HashSet<TabId>,
    #[serde(default)]
    pub persisted_tabs: Vec<PersistedTab>,
    #[serde(default)]
    pub jar: Jar,
}

impl Identity {
    /// An identity with no bound tabs is dormant; it persists either way.
    #[must_use]
    pub fn is_dormant(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Records a navigation for reattachment, updating in place on a
    /// `(domain, path)` it already holds and evicting the oldest record past
    /// the cap.
    pub fn record_navigation(
        &mut self,
        url: &Url,
        title: Option<&str>,
        now: OffsetDateTime,
    ) {
        let Some((domain, path)) = util::http_host_path(url) else {
            return;
        };

        if let Some(existing) = self
            .persisted_tabs
            .iter_mut()
            .find(|t| t.domain == domain && t.path == path)
        {
            existing.url = url.to_string();
            existing.title = title.map(str::to_owned);
            existing.saved_at = now;
            return;
        }

        if self.persisted_tabs.len() >= PERSISTED_TABS_MAX {
            if let Some(oldest) = self
                .persisted_tabs
                .iter()
                .enumerate()
                .min_by_key(|(_, t)| t.saved_at)
                .map(|(i, _)| i)
            {
                self.persisted_tabs.remove(oldest);
            }
        }

        self.persisted_tabs.push(PersistedTab {
            url: url.to_string(),
            domain,
            path,
            title: title.map(str::to_owned),
            saved_at: now,
        });
    }
}

/// A listing entry for the UI.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IdentitySummary {
    pub id: IdentityId,
    pub name: Option<String>,
    pub color: Color,
    pub tab_count: usize,
    #[serde(with = "time::serde::timestamp")]
    pub last_accessed_at: OffsetDateTime,
}

/// Identities listed by lifecycle state.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Enumeration {
    pub active: Vec<IdentitySummary>,
    pub dormant: Vec<IdentitySummary>,
}

/// The error type returned when identity creation is refused.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("identity limit for the current tier reached ({limit})")]
    LimitReached { limit: usize },
    #[error("color is not available on the current tier")]
    ColorNotAllowed,
}

/// The error type returned when a rename is refused. No state is mutated on
/// refusal.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RenameError {
    #[error("unknown identity")]
    UnknownIdentity,
    #[error("name is empty after sanitization")]
    Empty,
    #[error("name exceeds {NAME_MAX_GRAPHEMES} characters ({graphemes})")]
    TooLong { graphemes: usize },
    #[error("another identity already uses this name")]
    Duplicate,
}

/// The error type returned when a recolor is refused.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecolorError {
    #[error("unknown identity")]
    UnknownIdentity,
    #[error("color is not available on the current tier")]
    ColorNotAllowed,
}

/// The in-memory registry of all identities, active and dormant. Iteration
/// order is creation order, since identity ids sort chronologically.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    identities: BTreeMap<IdentityId, Identity>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an identity, consulting `policy` for admission and color
    /// eligibility. Without a requested color, one is picked from the tier
    /// palette round-robin.
    pub fn create(
        &mut self,
        policy: &Policy,
        color: Option<Color>,
        now: OffsetDateTime,
    ) -> Result<IdentityId, CreateError> {
        if let Some(limit) = policy.max_concurrent_identities() {
            if self.identities.len() >= limit {
                return Err(CreateError::LimitReached { limit });
            }
        }

        let color = match color {
            Some(color) if policy.allows_color(color) => color,
            Some(_) => return Err(CreateError::ColorNotAllowed),
            None => {
                let palette = policy.palette();
                palette[self.identities.len() % palette.len()]
            }
        };

        let id = IdentityId::generate();
        self.identities.insert(
            id,
            Identity {
                id,
                name: None,
                color,
                created_at: now,
                last_accessed_at: now,
                tabs: HashSet::new(),
                persisted_tabs: Vec::new(),
                jar: Jar::new(),
            },
        );
        info!(identity = %id, "identity created");
        Ok(id)
    }

    /// Renames an identity. `None` or the empty string clears the name; any
    /// other input is sanitized and validated. Names are unique under case
    /// folding across all identities.
    pub fn rename(&mut self, id: IdentityId, name: Option<&str>) -> Result<(), RenameError> {
        if !self.identities.contains_key(&id) {
            return Err(RenameError::UnknownIdentity);
        }

        let sanitized = match name {
            None | Some("") => None,
            Some(raw) => {
                let cleaned = sanitize_name(raw);
                if cleaned.is_empty() {
                    return Err(RenameError::Empty);
                }
                let graphemes = cleaned.graphemes(true).count();
                if graphemes > NAME_MAX_GRAPHEMES {
                    return Err(RenameError::TooLong { graphemes });
                }
                if self.is_name_taken(&cleaned, Some(id)) {
                    return Err(RenameError::Duplicate);
                }
                Some(cleaned)
            }
        };

        // contains_key above guarantees presence
        if let Some(identity) = self.identities.get_mut(&id) {
            identity.name = sanitized;
        }
        Ok(())
    }

    pub fn recolor(
        &mut self,
        policy: &Policy,
        id: IdentityId,
        color: Color,
    ) -> Result<(), RecolorError> {
        if !policy.allows_color(color) {
            return Err(RecolorError::ColorNotAllowed);
        }
        let identity = self
            .identities
            .get_mut(&id)
            .ok_or(RecolorError::UnknownIdentity)?;
        identity.color = color;
        Ok(())
    }

    /// Whether `name` is already in use under case folding, optionally
    /// excluding one identity (the one being renamed).
    #[must_use]
    pub fn is_name_taken(&self, name: &str, excluding: Option<IdentityId>) -> bool {
        let folded = name.to_lowercase();
        self.identities
            .values()
            .filter(|identity| Some(identity.id) != excluding)
            .filter_map(|identity| identity.name.as_deref())
            .any(|existing| existing.to_lowercase() == folded)
    }

    pub fn bind_tab(&mut self, id: IdentityId, tab: TabId, now: OffsetDateTime) -> bool {
        match self.identities.get_mut(&id) {
            Some(identity) => {
                identity.tabs.insert(tab);
                identity.last_accessed_at = now;
                true
            }
            None => false,
        }
    }

    /// Detaches `tab` from `id`. Returns whether the identity just became
    /// dormant.
    pub fn unbind_tab(&mut self, id: IdentityId, tab: TabId) -> bool {
        match self.identities.get_mut(&id) {
            Some(identity) => {
                identity.tabs.remove(&tab);
                identity.tabs.is_empty()
            }
            None => false,
        }
    }

    pub fn touch(&mut self, id: IdentityId, now: OffsetDateTime) {
        if let Some(identity) = self.identities.get_mut(&id) {
            identity.last_accessed_at = now;
        }
    }

    #[must_use]
    pub fn get(&self, id: IdentityId) -> Option<&Identity> {
        self.identities.get(&id)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: IdentityId) -> Option<&mut Identity> {
        self.identities.get_mut(&id)
    }

    pub fn insert(&mut self, identity: Identity) {
        self.identities.insert(identity.id, identity);
    }

    pub fn delete(&mut self, id: IdentityId) -> Option<Identity> {
        let removed = self.identities.remove(&id);
        if removed.is_some() {
            info!(identity = %id, "identity deleted");
        }
        removed
    }

    #[must_use]
    pub fn enumerate(&self) -> Enumeration {
        let mut listing = Enumeration::default();
        for identity in self.identities.values() {
            let summary = IdentitySummary {
                id: identity.id,
                name: identity.name.clone(),
                color: identity.color,
                tab_count: identity.tabs.len(),
                last_accessed_at: identity.last_accessed_at,
            };
            if identity.is_dormant() {
                listing.dormant.push(summary);
            } else {
                listing.active.push(summary);
            }
        }
        listing
    }

    #[must_use]
    pub fn dormant_ids(&self) -> Vec<IdentityId> {
        self.identities
            .values()
            .filter(|identity| identity.is_dormant())
            .map(|identity| identity.id)
            .collect()
    }

    /// Dormant identities whose `last_accessed_at` is older than `ttl` as of
    /// `now`.
    #[must_use]
    pub fn expired_dormant_ids(
        &self,
        now: OffsetDateTime,
        ttl: std::time::Duration,
    ) -> Vec<IdentityId> {
        let window = seshmux_core::time::to_time_duration(ttl);
        self.identities
            .values()
            .filter(|identity| identity.is_dormant())
            .filter(|identity| now - identity.last_accessed_at > window)
            .map(|identity| identity.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: IdentityId) -> bool {
        self.identities.contains_key(&id)
    }
}

/// Strips HTML-unsafe characters, collapses whitespace runs, and trims.
#[must_use]
pub fn sanitize_name(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '`'))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod test {
    use crate::policy::{FeatureSet, Tier};

    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn basic() -> Policy {
        Policy::new(Tier::Basic, FeatureSet::default())
    }

    fn plus() -> Policy {
        Policy::new(Tier::Plus, FeatureSet::default())
    }

    #[test]
    fn create_respects_tier_limit() {
        let mut registry = Registry::new();
        for _ in 0..3 {
            registry.create(&basic(), None, now()).unwrap();
        }
        assert!(matches!(
            registry.create(&basic(), None, now()),
            Err(CreateError::LimitReached { limit: 3 })
        ));
        // A higher tier is not capped.
        registry.create(&plus(), None, now()).unwrap();
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn create_ids_sort_by_creation() {
        let mut registry = Registry::new();
        let a = registry.create(&plus(), None, now()).unwrap();
        let b = registry.create(&plus(), None, now()).unwrap();
        assert!(a < b);
        let ids: Vec<IdentityId> = registry.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn create_refuses_off_palette_color() {
        let mut registry = Registry::new();
        assert!(matches!(
            registry.create(&basic(), Some(Color::rgb(1, 2, 3)), now()),
            Err(CreateError::ColorNotAllowed)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn sanitize_strips_and_collapses() {
        assert_eq!(sanitize_name("  Work   <b>\"stuff\"</b>  "), "Work bstuff/b");
        assert_eq!(sanitize_name("a\t\n b"), "a b");
        assert_eq!(sanitize_name("<>'\"`"), "");
    }

    #[test]
    fn rename_validates_and_clears() {
        let mut registry = Registry::new();
        let id = registry.create(&plus(), None, now()).unwrap();

        registry.rename(id, Some("Work")).unwrap();
        assert_eq!(registry.get(id).unwrap().name.as_deref(), Some("Work"));

        // The empty string clears the name.
        registry.rename(id, Some("")).unwrap();
        assert_eq!(registry.get(id).unwrap().name, None);

        // Whitespace-only input is a refusal, not a clear.
        assert_eq!(registry.rename(id, Some("   ")), Err(RenameError::Empty));
    }

    #[test]
    fn rename_enforces_grapheme_limit() {
        let mut registry = Registry::new();
        let id = registry.create(&plus(), None, now()).unwrap();

        let exactly_50 = "é".repeat(NAME_MAX_GRAPHEMES);
        registry.rename(id, Some(&exactly_50)).unwrap();

        let too_long = "é".repeat(NAME_MAX_GRAPHEMES + 1);
        assert_eq!(
            registry.rename(id, Some(&too_long)),
            Err(RenameError::TooLong {
                graphemes: NAME_MAX_GRAPHEMES + 1
            })
        );
    }

    #[test]
    fn rename_refuses_case_insensitive_duplicates() {
        let mut registry = Registry::new();
        let a = registry.create(&plus(), None, now()).unwrap();
        let b = registry.create(&plus(), None, now()).unwrap();

        registry.rename(a, Some("Work")).unwrap();
        assert_eq!(registry.rename(b, Some("wORK")), Err(RenameError::Duplicate));
        // Renaming an identity to its own name is fine.
        registry.rename(a, Some("WORK")).unwrap();
    }

    #[test]
    fn unbind_reports_dormancy() {
        let mut registry = Registry::new();
        let id = registry.create(&plus(), None, now()).unwrap();
        registry.bind_tab(id, TabId(1), now());
        registry.bind_tab(id, TabId(2), now());

        assert!(!registry.unbind_tab(id, TabId(1)));
        assert!(registry.unbind_tab(id, TabId(2)));
        assert!(registry.get(id).unwrap().is_dormant());
    }

    #[test]
    fn enumerate_splits_by_lifecycle() {
        let mut registry = Registry::new();
        let active = registry.create(&plus(), None, now()).unwrap();
        let dormant = registry.create(&plus(), None, now()).unwrap();
        registry.bind_tab(active, TabId(1), now());

        let listing = registry.enumerate();
        assert_eq!(listing.active.len(), 1);
        assert_eq!(listing.active[0].id, active);
        assert_eq!(listing.dormant.len(), 1);
        assert_eq!(listing.dormant[0].id, dormant);
    }

    #[test]
    fn expired_dormant_selection() {
        let mut registry = Registry::new();
        let stale = registry.create(&plus(), None, now()).unwrap();
        let fresh = registry.create(&plus(), None, now()).unwrap();
        let active = registry.create(&plus(), None, now()).unwrap();
        registry.bind_tab(active, TabId(1), now());

        let eight_days = time::Duration::days(8);
        registry.get_mut(stale).unwrap().last_accessed_at = now() - eight_days;
        registry.get_mut(active).unwrap().last_accessed_at = now() - eight_days;

        let ttl = std::time::Duration::from_secs(7 * 24 * 60 * 60);
        let expired = registry.expired_dormant_ids(now(), ttl);
        assert_eq!(expired, vec![stale]);
        assert!(!expired.contains(&fresh));
    }

    #[test]
    fn navigation_records_cap_and_update_in_place() {
        let mut registry = Registry::new();
        let id = registry.create(&plus(), None, now()).unwrap();
        let identity = registry.get_mut(id).unwrap();

        for i in 0..PERSISTED_TABS_MAX {
            let url = Url::parse(&format!("https://site{i}.test/page")).unwrap();
            identity.record_navigation(&url, None, now() + time::Duration::seconds(i as i64));
        }
        assert_eq!(identity.persisted_tabs.len(), PERSISTED_TABS_MAX);

        // Same (domain, path) updates in place.
        let url = Url::parse("https://site0.test/page?q=2").unwrap();
        identity.record_navigation(&url, Some("t"), now() + time::Duration::seconds(100));
        assert_eq!(identity.persisted_tabs.len(), PERSISTED_TABS_MAX);

        // A new site evicts the oldest record.
        let url = Url::parse("https://brand-new.test/").unwrap();
        identity.record_navigation(&url, None, now() + time::Duration::seconds(101));
        assert_eq!(identity.persisted_tabs.len(), PERSISTED_TABS_MAX);
        assert!(identity
            .persisted_tabs
            .iter()
            .any(|t| t.domain == "brand-new.test"));
        assert!(!identity.persisted_tabs.iter().any(|t| t.domain == "site1.test"));
    }

    #[test]
    fn internal_urls_are_not_recorded() {
        let mut registry = Registry::new();
        let id = registry.create(&plus(), None, now()).unwrap();
        let identity = registry.get_mut(id).unwrap();
        identity.record_navigation(&Url::parse("about:blank").unwrap(), None, now());
        assert!(identity.persisted_tabs.is_empty());
    }
}
