//! Tab bindings and the domain activity trail.

use std::{collections::HashMap, fmt};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;
use url::Url;

use seshmux_core::{time::to_time_duration, IdentityId};

/// An opaque handle for a browsing surface, as issued by the host.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TabId({})", self.0)
    }
}

// Serialized as a string so tab ids can key JSON maps in snapshots.
impl Serialize for TabId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TabId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TabIdVisitor;

        impl de::Visitor<'_> for TabIdVisitor {
            type Value = TabId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a tab id as a string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map(TabId).map_err(de::Error::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(TabId(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                i64::try_from(v).map(TabId).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(TabIdVisitor)
    }
}

/// Tab-to-identity bindings. A bound tab keeps its identity until it closes;
/// re-binding an open tab is refused.
#[derive(Clone, Debug, Default)]
pub struct BindingMap {
    map: HashMap<TabId, IdentityId>,
}

/// The error type returned when binding an already-bound tab.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("tab is already bound to identity {0}")]
pub struct AlreadyBound(pub IdentityId);

impl BindingMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, tab: TabId, identity: IdentityId) -> Result<(), AlreadyBound> {
        match self.map.get(&tab) {
            Some(existing) if *existing != identity => Err(AlreadyBound(*existing)),
            _ => {
                self.map.insert(tab, identity);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get(&self, tab: TabId) -> Option<IdentityId> {
        self.map.get(&tab).copied()
    }

    pub fn remove(&mut self, tab: TabId) -> Option<IdentityId> {
        self.map.remove(&tab)
    }

    #[must_use]
    pub fn tabs_of(&self, identity: IdentityId) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self
            .map
            .iter()
            .filter(|(_, id)| **id == identity)
            .map(|(tab, _)| *tab)
            .collect();
        tabs.sort();
        tabs
    }

    pub fn remove_identity(&mut self, identity: IdentityId) {
        self.map.retain(|_, id| *id != identity);
    }

    pub fn iter(&self) -> impl Iterator<Item = (TabId, IdentityId)> + '_ {
        self.map.iter().map(|(tab, id)| (*tab, *id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
struct TrailEntry {
    identity: IdentityId,
    last_seen_at: OffsetDateTime,
}

const TRAIL_PRUNE_WATERMARK: usize = 128;

/// Recent per-host activity: which identity last touched a host, and when.
/// Entries older than the freshness window are ignored and pruned
/// opportunistically.
#[derive(Clone, Debug, Default)]
pub struct ActivityTrail {
    map: HashMap<String, TrailEntry>,
}

impl ActivityTrail {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        host: &str,
        identity: IdentityId,
        now: OffsetDateTime,
        freshness: std::time::Duration,
    ) {
        self.map.insert(
            host.to_ascii_lowercase(),
            TrailEntry {
                identity,
                last_seen_at: now,
            },
        );
        if self.map.len() > TRAIL_PRUNE_WATERMARK {
            self.prune(now, freshness);
        }
    }

    /// The identity that most recently touched `host`, if seen within the
    /// freshness window.
    #[must_use]
    pub fn fresh_identity(
        &self,
        host: &str,
        now: OffsetDateTime,
        freshness: std::time::Duration,
    ) -> Option<IdentityId> {
        let entry = self.map.get(&host.to_ascii_lowercase())?;
        (now - entry.last_seen_at <= to_time_duration(freshness)).then_some(entry.identity)
    }

    pub fn prune(&mut self, now: OffsetDateTime, freshness: std::time::Duration) {
        let window = to_time_duration(freshness);
        self.map.retain(|_, entry| now - entry.last_seen_at <= window);
    }

    pub fn forget_identity(&mut self, identity: IdentityId) {
        self.map.retain(|_, entry| entry.identity != identity);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Whether a freshly-opened tab is a user-initiated blank new tab. Such a
/// tab must receive no trail-based inheritance.
#[must_use]
pub fn is_blank_new_tab(url: Option<&str>) -> bool {
    let Some(url) = url else { return true };
    if url.is_empty() || url == "about:blank" {
        return true;
    }
    match Url::parse(url) {
        Ok(parsed) => {
            parsed.host_str() == Some("newtab")
                || parsed.path().trim_matches('/') == "newtab"
        }
        Err(_) => false,
    }
}

/// Applies the ordered inheritance rules for a newly-opened tab:
///
/// 1. a bound opener passes its identity on;
/// 2. otherwise a fresh activity-trail entry for the navigated URL's host
///    does, unless the tab is a blank new tab;
/// 3. otherwise there is no inheritance.
#[must_use]
pub fn inherit(
    bindings: &BindingMap,
    trail: &ActivityTrail,
    opener: Option<TabId>,
    navigated_url: Option<&str>,
    now: OffsetDateTime,
    freshness: std::time::Duration,
) -> Option<IdentityId> {
    if let Some(identity) = opener.and_then(|tab| bindings.get(tab)) {
        return Some(identity);
    }
    if is_blank_new_tab(navigated_url) {
        return None;
    }
    let host = Url::parse(navigated_url?).ok()?.host_str()?.to_ascii_lowercase();
    trail.fresh_identity(&host, now, freshness)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn id(seed: u16) -> IdentityId {
        IdentityId::from_parts(1_000, seed, 7)
    }

    const FRESHNESS: Duration = Duration::from_secs(30);

    #[test]
    fn bound_tab_cannot_be_rebound() {
        let mut bindings = BindingMap::new();
        bindings.bind(TabId(1), id(1)).unwrap();
        assert_eq!(
            bindings.bind(TabId(1), id(2)),
            Err(AlreadyBound(id(1)))
        );
        // Re-binding to the same identity is a no-op, not an error.
        bindings.bind(TabId(1), id(1)).unwrap();
    }

    #[test]
    fn opener_inheritance_wins() {
        let mut bindings = BindingMap::new();
        let mut trail = ActivityTrail::new();
        bindings.bind(TabId(1), id(1)).unwrap();
        trail.record("example.test", id(2), now(), FRESHNESS);

        let inherited = inherit(
            &bindings,
            &trail,
            Some(TabId(1)),
            Some("https://example.test/"),
            now(),
            FRESHNESS,
        );
        assert_eq!(inherited, Some(id(1)));
    }

    #[test]
    fn trail_inheritance_respects_freshness() {
        let bindings = BindingMap::new();
        let mut trail = ActivityTrail::new();
        trail.record("example.test", id(2), now(), FRESHNESS);

        let soon = now() + time::Duration::seconds(10);
        assert_eq!(
            inherit(&bindings, &trail, None, Some("https://example.test/x"), soon, FRESHNESS),
            Some(id(2))
        );

        let late = now() + time::Duration::seconds(31);
        assert_eq!(
            inherit(&bindings, &trail, None, Some("https://example.test/x"), late, FRESHNESS),
            None
        );
    }

    #[test]
    fn blank_new_tab_gets_no_trail_inheritance() {
        let bindings = BindingMap::new();
        let mut trail = ActivityTrail::new();
        trail.record("newtab", id(2), now(), FRESHNESS);

        for url in [None, Some(""), Some("about:blank"), Some("chrome://newtab")] {
            assert_eq!(
                inherit(&bindings, &trail, None, url, now(), FRESHNESS),
                None,
                "{url:?}"
            );
        }
    }

    #[test]
    fn blank_new_tab_still_inherits_from_opener() {
        let mut bindings = BindingMap::new();
        let trail = ActivityTrail::new();
        bindings.bind(TabId(1), id(1)).unwrap();
        assert_eq!(
            inherit(&bindings, &trail, Some(TabId(1)), Some("about:blank"), now(), FRESHNESS),
            Some(id(1))
        );
    }

    #[test]
    fn trail_prunes_past_watermark() {
        let mut trail = ActivityTrail::new();
        for i in 0..TRAIL_PRUNE_WATERMARK {
            trail.record(&format!("host{i}.test"), id(1), now(), FRESHNESS);
        }
        // One more, a minute later: all earlier entries are stale and pruned.
        let later = now() + time::Duration::seconds(60);
        trail.record("fresh.test", id(1), later, FRESHNESS);
        assert_eq!(trail.len(), 1);
    }

    #[test]
    fn tab_id_serde_accepts_strings_and_numbers() {
        let tab: TabId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(tab, TabId(42));
        let tab: TabId = serde_json::from_str("42").unwrap();
        assert_eq!(tab, TabId(42));
        assert_eq!(serde_json::to_string(&TabId(7)).unwrap(), "\"7\"");
    }
}
