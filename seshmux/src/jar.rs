//! The per-identity cookie jar.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use seshmux_core::{cookie::StoredCookie, scope, HostClass};

type NameMap = BTreeMap<String, StoredCookie>;
type PathMap = BTreeMap<String, NameMap>;

/// Hierarchical cookie store for one identity: domain → path → name.
///
/// Matching walks the request host's dotted-suffix chain, but only while the
/// current suffix is a valid cookie scope. It stops at the first bare public
/// suffix, so a cookie smuggled in at `com` can never match `anything.com`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jar {
    domains: BTreeMap<String, PathMap>,
}

impl Jar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `cookie`, replacing any existing cookie with the same
    /// `(domain, path, name)` key. A cookie whose expiration is already past
    /// is rejected silently; returns whether the cookie was stored.
    pub fn insert(&mut self, cookie: StoredCookie, now: OffsetDateTime) -> bool {
        if cookie.expiry.is_expired_at(now) {
            return false;
        }
        self.domains
            .entry(cookie.domain.clone())
            .or_default()
            .entry(cookie.path.clone())
            .or_default()
            .insert(cookie.name.clone(), cookie);
        true
    }

    /// Returns the non-expired cookies matching a request to `(host, path)`,
    /// in stored order.
    #[must_use]
    pub fn match_cookies(
        &self,
        host: &str,
        path: &str,
        now: OffsetDateTime,
    ) -> Vec<&StoredCookie> {
        let host = host.to_ascii_lowercase();
        let mut out = Vec::new();

        for domain in scope_chain(&host) {
            if !scope::is_valid_cookie_scope(domain) {
                break;
            }
            if let Some(paths) = self.domains.get(domain) {
                for (cookie_path, names) in paths {
                    if path_matches(path, cookie_path) {
                        out.extend(
                            names.values().filter(|c| !c.expiry.is_expired_at(now)),
                        );
                    }
                }
            }
        }

        out
    }

    /// Removes every expired cookie, collapsing emptied path and domain maps.
    /// Returns how many cookies were removed.
    pub fn sweep(&mut self, now: OffsetDateTime) -> usize {
        let mut removed = 0;
        self.domains.retain(|_, paths| {
            paths.retain(|_, names| {
                names.retain(|_, cookie| {
                    let keep = !cookie.expiry.is_expired_at(now);
                    if !keep {
                        removed += 1;
                    }
                    keep
                });
                !names.is_empty()
            });
            !paths.is_empty()
        });
        removed
    }

    pub fn clear(&mut self) {
        self.domains.clear();
    }

    /// Total number of stored cookies, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Iterates over every stored cookie.
    pub fn iter(&self) -> impl Iterator<Item = &StoredCookie> {
        self.domains
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
    }
}

/// The dotted-suffix chain of `host`, starting at `host` itself.
///
/// IP literals and `localhost` have no chain: a cookie scoped to `0.0.1`
/// must not match a request to `127.0.0.1`.
fn scope_chain(host: &str) -> impl Iterator<Item = &str> {
    let walkable = !matches!(
        scope::classify(host),
        HostClass::IpAddress | HostClass::MalformedIp | HostClass::Localhost
    );
    std::iter::successors(Some(host), move |current| {
        if !walkable {
            return None;
        }
        current.split_once('.').map(|(_, rest)| rest)
    })
}

/// RFC 6265 path matching: equality, or prefix with a `/` boundary.
fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/')
                || request_path[cookie_path.len()..].starts_with('/')))
}
