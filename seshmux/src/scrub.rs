//! Native cookie-store scrubbing and jar sweeping.
//!
//! The host's global cookie store is adversarial: cookies for hosts being
//! browsed under an identity must not accumulate there. The scrubber lists
//! and deletes them on a short tick; observed writes are additionally
//! captured into the owning identity's jar before removal. Jar expiration is
//! handled separately by the periodic sweep; the scrubber never mutates
//! jars beyond capture.

use std::collections::BTreeSet;

use time::OffsetDateTime;
use tokio::time::sleep;

use seshmux_core::time as clock;

use crate::{engine::Engine, host::NativeCookie, util::ErrorExt};

impl Engine {
    /// One scrub pass: for every host a session-bound tab is currently on,
    /// delete that host's cookies from the global store. A failed removal is
    /// retried once after a short delay, then logged and left for the next
    /// tick.
    pub(crate) async fn scrub_tick(&self) {
        if !self.is_ready() {
            return;
        }

        let hosts: BTreeSet<String> = {
            let state = self.inner.state.lock();
            state
                .bindings
                .iter()
                .filter_map(|(tab, _)| state.tab_pages.get(&tab))
                .filter_map(|page| page.host.clone())
                .collect()
        };

        for host in hosts {
            let cookies = self.inner.hooks.cookies.cookies_for_host(&host).await;
            for cookie in cookies {
                self.remove_native_cookie(&host, &cookie.name).await;
            }
        }
    }

    /// Handles an observed write to the global cookie store. When the write
    /// is attributable to a session-bound tab (fresh trail activity, or a
    /// bound tab currently on the host), the cookie is captured into that
    /// identity's jar and then removed from the global store.
    pub async fn on_native_cookie_write(&self, host: &str, cookie: NativeCookie) {
        if !self.is_ready() {
            return;
        }
        let host = host.to_ascii_lowercase();
        let now = clock::now();

        let identity = {
            let state = self.inner.state.lock();
            state
                .trail
                .fresh_identity(&host, now, self.inner.config.trail_freshness)
                .or_else(|| {
                    state.bindings.iter().find_map(|(tab, identity)| {
                        state
                            .tab_pages
                            .get(&tab)
                            .filter(|page| page.host.as_deref() == Some(host.as_str()))
                            .map(|_| identity)
                    })
                })
        };
        let Some(identity) = identity else {
            // Not session traffic; the global store may keep it.
            return;
        };

        let name = cookie.name.clone();
        let stored = {
            let mut state = self.inner.state.lock();
            match state.registry.get_mut(identity) {
                Some(ident) => {
                    let stored = ident.jar.insert(cookie.into_stored(), now);
                    ident.last_accessed_at = now;
                    stored
                }
                None => false,
            }
        };
        if stored {
            debug!(identity = %identity, host, cookie = %name, "leaked cookie captured");
            self.inner.persist.debounced();
        }

        self.remove_native_cookie(&host, &name).await;
    }

    async fn remove_native_cookie(&self, host: &str, name: &str) {
        let store = &self.inner.hooks.cookies;
        if store.delete_cookie(host, name).await.is_ok() {
            return;
        }
        sleep(self.inner.config.scrub_retry_delay).await;
        if let Err(err) = store.delete_cookie(host, name).await {
            warn!(
                host,
                cookie = name,
                error = %err.display_chain(),
                "native cookie removal failed twice; leaving for next tick"
            );
        }
    }

    /// Sweeps expired cookies out of every identity's jar. Returns the
    /// number removed.
    pub(crate) fn sweep_all(&self, now: OffsetDateTime) -> usize {
        if !self.is_ready() {
            return 0;
        }
        let removed = {
            let mut state = self.inner.state.lock();
            let ids: Vec<_> = state.registry.iter().map(|identity| identity.id).collect();
            let mut removed = 0;
            for id in ids {
                if let Some(identity) = state.registry.get_mut(id) {
                    removed += identity.jar.sweep(now);
                }
            }
            removed
        };
        if removed > 0 {
            debug!(count = removed, "expired cookies swept");
            self.inner.persist.debounced();
        }
        removed
    }
}
