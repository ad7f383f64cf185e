//! Restart reattachment.
//!
//! When the host starts up it may be about to re-present previously open
//! tabs, with fresh handles. Restored tabs are matched back to identities by
//! `(domain, path)` against each identity's persisted-tab records; query
//! strings and fragments are ignored by policy, so two tabs on the same page
//! that differ only in query may mis-match. The bounded waits here exist
//! because an empty tab list at startup means "not yet re-presented", not
//! "no tabs".

use time::OffsetDateTime;
use tokio::time::sleep;
use url::Url;

use seshmux_core::{time as clock, IdentityId};

use crate::{engine::Engine, host::TabInfo, util};

impl Engine {
    /// The bounded reattachment pass: waits for the host to re-present tabs
    /// (retrying an empty list), then binds each matching tab to the identity
    /// whose persisted record is the freshest match. Gated on the tier's
    /// auto-restore eligibility.
    pub(crate) async fn reattach(&self) {
        let config = &self.inner.config;

        sleep(config.reattach_initial_wait).await;

        let mut tabs: Vec<TabInfo> = Vec::new();
        for attempt in 0..config.reattach_attempts.max(1) {
            tabs = self.inner.hooks.tabs.list_tabs().await;
            if !tabs.is_empty() {
                break;
            }
            if attempt + 1 < config.reattach_attempts.max(1) {
                sleep(config.reattach_retry_delay).await;
            }
        }

        let auto_restore = self
            .inner
            .state
            .lock()
            .policy
            .may_auto_restore_on_restart();
        if !auto_restore {
            debug!("tier does not auto-restore; restored tabs stay unbound");
            let mut state = self.inner.state.lock();
            state.restored_tabs.clear();
            return;
        }

        let now = clock::now();
        let mut bound = 0usize;
        {
            let mut state = self.inner.state.lock();
            for tab in &tabs {
                let Some(url) = tab.url.as_deref() else { continue };
                let Some(parsed) = Url::parse(url).ok() else { continue };
                let Some((domain, path)) = util::http_host_path(&parsed) else {
                    continue;
                };
                if state.bindings.get(tab.id).is_some() {
                    continue;
                }

                let Some(identity) = best_match(&state.registry, &domain, &path) else {
                    continue;
                };
                if state.bindings.bind(tab.id, identity).is_ok() {
                    state.registry.bind_tab(identity, tab.id, now);
                    state.tab_pages.insert(
                        tab.id,
                        crate::engine::TabPage {
                            url: url.to_owned(),
                            host: Some(domain.clone()),
                            title: tab.title.clone(),
                        },
                    );
                    bound += 1;
                }
            }
            state.restored_tabs.clear();
        }

        if bound > 0 {
            info!(count = bound, "restored tabs reattached");
            self.inner.persist.debounced();
        }
    }
}

/// The identity holding the freshest persisted-tab record equal to
/// `(domain, path)`.
fn best_match(
    registry: &crate::registry::Registry,
    domain: &str,
    path: &str,
) -> Option<IdentityId> {
    let mut best: Option<(OffsetDateTime, IdentityId)> = None;
    for identity in registry.iter() {
        for record in &identity.persisted_tabs {
            if record.domain == domain && record.path == path {
                let candidate = (record.saved_at, identity.id);
                if best.is_none_or(|current| candidate.0 > current.0) {
                    best = Some(candidate);
                }
            }
        }
    }
    best.map(|(_, id)| id)
}
