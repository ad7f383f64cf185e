//! Page-context cookie shim.
//!
//! The in-page replacement for the ambient cookie accessor is a typed
//! client: reads are synchronous against a local cache, writes update the
//! cache optimistically and stream to the core fire-and-forget, and the
//! cache is refreshed asynchronously: on attach, after every write, and on
//! an idle period. The client and the core speak a correlation-id protocol;
//! the host owns the transport (a content-script port, a pipe, a channel).
//!
//! A script that runs `document.cookie = "k=v"` and reads `document.cookie`
//! on the next line observes `k=v`: the optimistic cache answers before the
//! core has seen the write. If the core later rejects the write
//! (cross-domain), the next refresh reconciles the cache.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use url::Url;

use seshmux_core::{
    cookie::{parse_set_cookie, serialize_cookie_header},
    time as clock, IdentityId,
};

use crate::{binding::TabId, config::EngineConfig, engine::Engine};

/// A request from a page shim to the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShimRequest {
    /// Identity handshake.
    Hello,
    /// Synchronous-cache refill: the full cookie string for `url`.
    ReadCookies { url: String },
    /// A `document.cookie = …` write. Unacknowledged.
    WriteCookie { url: String, cookie: String },
}

/// A correlated request envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    pub tab: TabId,
    pub request: ShimRequest,
}

/// A reply from the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShimReply {
    Identity { id: Option<IdentityId> },
    Cookies { header: String },
    /// The tab has no identity; the shim must fail loudly, not fall back to
    /// a shared scope.
    Detached,
}

/// A correlated reply envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub seq: u64,
    pub reply: ShimReply,
}

impl Engine {
    /// Handles one shim request. Writes return no reply.
    pub fn handle_shim(&self, envelope: Envelope) -> Option<ReplyEnvelope> {
        let Envelope { seq, tab, request } = envelope;
        let reply = match request {
            ShimRequest::Hello => ShimReply::Identity {
                id: self.identity_of_tab(tab),
            },
            ShimRequest::ReadCookies { url } => match self.page_cookie_header(tab, &url) {
                Some(header) => ShimReply::Cookies { header },
                None => ShimReply::Detached,
            },
            ShimRequest::WriteCookie { url, cookie } => {
                self.page_cookie_write(tab, &url, &cookie);
                return None;
            }
        };
        Some(ReplyEnvelope { seq, reply })
    }

    /// The cookie string a page script in `tab` may see for `url`: matching,
    /// non-expired, and not `HttpOnly`.
    #[must_use]
    pub fn page_cookie_header(&self, tab: TabId, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let (host, path) = crate::util::http_host_path(&parsed)?;
        let now = clock::now();

        let state = self.inner.state.lock();
        let identity = state.bindings.get(tab)?;
        let ident = state.registry.get(identity)?;
        let visible: Vec<_> = ident
            .jar
            .match_cookies(&host, &path, now)
            .into_iter()
            .filter(|cookie| !cookie.http_only)
            .collect();
        Some(serialize_cookie_header(visible))
    }

    /// Applies a `document.cookie = …` write into the bound identity's jar.
    /// Cross-domain writes are refused and logged as security events.
    pub fn page_cookie_write(&self, tab: TabId, url: &str, cookie: &str) {
        let Ok(parsed) = Url::parse(url) else {
            debug!(url, "page cookie write on unparsable URL dropped");
            return;
        };
        let now = clock::now();

        let mut state = self.inner.state.lock();
        let Some(identity) = state.bindings.get(tab) else {
            debug!(tab = %tab, "page cookie write from unbound tab dropped");
            return;
        };

        match parse_set_cookie(cookie, Some(&parsed), now) {
            Ok(stored) => {
                if let Some(ident) = state.registry.get_mut(identity) {
                    let inserted = ident.jar.insert(stored, now);
                    ident.last_accessed_at = now;
                    drop(state);
                    if inserted {
                        self.inner.persist.debounced();
                    }
                }
            }
            Err(err) if err.is_security_block() => {
                warn!(
                    identity = %identity,
                    value = cookie,
                    error = %err,
                    "page cookie write refused"
                );
            }
            Err(err) => {
                debug!(value = cookie, error = %err, "page cookie write skipped");
            }
        }
    }
}

/// Transport carrying shim envelopes to the core. Replies come back through
/// [`ShimClient::deliver`].
pub trait ShimTransport: Send + Sync + 'static {
    fn send(&self, envelope: Envelope);
}

impl<F> ShimTransport for F
where
    F: Fn(Envelope) + Send + Sync + 'static,
{
    fn send(&self, envelope: Envelope) {
        self(envelope)
    }
}

/// The error type for page-side shim operations.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShimError {
    #[error("no identity could be acquired within the retry budget")]
    IdentityUnavailable,
    #[error("tab is not bound to an identity")]
    Detached,
}

struct ShimState {
    identity: Option<IdentityId>,
    cache: String,
    pending: HashMap<u64, oneshot::Sender<ShimReply>>,
}

struct ShimShared {
    tab: TabId,
    url: String,
    transport: Arc<dyn ShimTransport>,
    seq: AtomicU64,
    state: Mutex<ShimState>,
    handshake_budget: Duration,
    read_timeout: Duration,
    refresh_period: Duration,
}

/// The page-side cookie accessor: synchronous cached reads, optimistic
/// writes.
#[derive(Clone)]
pub struct ShimClient {
    shared: Arc<ShimShared>,
}

impl ShimClient {
    /// Creates an unattached client over `transport`. Replies must be routed
    /// back through [`deliver`](ShimClient::deliver), typically by a pump
    /// the host wires up before calling [`attach`](ShimClient::attach).
    #[must_use]
    pub fn new<T: ShimTransport>(
        transport: T,
        tab: TabId,
        url: impl Into<String>,
        config: &EngineConfig,
    ) -> ShimClient {
        ShimClient {
            shared: Arc::new(ShimShared {
                tab,
                url: url.into(),
                transport: Arc::new(transport),
                seq: AtomicU64::new(0),
                state: Mutex::new(ShimState {
                    identity: None,
                    cache: String::new(),
                    pending: HashMap::new(),
                }),
                handshake_budget: config.shim_handshake_budget,
                read_timeout: config.shim_read_timeout,
                refresh_period: config.shim_refresh_period,
            }),
        }
    }

    /// Acquires the tab's identity with exponential backoff within the
    /// handshake budget, then fills the cache. Fails loudly when no identity
    /// can be acquired; there is no shared default scope to fall back to.
    pub async fn attach(&self) -> Result<(), ShimError> {
        let budget = self.shared.handshake_budget;
        let mut delay = Duration::from_millis(100);
        let mut spent = Duration::ZERO;
        loop {
            match self.request(ShimRequest::Hello, delay).await {
                Some(ShimReply::Identity { id: Some(identity) }) => {
                    self.shared.state.lock().identity = Some(identity);
                    break;
                }
                // Answered, but the tab has no identity yet: wait out the
                // backoff step. A timeout has already waited it.
                Some(_) => tokio::time::sleep(delay).await,
                None => {}
            }
            spent += delay;
            if spent >= budget {
                return Err(ShimError::IdentityUnavailable);
            }
            delay = (delay * 2).min(budget - spent);
        }

        self.refresh().await;
        Ok(())
    }

    /// Routes a reply from the transport back to its waiting request.
    pub fn deliver(&self, reply: ReplyEnvelope) {
        let sender = self.shared.state.lock().pending.remove(&reply.seq);
        if let Some(tx) = sender {
            let _ = tx.send(reply.reply);
        }
    }

    /// The identity this shim is scoped to.
    pub fn identity(&self) -> Result<IdentityId, ShimError> {
        self.shared
            .state
            .lock()
            .identity
            .ok_or(ShimError::Detached)
    }

    /// Synchronous cookie read from the cache. Never blocks on the core.
    pub fn cookie(&self) -> Result<String, ShimError> {
        let state = self.shared.state.lock();
        if state.identity.is_none() {
            return Err(ShimError::Detached);
        }
        Ok(state.cache.clone())
    }

    /// A `document.cookie = …` write: updates the cache optimistically with
    /// the written pair, then streams the write to the core without waiting
    /// for it.
    pub fn set_cookie(&self, cookie: &str) -> Result<(), ShimError> {
        {
            let mut state = self.shared.state.lock();
            if state.identity.is_none() {
                return Err(ShimError::Detached);
            }
            if let Some(pair) = first_pair(cookie) {
                state.cache = merge_pair(&state.cache, &pair);
            }
        }
        self.send_only(ShimRequest::WriteCookie {
            url: self.shared.url.clone(),
            cookie: cookie.to_owned(),
        });
        self.spawn_refresh_once();
        Ok(())
    }

    /// Refreshes the cache from the core. On timeout the cached value stands
    /// and the staleness is logged.
    pub async fn refresh(&self) {
        let reply = self
            .request(
                ShimRequest::ReadCookies {
                    url: self.shared.url.clone(),
                },
                self.shared.read_timeout,
            )
            .await;
        match reply {
            Some(ShimReply::Cookies { header }) => {
                self.shared.state.lock().cache = header;
            }
            Some(ShimReply::Detached) => {
                let mut state = self.shared.state.lock();
                state.identity = None;
                state.cache.clear();
            }
            Some(_) => {}
            None => {
                warn!(tab = %self.shared.tab, "cookie read timed out; serving cached value");
            }
        }
    }

    /// Spawns the idle refresh loop. The task holds the client weakly and
    /// exits when the last clone is dropped.
    pub fn spawn_idle_refresh(&self) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        let period = self.shared.refresh_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                ShimClient { shared }.refresh().await;
            }
        })
    }

    fn spawn_refresh_once(&self) {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            if let Some(shared) = weak.upgrade() {
                ShimClient { shared }.refresh().await;
            }
        });
    }

    async fn request(&self, request: ShimRequest, timeout: Duration) -> Option<ShimReply> {
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.state.lock().pending.insert(seq, tx);
        self.shared.transport.send(Envelope {
            seq,
            tab: self.shared.tab,
            request,
        });
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Some(reply),
            _ => {
                self.shared.state.lock().pending.remove(&seq);
                None
            }
        }
    }

    fn send_only(&self, request: ShimRequest) {
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        self.shared.transport.send(Envelope {
            seq,
            tab: self.shared.tab,
            request,
        });
    }
}

/// The `name=value` head of a cookie string, attributes dropped.
fn first_pair(value: &str) -> Option<String> {
    let parsed = cookie::Cookie::parse(value.trim()).ok()?;
    Some(format!("{}={}", parsed.name(), parsed.value()))
}

/// Replaces (or appends) `pair`'s cookie in a `"a=1; b=2"` cache string.
fn merge_pair(cache: &str, pair: &str) -> String {
    let name = pair.split('=').next().unwrap_or_default();
    let mut entries: Vec<&str> = cache
        .split("; ")
        .filter(|entry| !entry.is_empty())
        .filter(|entry| entry.split('=').next() != Some(name))
        .collect();
    entries.push(pair);
    entries.join("; ")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_pair_drops_attributes() {
        assert_eq!(first_pair("k=v; Path=/; Secure"), Some("k=v".to_owned()));
        assert_eq!(first_pair("k=v"), Some("k=v".to_owned()));
        assert_eq!(first_pair("no pair here"), None);
    }

    #[test]
    fn merge_replaces_same_name() {
        assert_eq!(merge_pair("", "k=v"), "k=v");
        assert_eq!(merge_pair("a=1; k=old", "k=new"), "a=1; k=new");
        assert_eq!(merge_pair("a=1", "k=v"), "a=1; k=v");
    }

    #[test]
    fn envelope_serde_round_trip() {
        let envelope = Envelope {
            seq: 7,
            tab: TabId(3),
            request: ShimRequest::ReadCookies {
                url: "https://example.test/".to_owned(),
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);

        let reply = ReplyEnvelope {
            seq: 7,
            reply: ShimReply::Cookies {
                header: "a=1".to_owned(),
            },
        };
        let json = serde_json::to_string(&reply).unwrap();
        let back: ReplyEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(reply, back);
    }
}
