//! Shared fixtures: a scriptable mock host and engine harness helpers.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use seshmux::{
    binding::TabId,
    config::EngineConfig,
    host::{
        AlarmScheduler, Entitlement, HostError, NativeCookie, NativeCookieStore, Notifier,
        TabHost, TabInfo,
    },
    policy::{FeatureSet, Tier},
    shim::{Envelope, ShimClient},
    store::MemoryStore,
    Engine, InitState,
};

/// A scriptable host: tab lists can be queued per `list_tabs` call, the
/// global cookie store is a plain map, and notifications/alarms are
/// captured for assertions.
#[derive(Clone, Default)]
pub struct MockHost {
    inner: Arc<MockHostInner>,
}

#[derive(Default)]
struct MockHostInner {
    tier: Mutex<Tier>,
    features: Mutex<FeatureSet>,
    tabs: Mutex<Vec<TabInfo>>,
    scripted_tab_lists: Mutex<VecDeque<Vec<TabInfo>>>,
    native: Mutex<HashMap<String, Vec<NativeCookie>>>,
    failing_deletes: Mutex<HashMap<(String, String), u32>>,
    notifications: Mutex<Vec<(String, String)>>,
    alarms: Mutex<Vec<(String, Duration)>>,
    next_tab: AtomicI64,
}

impl MockHost {
    pub fn new(tier: Tier) -> Self {
        let host = MockHost::default();
        *host.inner.tier.lock() = tier;
        host.inner.next_tab.store(1_000, Ordering::Relaxed);
        host
    }

    pub fn basic() -> Self {
        MockHost::new(Tier::Basic)
    }

    pub fn plus() -> Self {
        MockHost::new(Tier::Plus)
    }

    pub fn pro() -> Self {
        MockHost::new(Tier::Pro)
    }

    pub fn set_tier(&self, tier: Tier) {
        *self.inner.tier.lock() = tier;
    }

    pub fn set_features(&self, features: FeatureSet) {
        *self.inner.features.lock() = features;
    }

    /// Queues one response for the next `list_tabs` call. With the queue
    /// empty, `list_tabs` returns the current (unscripted) tab set.
    pub fn script_tab_list(&self, tabs: Vec<TabInfo>) {
        self.inner.scripted_tab_lists.lock().push_back(tabs);
    }

    pub fn add_tab(&self, tab: TabInfo) {
        self.inner.tabs.lock().push(tab);
    }

    pub fn add_native_cookie(&self, host: &str, cookie: NativeCookie) {
        self.inner
            .native
            .lock()
            .entry(host.to_owned())
            .or_default()
            .push(cookie);
    }

    pub fn native_cookie_names(&self, host: &str) -> Vec<String> {
        self.inner
            .native
            .lock()
            .get(host)
            .map(|cookies| cookies.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Makes the next `times` deletions of `(host, name)` fail.
    pub fn fail_deletes(&self, host: &str, name: &str, times: u32) {
        self.inner
            .failing_deletes
            .lock()
            .insert((host.to_owned(), name.to_owned()), times);
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.inner.notifications.lock().clone()
    }

    pub fn alarms(&self) -> Vec<(String, Duration)> {
        self.inner.alarms.lock().clone()
    }
}

#[async_trait]
impl TabHost for MockHost {
    async fn list_tabs(&self) -> Vec<TabInfo> {
        if let Some(scripted) = self.inner.scripted_tab_lists.lock().pop_front() {
            return scripted;
        }
        self.inner.tabs.lock().clone()
    }

    async fn open_tab(&self, url: Option<&str>) -> Result<TabInfo, HostError> {
        let tab = TabInfo {
            id: TabId(self.inner.next_tab.fetch_add(1, Ordering::Relaxed)),
            url: url.map(str::to_owned),
            title: None,
            opener: None,
        };
        self.inner.tabs.lock().push(tab.clone());
        Ok(tab)
    }
}

#[async_trait]
impl NativeCookieStore for MockHost {
    async fn cookies_for_host(&self, host: &str) -> Vec<NativeCookie> {
        self.inner
            .native
            .lock()
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    async fn delete_cookie(&self, host: &str, name: &str) -> Result<(), HostError> {
        {
            let mut failing = self.inner.failing_deletes.lock();
            if let Some(remaining) = failing.get_mut(&(host.to_owned(), name.to_owned())) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(HostError("scripted delete failure".to_owned()));
                }
            }
        }
        if let Some(cookies) = self.inner.native.lock().get_mut(host) {
            cookies.retain(|cookie| cookie.name != name);
        }
        Ok(())
    }
}

impl Notifier for MockHost {
    fn notify(&self, title: &str, text: &str) {
        self.inner
            .notifications
            .lock()
            .push((title.to_owned(), text.to_owned()));
    }
}

impl AlarmScheduler for MockHost {
    fn schedule(&self, name: &str, after: Duration) {
        self.inner.alarms.lock().push((name.to_owned(), after));
    }
}

#[async_trait]
impl Entitlement for MockHost {
    async fn tier(&self) -> Tier {
        *self.inner.tier.lock()
    }

    fn features(&self) -> FeatureSet {
        *self.inner.features.lock()
    }
}

/// Builds an engine over `host` and `store` and runs startup to `Ready`.
pub async fn ready_engine(host: &MockHost, store: MemoryStore) -> Engine {
    ready_engine_with(host, store, EngineConfig::default()).await
}

/// As [`ready_engine`], with a custom configuration.
pub async fn ready_engine_with(
    host: &MockHost,
    store: MemoryStore,
    config: EngineConfig,
) -> Engine {
    let engine = Engine::builder(store)
        .config(config)
        .tabs(host.clone())
        .native_cookies(host.clone())
        .notifier(host.clone())
        .alarms(host.clone())
        .entitlement(host.clone())
        .build();
    engine.start().await;
    assert_eq!(engine.init_state(), InitState::Ready);
    engine
}

/// A tab on `url`, with a fresh handle.
pub fn tab(id: i64, url: &str) -> TabInfo {
    TabInfo {
        id: TabId(id),
        url: Some(url.to_owned()),
        title: None,
        opener: None,
    }
}

/// A session-scoped native cookie.
pub fn native_cookie(name: &str, value: &str, domain: &str) -> NativeCookie {
    NativeCookie {
        name: name.to_owned(),
        value: value.to_owned(),
        domain: domain.to_owned(),
        path: "/".to_owned(),
        secure: false,
        http_only: false,
        expires: None,
    }
}

/// Wires a [`ShimClient`] to `engine` over an in-process loopback transport
/// and spawns the reply pump. The client is returned unattached.
pub fn loopback_shim(engine: &Engine, tab: TabId, url: &str) -> ShimClient {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Envelope>();
    let client = ShimClient::new(
        move |envelope: Envelope| {
            let _ = tx.send(envelope);
        },
        tab,
        url,
        &EngineConfig::default(),
    );

    let pump_engine = engine.clone();
    let pump_client = client.clone();
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Some(reply) = pump_engine.handle_shim(envelope) {
                pump_client.deliver(reply);
            }
        }
    });

    client
}
