//! The engine: single owner of all identity state.
//!
//! All mutable state (registry, jars, bindings, trail) lives in one
//! [`CoreState`] behind a single mutex. Host-thread chokepoints (the HTTP
//! interceptor, shim reads) lock it briefly and synchronously; background
//! tasks and UI operations go through the same lock, so the public contract
//! is a single serialized sequence of state transitions.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use time::OffsetDateTime;

use seshmux_core::{time as clock, IdentityId, StateStore};

use crate::{
    binding::{ActivityTrail, BindingMap, TabId},
    color::Color,
    config::EngineConfig,
    host::{
        AlarmScheduler, Entitlement, FixedEntitlement, HostError, NativeCookieStore, NoAlarms,
        NoNativeCookies, NoNotifications, NoTabs, Notifier, TabHost,
    },
    init::{InitSignal, InitState},
    jar::Jar,
    persist::{PersistError, PersistHandle},
    policy::Policy,
    registry::{self, Enumeration, RecolorError, Registry, RenameError},
    snapshot::{Snapshot, TabRecord},
};

/// Last-seen page of a tab, tracked from navigation events.
#[derive(Clone, Debug)]
pub(crate) struct TabPage {
    pub url: String,
    pub host: Option<String>,
    pub title: Option<String>,
}

/// The mutable core: every field is owned here and nowhere else.
pub(crate) struct CoreState {
    pub registry: Registry,
    pub bindings: BindingMap,
    pub trail: ActivityTrail,
    pub tab_pages: HashMap<TabId, TabPage>,
    /// Tab metadata restored from the snapshot; consumed by reattachment.
    pub restored_tabs: HashMap<TabId, TabRecord>,
    pub policy: Policy,
}

impl CoreState {
    fn new() -> Self {
        CoreState {
            registry: Registry::new(),
            bindings: BindingMap::new(),
            trail: ActivityTrail::new(),
            tab_pages: HashMap::new(),
            restored_tabs: HashMap::new(),
            policy: Policy::default(),
        }
    }
}

pub(crate) struct Hooks {
    pub tabs: Arc<dyn TabHost>,
    pub cookies: Arc<dyn NativeCookieStore>,
    pub notifier: Arc<dyn Notifier>,
    pub alarms: Arc<dyn AlarmScheduler>,
    pub entitlement: Arc<dyn Entitlement>,
    pub store: Arc<dyn StateStore>,
}

pub(crate) struct EngineInner {
    pub config: EngineConfig,
    pub state: Mutex<CoreState>,
    pub hooks: Hooks,
    pub init: InitSignal,
    pub persist: PersistHandle,
}

impl EngineInner {
    /// Captures the current state as a snapshot. Tab metadata covers bound
    /// tabs with a known page.
    pub(crate) fn capture_snapshot(&self, saved_at: OffsetDateTime) -> Snapshot {
        let state = self.state.lock();
        let mut tab_metadata = HashMap::new();
        for (tab, identity) in state.bindings.iter() {
            if let Some(page) = state.tab_pages.get(&tab) {
                tab_metadata.insert(
                    tab,
                    TabRecord {
                        url: page.url.clone(),
                        identity,
                        title: page.title.clone(),
                    },
                );
            }
        }
        Snapshot::capture(&state.registry, tab_metadata, saved_at)
    }
}

/// Handle to the identity-state engine. Cheap to clone; all clones share the
/// same state.
///
/// # Examples
///
/// ```no_run
/// use seshmux::{store::MemoryStore, Engine};
///
/// #[tokio::main]
/// async fn main() {
///     let engine = Engine::builder(MemoryStore::new()).build();
///     engine.start().await;
///     assert!(engine.is_ready());
///
///     let work = engine.create_identity(None).await.unwrap();
///     engine.rename_identity(work, Some("Work")).unwrap();
/// }
/// ```
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

/// Builds an [`Engine`] from a durable store and host capabilities.
///
/// Capabilities not provided default to inert implementations, which is
/// enough for a library-embedded engine that only uses interception and the
/// registry.
pub struct EngineBuilder {
    store: Arc<dyn StateStore>,
    config: EngineConfig,
    tabs: Arc<dyn TabHost>,
    cookies: Arc<dyn NativeCookieStore>,
    notifier: Arc<dyn Notifier>,
    alarms: Arc<dyn AlarmScheduler>,
    entitlement: Arc<dyn Entitlement>,
}

impl EngineBuilder {
    #[must_use]
    pub fn new<S: StateStore>(store: S) -> Self {
        EngineBuilder {
            store: Arc::new(store),
            config: EngineConfig::default(),
            tabs: Arc::new(NoTabs),
            cookies: Arc::new(NoNativeCookies),
            notifier: Arc::new(NoNotifications),
            alarms: Arc::new(NoAlarms),
            entitlement: Arc::new(FixedEntitlement::default()),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tabs<T: TabHost>(mut self, tabs: T) -> Self {
        self.tabs = Arc::new(tabs);
        self
    }

    pub fn native_cookies<C: NativeCookieStore>(mut self, cookies: C) -> Self {
        self.cookies = Arc::new(cookies);
        self
    }

    pub fn notifier<N: Notifier>(mut self, notifier: N) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn alarms<A: AlarmScheduler>(mut self, alarms: A) -> Self {
        self.alarms = Arc::new(alarms);
        self
    }

    pub fn entitlement<E: Entitlement>(mut self, entitlement: E) -> Self {
        self.entitlement = Arc::new(entitlement);
        self
    }

    /// Builds the engine and spawns its persistence task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn build(self) -> Engine {
        let inner = Arc::new_cyclic(|weak| EngineInner {
            config: self.config,
            state: Mutex::new(CoreState::new()),
            hooks: Hooks {
                tabs: self.tabs,
                cookies: self.cookies,
                notifier: self.notifier,
                alarms: self.alarms,
                entitlement: self.entitlement,
                store: self.store,
            },
            init: InitSignal::new(),
            persist: crate::persist::spawn(weak.clone()),
        });
        Engine { inner }
    }
}

impl Engine {
    #[must_use]
    pub fn builder<S: StateStore>(store: S) -> EngineBuilder {
        EngineBuilder::new(store)
    }

    /// Creates an identity and durably persists it before returning. An
    /// acknowledged creation survives an unclean shutdown.
    pub async fn create_identity(
        &self,
        color: Option<Color>,
    ) -> Result<IdentityId, CreateIdentityError> {
        self.ensure_ready()?;
        let id = {
            let mut state = self.inner.state.lock();
            let policy = state.policy;
            state.registry.create(&policy, color, clock::now())?
        };
        self.inner.persist.immediate().await?;
        Ok(id)
    }

    /// Renames an identity. `None` or the empty string clears the name.
    pub fn rename_identity(
        &self,
        id: IdentityId,
        name: Option<&str>,
    ) -> Result<(), RenameIdentityError> {
        self.ensure_ready()?;
        self.inner.state.lock().registry.rename(id, name)?;
        self.inner.persist.debounced();
        Ok(())
    }

    pub fn recolor_identity(
        &self,
        id: IdentityId,
        color: Color,
    ) -> Result<(), RecolorIdentityError> {
        self.ensure_ready()?;
        {
            let mut state = self.inner.state.lock();
            let policy = state.policy;
            state.registry.recolor(&policy, id, color)?;
        }
        self.inner.persist.debounced();
        Ok(())
    }

    /// Lists identities by lifecycle state. Available in every init state.
    #[must_use]
    pub fn list_identities(&self) -> Enumeration {
        self.inner.state.lock().registry.enumerate()
    }

    /// Opens a tab for a dormant identity and binds it.
    pub async fn open_dormant(
        &self,
        id: IdentityId,
        url: Option<&str>,
    ) -> Result<TabId, OpenDormantError> {
        self.ensure_ready()?;
        if !self.inner.state.lock().registry.contains(id) {
            return Err(OpenDormantError::UnknownIdentity);
        }

        let tab = self.inner.hooks.tabs.open_tab(url).await?;
        {
            let mut state = self.inner.state.lock();
            if !state.registry.contains(id) {
                return Err(OpenDormantError::UnknownIdentity);
            }
            let _ = state.bindings.bind(tab.id, id);
            state.registry.bind_tab(id, tab.id, clock::now());
            if let Some(url) = tab.url.as_deref() {
                state.tab_pages.insert(
                    tab.id,
                    TabPage {
                        url: url.to_owned(),
                        host: url::Url::parse(url)
                            .ok()
                            .and_then(|u| u.host_str().map(str::to_ascii_lowercase)),
                        title: tab.title.clone(),
                    },
                );
            }
        }
        self.inner.persist.debounced();
        Ok(tab.id)
    }

    /// Deletes an identity: unbinds its tabs, destroys its jar, and durably
    /// persists the removal before returning.
    pub async fn delete_identity(&self, id: IdentityId) -> Result<(), DeleteIdentityError> {
        self.ensure_ready()?;
        {
            let mut state = self.inner.state.lock();
            if state.registry.delete(id).is_none() {
                return Err(DeleteIdentityError::UnknownIdentity);
            }
            state.bindings.remove_identity(id);
            state.trail.forget_identity(id);
        }
        self.inner.persist.immediate().await?;
        Ok(())
    }

    /// Deletes every dormant identity. Idempotent: with no dormants left, a
    /// second call reports `deleted = 0`.
    pub async fn delete_all_dormant(&self) -> Result<DormantSweepReport, DeleteIdentityError> {
        self.ensure_ready()?;
        let mut report = DormantSweepReport::default();
        {
            let mut state = self.inner.state.lock();
            let dormant = state.registry.dormant_ids();
            report.attempted = dormant.len();
            for id in dormant {
                if state.registry.delete(id).is_some() {
                    state.bindings.remove_identity(id);
                    state.trail.forget_identity(id);
                    report.deleted += 1;
                } else {
                    report.errors.push(format!("identity {id} vanished mid-delete"));
                }
            }
        }
        if report.attempted > 0 {
            self.inner.persist.immediate().await?;
        }
        Ok(report)
    }

    /// Binds a freshly-opened tab per the inheritance rules. Returns the
    /// inherited identity, if any.
    pub fn on_tab_open(
        &self,
        tab: TabId,
        opener: Option<TabId>,
        url: Option<&str>,
    ) -> Option<IdentityId> {
        let now = clock::now();
        let inherited = {
            let mut state = self.inner.state.lock();
            let identity = crate::binding::inherit(
                &state.bindings,
                &state.trail,
                opener,
                url,
                now,
                self.inner.config.trail_freshness,
            )?;
            if state.bindings.bind(tab, identity).is_err() {
                return None;
            }
            state.registry.bind_tab(identity, tab, now);
            if let Some(url) = url {
                state.tab_pages.insert(
                    tab,
                    TabPage {
                        url: url.to_owned(),
                        host: url::Url::parse(url)
                            .ok()
                            .and_then(|u| u.host_str().map(str::to_ascii_lowercase)),
                        title: None,
                    },
                );
            }
            Some(identity)
        };
        if let Some(identity) = inherited {
            debug!(tab = %tab, identity = %identity, "tab inherited identity");
            self.inner.persist.debounced();
        }
        inherited
    }

    /// Explicitly binds a tab to an identity, as the UI does when the user
    /// opens a tab inside a session.
    pub fn bind_tab(&self, id: IdentityId, tab: TabId) -> Result<(), BindTabError> {
        let now = clock::now();
        {
            let mut state = self.inner.state.lock();
            if !state.registry.contains(id) {
                return Err(BindTabError::UnknownIdentity);
            }
            state.bindings.bind(tab, id)?;
            state.registry.bind_tab(id, tab, now);
        }
        self.inner.persist.debounced();
        Ok(())
    }

    /// Records a navigation: updates the tab's page and, for bound tabs, the
    /// identity's persisted-tab records.
    pub fn on_tab_navigated(&self, tab: TabId, url: &str, title: Option<&str>) {
        let now = clock::now();
        let mut state = self.inner.state.lock();
        state.tab_pages.insert(
            tab,
            TabPage {
                url: url.to_owned(),
                host: url::Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_ascii_lowercase)),
                title: title.map(str::to_owned),
            },
        );
        if let Some(identity) = state.bindings.get(tab) {
            if let Ok(parsed) = url::Url::parse(url) {
                if let Some(ident) = state.registry.get_mut(identity) {
                    ident.record_navigation(&parsed, title, now);
                }
            }
            drop(state);
            self.inner.persist.debounced();
        }
    }

    /// Detaches a closing tab: the binding goes away, and so does the
    /// identity's persisted-tab record for the page the tab was on. A close
    /// that leaves its identity dormant is persisted durably before
    /// returning.
    pub async fn on_tab_close(&self, tab: TabId) {
        let became_dormant = {
            let mut state = self.inner.state.lock();
            let page = state.tab_pages.remove(&tab);
            match state.bindings.remove(tab) {
                Some(identity) => {
                    if let Some((domain, path)) = page
                        .and_then(|page| url::Url::parse(&page.url).ok())
                        .as_ref()
                        .and_then(crate::util::http_host_path)
                    {
                        if let Some(ident) = state.registry.get_mut(identity) {
                            ident
                                .persisted_tabs
                                .retain(|t| t.domain != domain || t.path != path);
                        }
                    }
                    state.registry.unbind_tab(identity, tab)
                }
                None => return,
            }
        };
        if became_dormant {
            if let Err(err) = self.inner.persist.immediate().await {
                error!(error = %err, "persist after tab close failed");
            }
        } else {
            self.inner.persist.debounced();
        }
    }

    /// The identity a tab is bound to, if any.
    #[must_use]
    pub fn identity_of_tab(&self, tab: TabId) -> Option<IdentityId> {
        self.inner.state.lock().bindings.get(tab)
    }

    /// A clone of an identity's jar, primarily for inspection and tests.
    #[must_use]
    pub fn jar_of(&self, id: IdentityId) -> Option<Jar> {
        self.inner
            .state
            .lock()
            .registry
            .get(id)
            .map(|identity| identity.jar.clone())
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), NotReady> {
        match self.inner.init.get() {
            InitState::Ready => Ok(()),
            state => Err(NotReady(state)),
        }
    }
}

/// Report of a bulk dormant deletion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DormantSweepReport {
    pub attempted: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}

/// The error type returned when an operation arrives before the engine is
/// ready (or after initialization failed).
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("engine is not ready (state: {0})")]
pub struct NotReady(pub InitState);

/// The error type returned by [`Engine::create_identity`].
#[derive(Debug, thiserror::Error)]
pub enum CreateIdentityError {
    #[error(transparent)]
    NotReady(#[from] NotReady),
    #[error(transparent)]
    Refused(#[from] registry::CreateError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// The error type returned by [`Engine::rename_identity`].
#[derive(Debug, thiserror::Error)]
pub enum RenameIdentityError {
    #[error(transparent)]
    NotReady(#[from] NotReady),
    #[error(transparent)]
    Refused(#[from] RenameError),
}

/// The error type returned by [`Engine::recolor_identity`].
#[derive(Debug, thiserror::Error)]
pub enum RecolorIdentityError {
    #[error(transparent)]
    NotReady(#[from] NotReady),
    #[error(transparent)]
    Refused(#[from] RecolorError),
}

/// The error type returned by [`Engine::open_dormant`].
#[derive(Debug, thiserror::Error)]
pub enum OpenDormantError {
    #[error(transparent)]
    NotReady(#[from] NotReady),
    #[error("unknown identity")]
    UnknownIdentity,
    #[error(transparent)]
    Host(#[from] HostError),
}

/// The error type returned by [`Engine::delete_identity`] and
/// [`Engine::delete_all_dormant`].
#[derive(Debug, thiserror::Error)]
pub enum DeleteIdentityError {
    #[error(transparent)]
    NotReady(#[from] NotReady),
    #[error("unknown identity")]
    UnknownIdentity,
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// The error type returned by [`Engine::bind_tab`].
#[derive(Debug, thiserror::Error)]
pub enum BindTabError {
    #[error("unknown identity")]
    UnknownIdentity,
    #[error(transparent)]
    AlreadyBound(#[from] crate::binding::AlreadyBound),
}

#[cfg(feature = "test-util")]
impl Engine {
    /// Overrides an identity's `last_accessed_at`, for TTL tests.
    pub fn set_last_accessed_at(&self, id: IdentityId, at: OffsetDateTime) {
        if let Some(identity) = self.inner.state.lock().registry.get_mut(id) {
            identity.last_accessed_at = at;
        }
    }

    /// Runs one dormant-TTL scan immediately.
    pub async fn run_ttl_scan(&self) {
        self.ttl_scan_once().await;
    }

    /// Runs one jar sweep immediately.
    pub fn run_sweep(&self) -> usize {
        self.sweep_all(clock::now())
    }

    /// Runs one native-store scrub tick immediately.
    pub async fn run_scrub_tick(&self) {
        self.scrub_tick().await;
    }

    /// The policy currently in force.
    pub fn current_policy(&self) -> Policy {
        self.inner.state.lock().policy
    }

    /// A persisted-form view of one identity, for equality assertions.
    pub fn identity_record(&self, id: IdentityId) -> Option<crate::snapshot::IdentityRecord> {
        self.inner
            .state
            .lock()
            .registry
            .get(id)
            .map(crate::snapshot::IdentityRecord::from)
    }

    /// Waits until all queued persistence work has been flushed.
    pub async fn flush_persistence(&self) {
        let _ = self.inner.persist.immediate().await;
    }
}
