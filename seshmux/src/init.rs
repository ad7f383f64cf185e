//! Initialization orchestration.
//!
//! Startup is phased: persistence loads first, then entitlement, then
//! restoration and reattachment, and only then does the engine report
//! `Ready`. Interception, scrubbing, and cleanup are installed earlier so no
//! event is lost, but they pass through untouched until `Ready`. At `t = 0`
//! of a restart, "no tabs" is not evidence of "no sessions".

use std::{fmt, sync::Weak};

use tokio::sync::watch;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

use crate::{
    engine::{Engine, EngineInner},
    persist,
    policy::Policy,
    util::ErrorExt,
};

use seshmux_core::{
    store::{BlobKind, Layer},
    time as clock,
};

/// Startup phases, in order. `Error` is terminal until initialization is
/// retriggered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitState {
    Loading,
    PersistenceReady,
    EntitlementReady,
    RestoreReady,
    ReattachmentReady,
    Ready,
    Error,
}

impl fmt::Display for InitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitState::Loading => "loading",
            InitState::PersistenceReady => "persistence-ready",
            InitState::EntitlementReady => "entitlement-ready",
            InitState::RestoreReady => "restore-ready",
            InitState::ReattachmentReady => "reattachment-ready",
            InitState::Ready => "ready",
            InitState::Error => "error",
        };
        f.write_str(name)
    }
}

/// The published init-state signal.
pub(crate) struct InitSignal {
    tx: watch::Sender<InitState>,
}

impl InitSignal {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(InitState::Loading);
        InitSignal { tx }
    }

    pub(crate) fn set(&self, state: InitState) {
        let previous = *self.tx.borrow();
        if previous != state {
            info!(from = %previous, to = %state, "initialization phase");
        }
        self.tx.send_replace(state);
    }

    pub(crate) fn get(&self) -> InitState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<InitState> {
        self.tx.subscribe()
    }
}

/// Name of the eager-load wake-up alarm.
pub const EAGER_LOAD_ALARM: &str = "seshmux-eager-load";

impl Engine {
    /// The current initialization state.
    #[must_use]
    pub fn init_state(&self) -> InitState {
        self.inner.init.get()
    }

    /// Subscribes to initialization-state transitions.
    #[must_use]
    pub fn subscribe_init(&self) -> watch::Receiver<InitState> {
        self.inner.init.subscribe()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.init_state() == InitState::Ready
    }

    /// Runs the phased startup. Callable again after an `Error` state to
    /// retrigger initialization.
    pub async fn start(&self) {
        let started_at = Instant::now();
        let startup_wall = clock::now();
        let inner = &self.inner;
        inner.init.set(InitState::Loading);

        // Eager-load mitigations: a scheduled wake-up plus a one-shot early
        // write, so lazily-loading hosts pull the engine in within ~1 s of
        // startup whether or not a tab event fires. The stamp is epoch-dated
        // so it can never win the newest-layer selection below.
        inner
            .hooks
            .alarms
            .schedule(EAGER_LOAD_ALARM, inner.config.eager_load_delay);
        let early_stamp = serde_json::to_vec(&crate::snapshot::Stamp {
            version: crate::snapshot::SNAPSHOT_VERSION,
            saved_at: time::OffsetDateTime::UNIX_EPOCH,
            tier: Default::default(),
        })
        .unwrap_or_default();
        if let Err(err) = inner
            .hooks
            .store
            .persist(Layer::Cache, BlobKind::Stamp, &early_stamp)
            .await
        {
            debug!(error = %err.display_chain(), "early stamp write failed");
        }

        // Phase: persistence.
        let loaded = match persist::load_layered(inner.hooks.store.as_ref()).await {
            Ok(loaded) => loaded,
            Err(err) => {
                error!(error = %err.display_chain(), "persistence unavailable");
                inner.init.set(InitState::Error);
                return;
            }
        };
        inner.init.set(InitState::PersistenceReady);

        // Phase: entitlement. The host owns offline grace; a tier is always
        // yielded.
        let tier = inner.hooks.entitlement.tier().await;
        let features = inner.hooks.entitlement.features();
        inner.state.lock().policy = Policy::new(tier, features);
        inner.init.set(InitState::EntitlementReady);

        // Phase: restoration.
        if let Some(loaded) = loaded {
            let (registry, restored_tabs) = loaded.snapshot.into_registry();
            let mut state = inner.state.lock();
            state.registry = registry;
            state.restored_tabs = restored_tabs;
        }
        // Repopulate layers that fell behind the adopted one.
        inner.persist.debounced();
        inner.init.set(InitState::RestoreReady);

        // Phase: reattachment, bounded by the validator deadline. The
        // validator is spawned first; it runs with full cleanup authority
        // regardless of how reattachment fares.
        self.spawn_validator(started_at, startup_wall);
        let deadline = started_at + inner.config.validator_delay;
        tokio::select! {
            () = self.reattach() => {}
            () = tokio::time::sleep_until(deadline) => {
                warn!("reattachment overran the validator deadline");
            }
        }
        inner.init.set(InitState::ReattachmentReady);

        inner.init.set(InitState::Ready);
        self.spawn_background();
    }

    fn spawn_validator(&self, started_at: Instant, startup_wall: time::OffsetDateTime) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_validator(started_at, startup_wall).await;
        });
    }

    /// Spawns the periodic workers: scrub, sweep, and the dormant-TTL scan.
    /// Each holds the engine weakly and exits when it is dropped.
    fn spawn_background(&self) {
        let weak = downgrade(self);

        spawn_periodic(weak.clone(), self.inner.config.scrub_period, |engine| async move {
            engine.scrub_tick().await;
        });

        spawn_periodic(weak.clone(), self.inner.config.sweep_period, |engine| async move {
            engine.sweep_all(clock::now());
        });

        spawn_periodic(weak, self.inner.config.ttl_scan_period, |engine| async move {
            engine.ttl_scan_once().await;
        });
    }
}

fn downgrade(engine: &Engine) -> Weak<EngineInner> {
    std::sync::Arc::downgrade(&engine.inner)
}

fn spawn_periodic<F, Fut>(weak: Weak<EngineInner>, period: std::time::Duration, work: F)
where
    F: Fn(Engine) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        // A first tick fires immediately; skip it so periods measure from
        // readiness.
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            let engine = Engine { inner };
            if !engine.is_ready() {
                continue;
            }
            work(engine).await;
        }
    });
}

impl Engine {
    /// One pass of the dormant-TTL scan: deletes dormant identities whose
    /// inactivity exceeds the tier TTL, persists durably, and emits a single
    /// notification naming the count removed.
    pub(crate) async fn ttl_scan_once(&self) {
        if !self.is_ready() {
            return;
        }
        let now = clock::now();
        let removed = {
            let mut state = self.inner.state.lock();
            let Some(ttl) = state.policy.dormant_ttl() else {
                return;
            };
            let expired = state.registry.expired_dormant_ids(now, ttl);
            for id in &expired {
                state.registry.delete(*id);
                state.bindings.remove_identity(*id);
                state.trail.forget_identity(*id);
            }
            expired.len()
        };

        if removed == 0 {
            return;
        }
        info!(count = removed, "dormant identities expired");
        if let Err(err) = self.inner.persist.immediate().await {
            error!(error = %err, "persist after TTL sweep failed");
        }
        let text = if removed == 1 {
            "1 inactive session removed".to_owned()
        } else {
            format!("{removed} inactive sessions removed")
        };
        self.inner.hooks.notifier.notify("Sessions cleaned up", &text);
    }

    /// Delayed startup validator. Runs once, ~10 s after startup began, with
    /// full cleanup authority: identities that still have no tabs are deleted
    /// when their tier does not retain dormant identities across restarts, or
    /// when their inactivity exceeds the tier TTL. Identities touched since
    /// startup are never candidates.
    pub(crate) async fn run_validator(
        &self,
        started_at: Instant,
        startup_wall: time::OffsetDateTime,
    ) {
        sleep_until_validator(started_at, self.inner.config.validator_delay).await;

        let now = clock::now();
        let removed = {
            let mut state = self.inner.state.lock();
            let policy = state.policy;
            let doomed: Vec<_> = state
                .registry
                .iter()
                .filter(|identity| identity.is_dormant())
                .filter(|identity| identity.last_accessed_at < startup_wall)
                .filter(|identity| {
                    if !policy.may_retain_dormant_after_restart() {
                        return true;
                    }
                    match policy.dormant_ttl() {
                        Some(ttl) => {
                            now - identity.last_accessed_at
                                > seshmux_core::time::to_time_duration(ttl)
                        }
                        None => false,
                    }
                })
                .map(|identity| identity.id)
                .collect();
            for id in &doomed {
                state.registry.delete(*id);
                state.bindings.remove_identity(*id);
                state.trail.forget_identity(*id);
            }
            doomed.len()
        };

        if removed > 0 {
            info!(count = removed, "startup validator removed orphaned identities");
            if let Err(err) = self.inner.persist.immediate().await {
                error!(error = %err, "persist after startup validation failed");
            }
        }
    }
}

async fn sleep_until_validator(started_at: Instant, delay: std::time::Duration) {
    let deadline = started_at + delay;
    let now = Instant::now();
    if deadline > now {
        sleep(deadline - now).await;
    }
}
