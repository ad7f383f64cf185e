//! Engine configuration.

use std::time::Duration;

/// Tunables for the engine's timers and caps.
///
/// Defaults match production behavior; tests shrink them through the
/// builder-style setters.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Quiescence window before a debounced persist is flushed.
    pub debounce_quiescence: Duration,
    /// Settle delay after an immediate persist commits, protecting against a
    /// process killed mid-flush.
    pub immediate_flush_settle: Duration,
    /// Period of the native cookie-store scrub.
    pub scrub_period: Duration,
    /// Delay before the single retry of a failed native cookie removal.
    pub scrub_retry_delay: Duration,
    /// Period of the jar expiration sweep.
    pub sweep_period: Duration,
    /// Period of the dormant-identity TTL scan.
    pub ttl_scan_period: Duration,
    /// Freshness window of domain-activity-trail entries.
    pub trail_freshness: Duration,
    /// Wait before the first post-restart tab query.
    pub reattach_initial_wait: Duration,
    /// Delay between post-restart tab queries.
    pub reattach_retry_delay: Duration,
    /// Total number of post-restart tab queries.
    pub reattach_attempts: u32,
    /// Delay, from startup, of the cleanup validator.
    pub validator_delay: Duration,
    /// Total budget for the page shim's identity handshake.
    pub shim_handshake_budget: Duration,
    /// Timeout of a page-to-core cookie read.
    pub shim_read_timeout: Duration,
    /// Idle refresh period of the page shim's cookie cache.
    pub shim_refresh_period: Duration,
    /// Delay of the eager-load wake-up alarm installed at startup.
    pub eager_load_delay: Duration,
    /// Uncompressed size above which export payloads are deflated.
    pub export_compression_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            debounce_quiescence: Duration::from_secs(1),
            immediate_flush_settle: Duration::from_millis(100),
            scrub_period: Duration::from_secs(2),
            scrub_retry_delay: Duration::from_millis(100),
            sweep_period: Duration::from_secs(60),
            ttl_scan_period: Duration::from_secs(6 * 60 * 60),
            trail_freshness: Duration::from_secs(30),
            reattach_initial_wait: Duration::from_secs(2),
            reattach_retry_delay: Duration::from_secs(1),
            reattach_attempts: 3,
            validator_delay: Duration::from_secs(10),
            shim_handshake_budget: Duration::from_secs(3),
            shim_read_timeout: Duration::from_secs(5),
            shim_refresh_period: Duration::from_millis(500),
            eager_load_delay: Duration::from_secs(1),
            export_compression_threshold: 100 * 1024,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debounce_quiescence(mut self, d: Duration) -> Self {
        self.debounce_quiescence = d;
        self
    }

    pub fn immediate_flush_settle(mut self, d: Duration) -> Self {
        self.immediate_flush_settle = d;
        self
    }

    pub fn scrub_period(mut self, d: Duration) -> Self {
        self.scrub_period = d;
        self
    }

    pub fn scrub_retry_delay(mut self, d: Duration) -> Self {
        self.scrub_retry_delay = d;
        self
    }

    pub fn sweep_period(mut self, d: Duration) -> Self {
        self.sweep_period = d;
        self
    }

    pub fn ttl_scan_period(mut self, d: Duration) -> Self {
        self.ttl_scan_period = d;
        self
    }

    pub fn trail_freshness(mut self, d: Duration) -> Self {
        self.trail_freshness = d;
        self
    }

    pub fn reattach_initial_wait(mut self, d: Duration) -> Self {
        self.reattach_initial_wait = d;
        self
    }

    pub fn reattach_retry_delay(mut self, d: Duration) -> Self {
        self.reattach_retry_delay = d;
        self
    }

    pub fn reattach_attempts(mut self, attempts: u32) -> Self {
        self.reattach_attempts = attempts;
        self
    }

    pub fn validator_delay(mut self, d: Duration) -> Self {
        self.validator_delay = d;
        self
    }

    pub fn shim_handshake_budget(mut self, d: Duration) -> Self {
        self.shim_handshake_budget = d;
        self
    }

    pub fn shim_read_timeout(mut self, d: Duration) -> Self {
        self.shim_read_timeout = d;
        self
    }

    pub fn shim_refresh_period(mut self, d: Duration) -> Self {
        self.shim_refresh_period = d;
        self
    }

    pub fn eager_load_delay(mut self, d: Duration) -> Self {
        self.eager_load_delay = d;
        self
    }

    pub fn export_compression_threshold(mut self, bytes: usize) -> Self {
        self.export_compression_threshold = bytes;
        self
    }
}
