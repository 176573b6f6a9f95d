//! Global atomic counters for policy evaluation.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of an evaluation).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Evaluation counters, shared by every service in the process.
pub struct Metrics {
    evaluations: AtomicU64,
    rules_violated: AtomicU64,
    fail_open_bypasses: AtomicU64,
    lock_contentions: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            rules_violated: AtomicU64::new(0),
            fail_open_bypasses: AtomicU64::new(0),
            lock_contentions: AtomicU64::new(0),
        }
    }

    /// Count one evaluation that reached the engine.
    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations", "counter incremented");
    }

    /// Add `n` rules found in violation by one evaluation.
    pub fn add_rules_violated(&self, n: u64) {
        self.rules_violated.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "rules_violated", "counter incremented");
    }

    /// Count one policy let through because it fails open.
    pub fn inc_fail_open_bypasses(&self) {
        self.fail_open_bypasses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fail_open_bypasses", "counter incremented");
    }

    /// Count one attempt that found the comment lock held.
    pub fn inc_lock_contentions(&self) {
        self.lock_contentions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "lock_contentions", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// The CLI calls this once before exiting.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations = self.evaluations(),
            rules_violated = self.rules_violated(),
            fail_open_bypasses = self.fail_open_bypasses(),
            lock_contentions = self.lock_contentions(),
        );
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn rules_violated(&self) -> u64 {
        self.rules_violated.load(Ordering::Relaxed)
    }

    pub fn fail_open_bypasses(&self) -> u64 {
        self.fail_open_bypasses.load(Ordering::Relaxed)
    }

    pub fn lock_contentions(&self) -> u64 {
        self.lock_contentions.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.evaluations.store(0, Ordering::Relaxed);
        self.rules_violated.store(0, Ordering::Relaxed);
        self.fail_open_bypasses.store(0, Ordering::Relaxed);
        self.lock_contentions.store(0, Ordering::Relaxed);
    }
}
