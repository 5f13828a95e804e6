//! Global atomic counters for script executions.
//!
//! Counters are bumped by the service as outcomes are produced. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!`
//! event.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::sandbox::{ErrorKind, ExecutionOutcome};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free execution counters.
pub struct Metrics {
    executions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    policy_rejections: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            executions: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            policy_rejections: AtomicU64::new(0),
        }
    }

    /// Count one finished execution, classified by its outcome.
    pub fn record_outcome(&self, outcome: &ExecutionOutcome) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        if outcome.success {
            self.successes.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.failures.fetch_add(1, Ordering::Relaxed);
        match outcome.error_kind() {
            Some(ErrorKind::Timeout) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Some(ErrorKind::Validation | ErrorKind::SecurityViolation) => {
                self.policy_rejections.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            executions = self.executions(),
            successes = self.successes(),
            failures = self.failures(),
            timeouts = self.timeouts(),
            policy_rejections = self.policy_rejections(),
        );
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Failed executions of any kind, timeouts and rejections included.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn policy_rejections(&self) -> u64 {
        self.policy_rejections.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.executions.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.policy_rejections.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ScriptError;
    use uuid::Uuid;

    fn failed(err: ScriptError) -> ExecutionOutcome {
        ExecutionOutcome::failure(&err, false, Uuid::nil())
    }

    #[test]
    fn outcomes_are_classified() {
        let m = Metrics::new();
        m.record_outcome(&ExecutionOutcome::success(
            serde_json::json!(1),
            false,
            Uuid::nil(),
        ));
        m.record_outcome(&failed(ScriptError::Timeout { limit_ms: 10 }));
        m.record_outcome(&failed(ScriptError::SecurityViolation {
            category: "pattern",
            token: "FLUSHALL".into(),
        }));
        m.record_outcome(&failed(ScriptError::Validation("empty script".into())));
        m.record_outcome(&failed(ScriptError::Runtime("boom".into())));

        assert_eq!(m.executions(), 5);
        assert_eq!(m.successes(), 1);
        assert_eq!(m.failures(), 4);
        assert_eq!(m.timeouts(), 1);
        assert_eq!(m.policy_rejections(), 2);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.record_outcome(&failed(ScriptError::Timeout { limit_ms: 10 }));
        m.reset();
        assert_eq!(m.executions(), 0);
        assert_eq!(m.failures(), 0);
        assert_eq!(m.timeouts(), 0);
    }
}
