use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Escrow engine counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub transitions_applied: AtomicU64,
    pub replays: AtomicU64,
    pub blocked: AtomicU64,
    pub invalid_transitions: AtomicU64,
    pub conflicts_retried: AtomicU64,
    pub provider_failures: AtomicU64,
    pub notifications_drained: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_applied(&self) {
        self.transitions_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict_retry(&self) {
        self.conflicts_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drained(&self, count: u64) {
        self.notifications_drained.fetch_add(count, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            transitions_applied: self.transitions_applied.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            invalid_transitions: self.invalid_transitions.load(Ordering::Relaxed),
            conflicts_retried: self.conflicts_retried.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            notifications_drained: self.notifications_drained.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            applied = stats.transitions_applied,
            replays = stats.replays,
            blocked = stats.blocked,
            invalid = stats.invalid_transitions,
            conflicts_retried = stats.conflicts_retried,
            provider_failures = stats.provider_failures,
            drained = stats.notifications_drained,
            "Escrow engine metrics"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub transitions_applied: u64,
    pub replays: u64,
    pub blocked: u64,
    pub invalid_transitions: u64,
    pub conflicts_retried: u64,
    pub provider_failures: u64,
    pub notifications_drained: u64,
}

/// Time an operation and log its duration
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.record_applied();
        metrics.record_applied();
        metrics.record_replay();
        metrics.record_drained(3);

        let stats = metrics.get_stats();
        assert_eq!(stats.transitions_applied, 2);
        assert_eq!(stats.replays, 1);
        assert_eq!(stats.notifications_drained, 3);
        assert_eq!(stats.blocked, 0);
    }
}
