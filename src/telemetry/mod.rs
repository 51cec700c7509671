mod types;

pub use types::{ChannelStats, StatsSnapshot};

use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{AttemptOutcome, Decision, DeliveryReport};

const MAX_RECENT_DELIVERIES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackEvent {
    Activated,
    Recovered,
}

/// Observability hook. Not required for correctness; implementations must
/// be cheap and must not block.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record_decision(&self, decision: &Decision);
    fn record_suppressed_duplicate(&self, target_id: &str);
    fn record_fallback(&self, event: FallbackEvent);
    /// Receives every terminal delivery outcome with its full attempt history.
    fn record_delivery(&self, report: &DeliveryReport);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record_decision(&self, _decision: &Decision) {}
    fn record_suppressed_duplicate(&self, _target_id: &str) {}
    fn record_fallback(&self, _event: FallbackEvent) {}
    fn record_delivery(&self, _report: &DeliveryReport) {}
}

/// In-process counters for attempts and outcomes.
pub struct StatsCollector {
    inner: Arc<Mutex<StatsSnapshot>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatsSnapshot::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatsSnapshot> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().clone()
    }

    pub fn reset(&self) {
        *self.lock() = StatsSnapshot::default();
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StatsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl TelemetrySink for StatsCollector {
    fn record_decision(&self, decision: &Decision) {
        let mut state = self.lock();
        state.decisions_evaluated += 1;
        *state
            .decisions_by_mode
            .entry(decision.mode.as_str().to_string())
            .or_insert(0) += 1;
        if decision.should_notify {
            state.notify_decisions += 1;
        }
    }

    fn record_suppressed_duplicate(&self, _target_id: &str) {
        self.lock().suppressed_duplicates += 1;
    }

    fn record_fallback(&self, event: FallbackEvent) {
        let mut state = self.lock();
        match event {
            FallbackEvent::Activated => state.fallback_activations += 1,
            FallbackEvent::Recovered => state.fallback_recoveries += 1,
        }
    }

    fn record_delivery(&self, report: &DeliveryReport) {
        let mut state = self.lock();

        *state
            .deliveries_by_result
            .entry(report.result.as_str().to_string())
            .or_insert(0) += 1;
        if report.abandoned {
            state.abandoned_deliveries += 1;
        }

        for attempt in &report.attempts {
            let stats = state.channels.entry(attempt.channel).or_default();
            match attempt.outcome {
                AttemptOutcome::Success => stats.successes += 1,
                AttemptOutcome::Failure(_) => stats.failures += 1,
                AttemptOutcome::Unavailable => stats.unavailable += 1,
                AttemptOutcome::PermissionDenied => stats.permission_denied += 1,
            }
        }

        state.recent_deliveries.push(report.clone());
        if state.recent_deliveries.len() > MAX_RECENT_DELIVERIES {
            state.recent_deliveries.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryAttempt, DeliveryChannel, DeliveryResult};
    use chrono::Utc;

    fn report(id: usize, result: DeliveryResult) -> DeliveryReport {
        DeliveryReport {
            notification_id: format!("n{id}"),
            result,
            successful_channels: vec![DeliveryChannel::SystemNotification],
            failed_channels: vec![DeliveryChannel::LocalSound],
            attempts: vec![
                DeliveryAttempt {
                    channel: DeliveryChannel::SystemNotification,
                    outcome: AttemptOutcome::Success,
                    duration_ms: 3,
                    retry_index: 0,
                    attempted_at: Utc::now(),
                },
                DeliveryAttempt {
                    channel: DeliveryChannel::LocalSound,
                    outcome: AttemptOutcome::PermissionDenied,
                    duration_ms: 1,
                    retry_index: 0,
                    attempted_at: Utc::now(),
                },
            ],
            abandoned: false,
            elapsed_ms: 4,
        }
    }

    #[test]
    fn delivery_outcomes_are_counted_per_channel() {
        let stats = StatsCollector::new();
        stats.record_delivery(&report(0, DeliveryResult::PartialSuccess));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.deliveries_by_result.get("PartialSuccess"), Some(&1));
        assert_eq!(
            snapshot.channels[&DeliveryChannel::SystemNotification].successes,
            1
        );
        assert_eq!(
            snapshot.channels[&DeliveryChannel::LocalSound].permission_denied,
            1
        );
    }

    #[test]
    fn recent_deliveries_are_bounded() {
        let stats = StatsCollector::new();
        for i in 0..(MAX_RECENT_DELIVERIES + 5) {
            stats.record_delivery(&report(i, DeliveryResult::Success));
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.recent_deliveries.len(), MAX_RECENT_DELIVERIES);
        assert_eq!(snapshot.recent_deliveries[0].notification_id, "n5");
    }

    #[test]
    fn clones_share_counters() {
        let stats = StatsCollector::new();
        let other = stats.clone();
        other.record_fallback(FallbackEvent::Activated);
        other.record_suppressed_duplicate("t1");
        assert_eq!(stats.snapshot().fallback_activations, 1);
        assert_eq!(stats.snapshot().suppressed_duplicates, 1);
        stats.reset();
        assert_eq!(other.snapshot().fallback_activations, 0);
    }
}
