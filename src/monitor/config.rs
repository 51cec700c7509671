use std::time::Duration;

use crate::decision::DecisionConfig;
use crate::delivery::DeliveryConfig;
use crate::fallback::FallbackConfig;

/// Everything the monitor needs, derived from `AlarmSettings`.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub decision_interval: Duration,
    pub fallback_poll_interval: Duration,
    /// Bound on the optional message generator
    pub message_timeout: Duration,
    pub snooze_minutes: u32,
    /// Completed delivery records older than this are pruned
    pub delivery_retention: chrono::Duration,
    pub fallback: FallbackConfig,
    pub decision: DecisionConfig,
    pub delivery: DeliveryConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            decision_interval: Duration::from_secs(10),
            fallback_poll_interval: Duration::from_secs(5),
            message_timeout: Duration::from_secs(3),
            snooze_minutes: 5,
            delivery_retention: chrono::Duration::hours(24),
            fallback: FallbackConfig::default(),
            decision: DecisionConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn snooze_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.snooze_minutes) * 60)
    }
}
