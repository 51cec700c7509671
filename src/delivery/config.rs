use std::collections::BTreeSet;
use std::time::Duration;

use crate::models::DeliveryChannel;

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    /// All of these must succeed for `Success`
    pub required_channels: BTreeSet<DeliveryChannel>,

    /// Tried in priority order alongside the required ones
    pub fallback_channels: Vec<DeliveryChannel>,

    /// Retries after the first attempt, per channel
    pub max_retry_attempts: u32,

    /// Waits between retries; the last entry repeats
    pub backoff_schedule: Vec<Duration>,

    /// Hard deadline from record creation
    pub timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            required_channels: BTreeSet::from([DeliveryChannel::SystemNotification]),
            fallback_channels: vec![
                DeliveryChannel::LocalSound,
                DeliveryChannel::Haptic,
                DeliveryChannel::VisualBanner,
                DeliveryChannel::Badge,
            ],
            max_retry_attempts: 5,
            backoff_schedule: [1, 3, 10, 30, 60].map(Duration::from_secs).to_vec(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl DeliveryConfig {
    /// Required and fallback channels, deduplicated, highest priority first.
    pub fn ordered_channels(&self) -> Vec<DeliveryChannel> {
        let all: BTreeSet<DeliveryChannel> = self
            .required_channels
            .iter()
            .chain(self.fallback_channels.iter())
            .copied()
            .collect();
        all.into_iter().collect()
    }

    /// Wait before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let Some(last) = self.backoff_schedule.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = (retry.saturating_sub(1) as usize).min(last);
        self.backoff_schedule[index]
    }

    /// An empty required set is satisfied by any single success.
    pub fn quorum_met(&self, successful: &BTreeSet<DeliveryChannel>) -> bool {
        if self.required_channels.is_empty() {
            !successful.is_empty()
        } else {
            self.required_channels.is_subset(successful)
        }
    }
}
