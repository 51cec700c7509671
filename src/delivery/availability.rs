use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::models::DeliveryChannel;

use super::channel::{ChannelAvailability, ChannelDispatcher};

pub const DEFAULT_AVAILABILITY_TTL: Duration = Duration::from_secs(60);

/// Caches availability checks per channel so repeated deliveries do not
/// hit the platform every time.
pub struct AvailabilityCache {
    ttl: Duration,
    entries: Mutex<HashMap<DeliveryChannel, (ChannelAvailability, Instant)>>,
}

impl AvailabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DeliveryChannel, (ChannelAvailability, Instant)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cached(&self, channel: DeliveryChannel) -> Option<ChannelAvailability> {
        let entries = self.lock();
        let (availability, checked_at) = entries.get(&channel)?;
        (checked_at.elapsed() < self.ttl).then(|| availability.clone())
    }

    pub async fn check(&self, dispatcher: &dyn ChannelDispatcher) -> ChannelAvailability {
        let channel = dispatcher.channel();
        if let Some(availability) = self.cached(channel) {
            return availability;
        }

        let availability = dispatcher.check_availability().await;
        self.record(channel, availability.clone());
        availability
    }

    /// Stores an availability learned some other way, e.g. from a delivery error.
    pub fn record(&self, channel: DeliveryChannel, availability: ChannelAvailability) {
        self.lock().insert(channel, (availability, Instant::now()));
    }

    pub fn invalidate(&self, channel: DeliveryChannel) {
        self.lock().remove(&channel);
    }
}

impl Default for AvailabilityCache {
    fn default() -> Self {
        Self::new(DEFAULT_AVAILABILITY_TTL)
    }
}
