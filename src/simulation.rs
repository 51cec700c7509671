//! In-process collaborators for running the monitor without a device:
//! a settable position source, a timetable, logging channels and an
//! in-memory history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use log::info;

use crate::clock::Clock;
use crate::delivery::{ChannelAvailability, ChannelDispatcher, ChannelError};
use crate::models::{
    Decision, DeliveryChannel, DeliveryRecord, GeoPoint, Notification, PositionSample,
    ScheduledArrival,
};
use crate::sources::{BoxFuture, HistoryStore, PositionSource, ScheduleSource};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reports whatever fix was last set, stamped with the current time.
pub struct SimulatedPosition {
    clock: Arc<dyn Clock>,
    fix: Mutex<Option<(GeoPoint, f64)>>,
}

impl SimulatedPosition {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            fix: Mutex::new(None),
        }
    }

    pub fn set_fix(&self, point: GeoPoint, accuracy_meters: f64) {
        *lock(&self.fix) = Some((point, accuracy_meters));
    }

    pub fn lose_signal(&self) {
        *lock(&self.fix) = None;
    }
}

impl PositionSource for SimulatedPosition {
    fn current_position(&self) -> BoxFuture<'_, Option<PositionSample>> {
        let fix = *lock(&self.fix);
        let sample = fix.map(|(point, accuracy)| {
            PositionSample::new(point.latitude, point.longitude, accuracy, self.clock.now())
        });
        Box::pin(async move { sample })
    }
}

#[derive(Default)]
pub struct StaticSchedule {
    arrivals: Mutex<HashMap<String, ScheduledArrival>>,
}

impl StaticSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, leg_id: impl Into<String>, arrival: ScheduledArrival) {
        lock(&self.arrivals).insert(leg_id.into(), arrival);
    }
}

impl ScheduleSource for StaticSchedule {
    fn scheduled_arrival<'a>(&'a self, leg_id: &'a str) -> BoxFuture<'a, Option<ScheduledArrival>> {
        let arrival = lock(&self.arrivals).get(leg_id).cloned();
        Box::pin(async move { arrival })
    }
}

/// Channel that logs each notification and keeps a copy. A failure can be
/// injected for every subsequent delivery.
pub struct LoggingChannel {
    channel: DeliveryChannel,
    failure: Mutex<Option<ChannelError>>,
    delivered: Mutex<Vec<Notification>>,
    attempts: Mutex<usize>,
}

impl LoggingChannel {
    pub fn new(channel: DeliveryChannel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            failure: Mutex::new(None),
            delivered: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        })
    }

    pub fn fail_with(&self, error: Option<ChannelError>) {
        *lock(&self.failure) = error;
    }

    pub fn delivered(&self) -> Vec<Notification> {
        lock(&self.delivered).clone()
    }

    pub fn attempts(&self) -> usize {
        *lock(&self.attempts)
    }
}

impl ChannelDispatcher for LoggingChannel {
    fn channel(&self) -> DeliveryChannel {
        self.channel
    }

    fn check_availability(&self) -> BoxFuture<'_, ChannelAvailability> {
        Box::pin(async { ChannelAvailability::Available })
    }

    fn deliver<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async move {
            *lock(&self.attempts) += 1;
            if let Some(error) = lock(&self.failure).clone() {
                return Err(error);
            }
            info!(
                "[{}] {}: {}",
                self.channel.as_str(),
                notification.title,
                notification.body
            );
            lock(&self.delivered).push(notification.clone());
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct MemoryHistory {
    decisions: Mutex<Vec<Decision>>,
    deliveries: Mutex<Vec<DeliveryRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<Decision> {
        lock(&self.decisions).clone()
    }

    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        lock(&self.deliveries).clone()
    }
}

impl HistoryStore for MemoryHistory {
    fn append_decision<'a>(&'a self, decision: &'a Decision) -> BoxFuture<'a, Result<()>> {
        lock(&self.decisions).push(decision.clone());
        Box::pin(async { Ok(()) })
    }

    fn append_delivery<'a>(&'a self, record: &'a DeliveryRecord) -> BoxFuture<'a, Result<()>> {
        lock(&self.deliveries).push(record.clone());
        Box::pin(async { Ok(()) })
    }
}
