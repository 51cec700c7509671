//! Interfaces to the collaborators around the core: positioning, the
//! timetable, the optional message generator and history persistence.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::models::{
    Decision, DeliveryRecord, NotificationPayload, PositionSample, ScheduledArrival,
};

pub use crate::telemetry::TelemetrySink;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw device positioning. May return `None` or a stale sample at any time.
pub trait PositionSource: Send + Sync + 'static {
    fn current_position(&self) -> BoxFuture<'_, Option<PositionSample>>;
}

/// Timetable lookup for a journey leg.
pub trait ScheduleSource: Send + Sync + 'static {
    fn scheduled_arrival<'a>(&'a self, leg_id: &'a str) -> BoxFuture<'a, Option<ScheduledArrival>>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MessageStyle {
    Standard,
    Gentle,
    Urgent,
}

/// Optional generator of friendlier notification text.
pub trait MessageGenerator: Send + Sync + 'static {
    fn generate_message<'a>(
        &'a self,
        payload: &'a NotificationPayload,
        style: MessageStyle,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Append-only history of decisions and finished deliveries. The format is
/// up to the implementation.
pub trait HistoryStore: Send + Sync + 'static {
    fn append_decision<'a>(&'a self, decision: &'a Decision) -> BoxFuture<'a, Result<()>>;
    fn append_delivery<'a>(&'a self, record: &'a DeliveryRecord) -> BoxFuture<'a, Result<()>>;
}

/// Races the generator against `timeout`; any error, timeout or blank text
/// falls back to the payload's canned body.
pub async fn compose_message(
    generator: Option<&dyn MessageGenerator>,
    payload: &NotificationPayload,
    style: MessageStyle,
    timeout: Duration,
) -> String {
    let Some(generator) = generator else {
        return payload.fallback_body();
    };

    match tokio::time::timeout(timeout, generator.generate_message(payload, style)).await {
        Ok(Ok(text)) if !text.trim().is_empty() => text,
        Ok(Ok(_)) => {
            debug!("message generator returned empty text for {}", payload.target_id());
            payload.fallback_body()
        }
        Ok(Err(err)) => {
            warn!("message generation failed for {}: {err:#}", payload.target_id());
            payload.fallback_body()
        }
        Err(_) => {
            warn!(
                "message generation timed out after {}ms for {}",
                timeout.as_millis(),
                payload.target_id()
            );
            payload.fallback_body()
        }
    }
}
