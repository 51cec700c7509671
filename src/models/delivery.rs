use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::notification::NotificationPayload;

/// Delivery surfaces, declared highest priority first so the derived `Ord`
/// agrees with `priority()`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryChannel {
    SystemNotification,
    LocalSound,
    Haptic,
    VisualBanner,
    Badge,
}

impl DeliveryChannel {
    pub const ALL: [DeliveryChannel; 5] = [
        DeliveryChannel::SystemNotification,
        DeliveryChannel::LocalSound,
        DeliveryChannel::Haptic,
        DeliveryChannel::VisualBanner,
        DeliveryChannel::Badge,
    ];

    /// Ordering weight only; never used to judge success.
    pub fn priority(&self) -> u8 {
        match self {
            DeliveryChannel::SystemNotification => 100,
            DeliveryChannel::LocalSound => 90,
            DeliveryChannel::Haptic => 80,
            DeliveryChannel::VisualBanner => 70,
            DeliveryChannel::Badge => 60,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::SystemNotification => "SystemNotification",
            DeliveryChannel::LocalSound => "LocalSound",
            DeliveryChannel::Haptic => "Haptic",
            DeliveryChannel::VisualBanner => "VisualBanner",
            DeliveryChannel::Badge => "Badge",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type", content = "reason")]
pub enum AttemptOutcome {
    Success,
    Failure(String),
    Unavailable,
    PermissionDenied,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAttempt {
    pub channel: DeliveryChannel,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
    pub retry_index: u32,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryResult {
    Success,
    PartialSuccess,
    Failure,
    Timeout,
}

impl DeliveryResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryResult::Success => "Success",
            DeliveryResult::PartialSuccess => "PartialSuccess",
            DeliveryResult::Failure => "Failure",
            DeliveryResult::Timeout => "Timeout",
        }
    }

    /// Whether the user got at least some signal. Only `Failure` calls for
    /// the last-resort indicator.
    pub fn reached_user(&self, successful_channels: &[DeliveryChannel]) -> bool {
        match self {
            DeliveryResult::Success | DeliveryResult::PartialSuccess => true,
            DeliveryResult::Timeout => !successful_channels.is_empty(),
            DeliveryResult::Failure => false,
        }
    }
}

/// Outcome handed back to the caller of `deliver`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub notification_id: String,
    pub result: DeliveryResult,
    pub successful_channels: Vec<DeliveryChannel>,
    pub failed_channels: Vec<DeliveryChannel>,
    pub attempts: Vec<DeliveryAttempt>,
    pub abandoned: bool,
    pub elapsed_ms: u64,
}

impl DeliveryReport {
    pub fn attempts_for(&self, channel: DeliveryChannel) -> usize {
        self.attempts.iter().filter(|a| a.channel == channel).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub notification_id: String,
    pub created_at: DateTime<Utc>,
    pub required_channels: BTreeSet<DeliveryChannel>,
    pub fallback_channels: Vec<DeliveryChannel>,
    pub attempts: Vec<DeliveryAttempt>,
    pub completed: bool,
    pub final_result: Option<DeliveryResult>,
    #[serde(default)]
    pub abandoned: bool,
    #[serde(default)]
    pub payload: Option<NotificationPayload>,
}
