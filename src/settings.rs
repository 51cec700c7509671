use std::collections::BTreeSet;
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::decision::DecisionConfig;
use crate::delivery::DeliveryConfig;
use crate::fallback::FallbackConfig;
use crate::models::{DeliveryChannel, ModePreference};
use crate::monitor::MonitorConfig;

/// Every user-tunable scalar, as persisted. Missing fields take their
/// defaults and unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AlarmSettings {
    pub mode_preference: ModePreference,
    pub lead_time_seconds: u64,
    pub notify_radius_meters: f64,
    pub low_accuracy_threshold_meters: f64,
    pub deviation_threshold_seconds: u64,
    pub assumed_speed_meters_per_second: f64,
    pub decision_interval_seconds: u64,

    pub outage_threshold_seconds: u64,
    pub fallback_poll_interval_seconds: u64,
    pub freshness_window_seconds: u64,
    pub fallback_accuracy_bound_meters: f64,
    pub auto_recovery: bool,

    pub required_channels: Vec<DeliveryChannel>,
    pub fallback_channels: Vec<DeliveryChannel>,
    pub max_retry_attempts: u32,
    pub backoff_schedule_seconds: Vec<u64>,
    pub delivery_timeout_seconds: u64,
    pub delivery_retention_hours: u64,

    pub message_timeout_seconds: u64,
    pub snooze_minutes: u32,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            mode_preference: ModePreference::Hybrid,
            lead_time_seconds: 300,
            notify_radius_meters: 500.0,
            low_accuracy_threshold_meters: 50.0,
            deviation_threshold_seconds: 120,
            assumed_speed_meters_per_second: 8.33,
            decision_interval_seconds: 10,
            outage_threshold_seconds: 30,
            fallback_poll_interval_seconds: 5,
            freshness_window_seconds: 15,
            fallback_accuracy_bound_meters: 100.0,
            auto_recovery: true,
            required_channels: vec![DeliveryChannel::SystemNotification],
            fallback_channels: vec![
                DeliveryChannel::LocalSound,
                DeliveryChannel::Haptic,
                DeliveryChannel::VisualBanner,
                DeliveryChannel::Badge,
            ],
            max_retry_attempts: 5,
            backoff_schedule_seconds: vec![1, 3, 10, 30, 60],
            delivery_timeout_seconds: 30,
            delivery_retention_hours: 24,
            message_timeout_seconds: 3,
            snooze_minutes: 5,
        }
    }
}

/// Longest duration any seconds-based setting may hold (one week).
pub const MAX_DURATION_SECONDS: u64 = 7 * 24 * 3600;
/// Longest delivery retention (one year).
pub const MAX_RETENTION_HOURS: u64 = 365 * 24;
/// Longest snooze (one day).
pub const MAX_SNOOZE_MINUTES: u32 = 24 * 60;

fn positive_meters(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{name} must be a positive number of meters, got {value}");
    }
    Ok(())
}

fn positive_bounded(name: &str, value: u64, max: u64) -> Result<()> {
    if value == 0 {
        bail!("{name} must be greater than zero");
    }
    if value > max {
        bail!("{name} must be at most {max}, got {value}");
    }
    Ok(())
}

fn positive_seconds(name: &str, value: u64) -> Result<()> {
    positive_bounded(name, value, MAX_DURATION_SECONDS)
}

/// Saturates at `chrono::Duration::MAX` instead of panicking.
fn chrono_seconds(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn chrono_hours(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .unwrap_or(chrono::Duration::MAX)
}

impl AlarmSettings {
    pub fn validate(&self) -> Result<()> {
        positive_seconds("leadTimeSeconds", self.lead_time_seconds)?;
        positive_seconds("deviationThresholdSeconds", self.deviation_threshold_seconds)?;
        positive_seconds("decisionIntervalSeconds", self.decision_interval_seconds)?;
        positive_seconds("outageThresholdSeconds", self.outage_threshold_seconds)?;
        positive_seconds("fallbackPollIntervalSeconds", self.fallback_poll_interval_seconds)?;
        positive_seconds("freshnessWindowSeconds", self.freshness_window_seconds)?;
        positive_seconds("deliveryTimeoutSeconds", self.delivery_timeout_seconds)?;
        positive_bounded(
            "deliveryRetentionHours",
            self.delivery_retention_hours,
            MAX_RETENTION_HOURS,
        )?;
        positive_seconds("messageTimeoutSeconds", self.message_timeout_seconds)?;

        positive_meters("notifyRadiusMeters", self.notify_radius_meters)?;
        positive_meters("lowAccuracyThresholdMeters", self.low_accuracy_threshold_meters)?;
        positive_meters("fallbackAccuracyBoundMeters", self.fallback_accuracy_bound_meters)?;

        let speed = self.assumed_speed_meters_per_second;
        if !speed.is_finite() || speed <= 0.0 {
            bail!("assumedSpeedMetersPerSecond must be positive, got {speed}");
        }
        positive_bounded(
            "snoozeMinutes",
            u64::from(self.snooze_minutes),
            u64::from(MAX_SNOOZE_MINUTES),
        )?;
        if let Some(step) = self
            .backoff_schedule_seconds
            .iter()
            .find(|secs| **secs > MAX_DURATION_SECONDS)
        {
            bail!(
                "backoffScheduleSeconds entries must be at most {MAX_DURATION_SECONDS}, got {step}"
            );
        }
        if self.required_channels.is_empty() && self.fallback_channels.is_empty() {
            bail!("at least one delivery channel must be configured");
        }
        Ok(())
    }

    pub fn fallback_config(&self) -> FallbackConfig {
        FallbackConfig {
            outage_threshold: chrono_seconds(self.outage_threshold_seconds),
            freshness_window: chrono_seconds(self.freshness_window_seconds),
            accuracy_bound_meters: self.fallback_accuracy_bound_meters,
            auto_recovery: self.auto_recovery,
            ..FallbackConfig::default()
        }
    }

    pub fn decision_config(&self) -> DecisionConfig {
        DecisionConfig {
            lead_time: chrono_seconds(self.lead_time_seconds),
            notify_radius_meters: self.notify_radius_meters,
            low_accuracy_threshold_meters: self.low_accuracy_threshold_meters,
            deviation_threshold: chrono_seconds(self.deviation_threshold_seconds),
            assumed_speed_mps: self.assumed_speed_meters_per_second,
            preference: self.mode_preference,
            ..DecisionConfig::default()
        }
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            required_channels: self.required_channels.iter().copied().collect::<BTreeSet<_>>(),
            fallback_channels: self.fallback_channels.clone(),
            max_retry_attempts: self.max_retry_attempts,
            backoff_schedule: self
                .backoff_schedule_seconds
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            decision_interval: Duration::from_secs(self.decision_interval_seconds),
            fallback_poll_interval: Duration::from_secs(self.fallback_poll_interval_seconds),
            message_timeout: Duration::from_secs(self.message_timeout_seconds),
            snooze_minutes: self.snooze_minutes,
            delivery_retention: chrono_hours(self.delivery_retention_hours),
            fallback: self.fallback_config(),
            decision: self.decision_config(),
            delivery: self.delivery_config(),
        }
    }
}

/// JSON-file backed settings. A missing or unreadable file yields defaults.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AlarmSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<AlarmSettings>(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    warn!(
                        "Ignoring unreadable settings file {}: {err}",
                        path.display()
                    );
                    AlarmSettings::default()
                }
            }
        } else {
            AlarmSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> AlarmSettings {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Validates, persists, then swaps in `settings`.
    pub fn update(&self, settings: AlarmSettings) -> Result<()> {
        settings.validate().context("refusing to save invalid settings")?;
        let mut guard = self
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: AlarmSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", self.path.display()))?;
        let mut guard = self
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &AlarmSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
