use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum OperatingMode {
    TimeOnly,
    PositionOnly,
    Hybrid,
    Degraded,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::TimeOnly => "TimeOnly",
            OperatingMode::PositionOnly => "PositionOnly",
            OperatingMode::Hybrid => "Hybrid",
            OperatingMode::Degraded => "Degraded",
        }
    }
}

/// Mode the user asked for. `Degraded` is never a preference; it is only
/// ever chosen by the selector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ModePreference {
    TimeOnly,
    PositionOnly,
    Hybrid,
}

impl Default for ModePreference {
    fn default() -> Self {
        ModePreference::Hybrid
    }
}

/// Disagreement between the timetable and the live position, in seconds.
/// Positive means the timetable expects arrival later than the position does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDeviation {
    pub time_based_eta_secs: i64,
    pub position_based_eta_secs: i64,
    pub deviation_secs: i64,
    pub significant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub target_id: String,
    pub should_notify: bool,
    pub mode: OperatingMode,
    pub confidence: f64,
    pub eta_seconds: Option<i64>,
    pub distance_to_target: Option<f64>,
    pub reason: String,
    pub produced_at: DateTime<Utc>,
    #[serde(default)]
    pub deviation: Option<ScheduleDeviation>,
}
