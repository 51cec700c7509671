use chrono::Duration;

use crate::models::ModePreference;

/// Configuration for per-tick arrival decisions.
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Fire this long before the estimated arrival
    pub lead_time: Duration,

    /// Fire when within this distance of the target stop
    pub notify_radius_meters: f64,

    /// Live accuracy worse than this forces `Degraded`
    pub low_accuracy_threshold_meters: f64,

    /// Fallback positions at least this inaccurate are ignored in `Degraded`
    pub degraded_position_max_accuracy_meters: f64,

    /// Timetable/position disagreement flagged as significant above this
    pub deviation_threshold: Duration,

    /// Used for position-based ETA when no speed can be measured
    pub assumed_speed_mps: f64,

    pub preference: ModePreference,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            lead_time: Duration::minutes(5),
            notify_radius_meters: 500.0,
            low_accuracy_threshold_meters: 50.0,
            degraded_position_max_accuracy_meters: 100.0,
            deviation_threshold: Duration::seconds(120),
            assumed_speed_mps: 8.33,
            preference: ModePreference::Hybrid,
        }
    }
}
