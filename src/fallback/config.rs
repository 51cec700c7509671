use chrono::Duration;

/// Tunables for outage detection and substitute selection.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Time without a fresh, accurate sample before declaring an outage
    pub outage_threshold: Duration,

    /// Samples older than this are never treated as current
    pub freshness_window: Duration,

    /// Worst accuracy radius a sample may have and still count as "good"
    pub accuracy_bound_meters: f64,

    /// Leave the outage as soon as a good sample arrives; otherwise wait for dismissal
    pub auto_recovery: bool,

    /// A last-known position younger than this is "recent" for strategy selection
    pub last_known_max_age: Duration,

    /// Stop crossings inside this window count towards inference confidence
    pub recent_stop_window: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            outage_threshold: Duration::seconds(30),
            freshness_window: Duration::seconds(15),
            accuracy_bound_meters: 100.0,
            auto_recovery: true,
            last_known_max_age: Duration::seconds(60),
            recent_stop_window: Duration::minutes(5),
        }
    }
}
