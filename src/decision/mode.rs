use crate::models::{ModePreference, OperatingMode};

/// Picks the operating mode for one tick. `current_accuracy` is the accuracy
/// of the newest fresh sample, or `None` when there is none.
///
/// Rules, first match wins:
/// 1. a pinned `TimeOnly` needs no positioning and is always honored; a
///    pinned `PositionOnly` is honored unless accuracy disqualifies it
/// 2. missing or worse-than-threshold accuracy gives `Degraded`
/// 3. `Hybrid` preference gives `Hybrid`
pub fn select_mode(
    preference: ModePreference,
    current_accuracy: Option<f64>,
    low_accuracy_threshold_meters: f64,
) -> OperatingMode {
    let accuracy_ok = current_accuracy
        .is_some_and(|accuracy| accuracy <= low_accuracy_threshold_meters);

    match preference {
        ModePreference::TimeOnly => OperatingMode::TimeOnly,
        _ if !accuracy_ok => OperatingMode::Degraded,
        ModePreference::Hybrid => OperatingMode::Hybrid,
        ModePreference::PositionOnly => OperatingMode::PositionOnly,
    }
}
