//! Per-mode arrival verdicts. Pure functions: no clock, no state.

use chrono::{DateTime, Duration, Utc};

use crate::fallback::state::clamp_confidence;
use crate::models::{GeoPoint, ScheduleDeviation, ScheduledArrival};

/// Schedule data is considered fairly reliable absent failures.
pub const TIME_ONLY_CONFIDENCE: f64 = 0.8;
/// Both sources must beat this before either one alone may trigger.
const FUSION_CONFIDENCE_FLOOR: f64 = 0.7;
const DEGRADED_TIME_WEIGHT: f64 = 0.8;
const DEGRADED_POSITION_WEIGHT: f64 = 0.2;
/// Distances below this are scored as if they were this far.
const CONFIDENCE_DISTANCE_FLOOR_METERS: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub should_notify: bool,
    pub confidence: f64,
    pub eta_seconds: Option<i64>,
    pub distance_meters: Option<f64>,
    pub reason: String,
}

impl Verdict {
    fn silent(reason: impl Into<String>) -> Self {
        Self {
            should_notify: false,
            confidence: 0.0,
            eta_seconds: None,
            distance_meters: None,
            reason: reason.into(),
        }
    }
}

/// A position usable for a position-based verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub point: GeoPoint,
    pub accuracy_meters: f64,
}

pub fn time_only(
    schedule: Option<&ScheduledArrival>,
    now: DateTime<Utc>,
    lead_time: Duration,
) -> Verdict {
    let Some(arrival) = schedule.and_then(ScheduledArrival::effective_arrival) else {
        return Verdict::silent("no schedule available");
    };

    let remaining = arrival - now;
    let remaining_secs = remaining.num_seconds();
    let should_notify = remaining <= lead_time && remaining > Duration::zero();

    let reason = if remaining <= Duration::zero() {
        format!("scheduled arrival passed {}s ago", -remaining_secs)
    } else if should_notify {
        format!(
            "scheduled arrival in {}s, within lead time of {}s",
            remaining_secs,
            lead_time.num_seconds()
        )
    } else {
        format!(
            "scheduled arrival in {}s, outside lead time of {}s",
            remaining_secs,
            lead_time.num_seconds()
        )
    };

    Verdict {
        should_notify,
        confidence: TIME_ONLY_CONFIDENCE,
        eta_seconds: Some(remaining_secs),
        distance_meters: None,
        reason,
    }
}

/// Scores a fix by how large its error is relative to the remaining distance.
pub fn position_confidence(accuracy_meters: f64, distance_meters: f64) -> f64 {
    let ratio = accuracy_meters.max(0.0) / distance_meters.max(CONFIDENCE_DISTANCE_FLOOR_METERS);
    if ratio.is_nan() {
        0.2
    } else if ratio < 0.1 {
        1.0
    } else if ratio < 0.3 {
        0.8
    } else if ratio < 0.5 {
        0.6
    } else if ratio < 1.0 {
        0.4
    } else {
        0.2
    }
}

pub fn position_only(
    fix: Option<PositionFix>,
    target: &GeoPoint,
    notify_radius_meters: f64,
    speed_mps: f64,
) -> Verdict {
    let Some(fix) = fix else {
        return Verdict::silent("no position estimate available");
    };

    let distance = fix.point.distance_to(target);
    let should_notify = distance <= notify_radius_meters;
    let eta_seconds = (speed_mps > 0.0).then(|| (distance / speed_mps).round() as i64);

    let reason = format!(
        "{:.0}m from target ({} notify radius {:.0}m, accuracy {:.0}m)",
        distance,
        if should_notify { "inside" } else { "outside" },
        notify_radius_meters,
        fix.accuracy_meters
    );

    Verdict {
        should_notify,
        confidence: position_confidence(fix.accuracy_meters, distance),
        eta_seconds,
        distance_meters: Some(distance),
        reason,
    }
}

/// Fuses the two sub-verdicts. When both are confident either may trigger;
/// otherwise the more confident one decides, the timetable winning ties.
pub fn hybrid(
    time: Verdict,
    position: Verdict,
    deviation_threshold: Duration,
) -> (Verdict, Option<ScheduleDeviation>) {
    let deviation = match (time.eta_seconds, position.eta_seconds) {
        (Some(time_eta), Some(position_eta)) => {
            let deviation_secs = time_eta - position_eta;
            Some(ScheduleDeviation {
                time_based_eta_secs: time_eta,
                position_based_eta_secs: position_eta,
                deviation_secs,
                significant: deviation_secs.abs() > deviation_threshold.num_seconds(),
            })
        }
        _ => None,
    };

    let both_confident =
        time.confidence > FUSION_CONFIDENCE_FLOOR && position.confidence > FUSION_CONFIDENCE_FLOOR;

    let verdict = if both_confident {
        let eta_seconds = match (time.eta_seconds, position.eta_seconds) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Verdict {
            should_notify: time.should_notify || position.should_notify,
            confidence: time.confidence.max(position.confidence),
            eta_seconds,
            distance_meters: position.distance_meters,
            reason: format!(
                "both sources confident; time: {}; position: {}",
                time.reason, position.reason
            ),
        }
    } else if position.confidence > time.confidence {
        Verdict {
            reason: format!(
                "position more confident ({:.2} vs {:.2}): {}",
                position.confidence, time.confidence, position.reason
            ),
            ..position
        }
    } else {
        Verdict {
            distance_meters: position.distance_meters,
            reason: format!(
                "schedule more confident ({:.2} vs {:.2}): {}",
                time.confidence, position.confidence, time.reason
            ),
            ..time
        }
    };

    (verdict, deviation)
}

/// Schedule-first verdict that still folds in a usable position at low weight.
/// `position` carries the position verdict and the trust in its source.
/// The position-table confidence is scaled by that trust before the
/// `0.8 * time + 0.2 * position` blend, so a weak estimate pulls less.
pub fn degraded(time: Verdict, position: Option<(Verdict, f64)>) -> Verdict {
    let Some((position, source_confidence)) = position else {
        return Verdict {
            reason: format!("degraded, schedule only: {}", time.reason),
            ..time
        };
    };

    let position_confidence = clamp_confidence(position.confidence * source_confidence);
    let confidence =
        DEGRADED_TIME_WEIGHT * time.confidence + DEGRADED_POSITION_WEIGHT * position_confidence;

    Verdict {
        should_notify: time.should_notify,
        confidence: clamp_confidence(confidence),
        eta_seconds: time.eta_seconds,
        distance_meters: position.distance_meters,
        reason: format!(
            "degraded, schedule with low-weight position ({:.2}): {}",
            position_confidence, time.reason
        ),
    }
}
