use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{GeoPoint, PositionSample};

pub const STOP_PASS_CAPACITY: usize = 20;
pub const MANUAL_CONFIRMATION_CONFIDENCE: f64 = 0.8;
/// Radius assumed for a position inferred from a stop crossing: roughly one
/// platform length either side of the stop.
pub const STOP_FIX_ACCURACY_METERS: f64 = 80.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FallbackStrategy {
    LastKnownPosition,
    StopSequenceInference,
    ManualConfirmation,
    Blended,
}

impl FallbackStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackStrategy::LastKnownPosition => "LastKnownPosition",
            FallbackStrategy::StopSequenceInference => "StopSequenceInference",
            FallbackStrategy::ManualConfirmation => "ManualConfirmation",
            FallbackStrategy::Blended => "Blended",
        }
    }
}

/// Three-state view of positioning health. `Outage` and `Recovering` both
/// map to an active fallback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SignalHealth {
    Normal,
    Outage,
    Recovering,
}

impl Default for SignalHealth {
    fn default() -> Self {
        SignalHealth::Normal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FallbackState {
    pub active: bool,
    /// Set while active; `None` means no substitute has enough information.
    pub strategy: Option<FallbackStrategy>,
    pub confidence: f64,
    pub outage_started_at: Option<DateTime<Utc>>,
    pub last_good_position: Option<PositionSample>,
}

impl FallbackState {
    pub fn inactive(last_good_position: Option<PositionSample>) -> Self {
        Self {
            active: false,
            strategy: None,
            confidence: 1.0,
            outage_started_at: None,
            last_good_position,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StopPassRecord {
    pub stop_id: String,
    pub stop_name: String,
    pub observed_at: DateTime<Utc>,
    pub position: Option<GeoPoint>,
    pub confidence: f64,
}

/// Most recent stop crossings, oldest first, capped at `STOP_PASS_CAPACITY`.
#[derive(Debug, Clone, Default)]
pub struct StopPassHistory {
    records: VecDeque<StopPassRecord>,
}

impl StopPassHistory {
    pub fn new() -> Self {
        Self {
            records: VecDeque::with_capacity(STOP_PASS_CAPACITY),
        }
    }

    pub fn push(&mut self, mut record: StopPassRecord) {
        record.confidence = clamp_confidence(record.confidence);
        if self.records.len() == STOP_PASS_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn latest(&self) -> Option<&StopPassRecord> {
        self.records.back()
    }

    /// Newest record that carries a position.
    pub fn latest_positioned(&self) -> Option<(&StopPassRecord, GeoPoint)> {
        self.records
            .iter()
            .rev()
            .find_map(|record| record.position.map(|point| (record, point)))
    }

    pub fn recent_count(&self, now: DateTime<Utc>, window: Duration) -> usize {
        self.records
            .iter()
            .filter(|record| now - record.observed_at <= window)
            .count()
    }

    pub fn records(&self) -> Vec<StopPassRecord> {
        self.records.iter().cloned().collect()
    }
}

/// Where the best-effort position came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type", content = "strategy")]
pub enum EstimateSource {
    Live,
    Fallback(FallbackStrategy),
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionEstimate {
    pub source: EstimateSource,
    pub point: Option<GeoPoint>,
    pub accuracy_meters: Option<f64>,
    pub confidence: f64,
}

impl PositionEstimate {
    /// "No estimate available" is a valid output with zero confidence.
    pub fn unavailable() -> Self {
        Self {
            source: EstimateSource::Unavailable,
            point: None,
            accuracy_meters: None,
            confidence: 0.0,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.point.is_some() && self.confidence > 0.0
    }
}

/// Immutable view handed to the decision engine each tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FallbackSnapshot {
    pub state: FallbackState,
    pub health: SignalHealth,
    pub estimate: PositionEstimate,
    /// Newest sample if still inside the freshness window, whatever its accuracy.
    pub current_sample: Option<PositionSample>,
    /// Ground speed from the last two good samples, meters per second.
    pub speed_mps: Option<f64>,
    pub taken_at: DateTime<Utc>,
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn last_known_confidence(age: Duration) -> f64 {
    let secs = age.num_milliseconds().max(0) as f64 / 1000.0;
    if secs < 30.0 {
        0.8
    } else if secs < 60.0 {
        0.6
    } else if secs < 180.0 {
        0.4
    } else {
        0.2
    }
}

pub fn stop_sequence_confidence(recent_passes: usize) -> f64 {
    match recent_passes {
        n if n >= 3 => 0.7,
        2 => 0.5,
        _ => 0.3,
    }
}

/// Mean of the contributing confidences; 0.5 when only one side contributes.
pub fn blended_confidence(position_side: Option<f64>, stop_side: Option<f64>) -> f64 {
    match (position_side, stop_side) {
        (Some(a), Some(b)) => clamp_confidence((a + b) / 2.0),
        (Some(_), None) | (None, Some(_)) => 0.5,
        (None, None) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(id: usize, observed_at: DateTime<Utc>, position: Option<GeoPoint>) -> StopPassRecord {
        StopPassRecord {
            stop_id: format!("s{id}"),
            stop_name: format!("Stop {id}"),
            observed_at,
            position,
            confidence: 0.9,
        }
    }

    #[test]
    fn last_known_table() {
        assert_eq!(last_known_confidence(Duration::seconds(10)), 0.8);
        assert_eq!(last_known_confidence(Duration::seconds(30)), 0.6);
        assert_eq!(last_known_confidence(Duration::seconds(59)), 0.6);
        assert_eq!(last_known_confidence(Duration::seconds(120)), 0.4);
        assert_eq!(last_known_confidence(Duration::seconds(180)), 0.2);
    }

    #[test]
    fn stop_sequence_table() {
        assert_eq!(stop_sequence_confidence(0), 0.3);
        assert_eq!(stop_sequence_confidence(1), 0.3);
        assert_eq!(stop_sequence_confidence(2), 0.5);
        assert_eq!(stop_sequence_confidence(3), 0.7);
        assert_eq!(stop_sequence_confidence(12), 0.7);
    }

    #[test]
    fn blend_is_mean_or_half() {
        assert!((blended_confidence(Some(0.8), Some(0.4)) - 0.6).abs() < 1e-9);
        assert_eq!(blended_confidence(Some(0.8), None), 0.5);
        assert_eq!(blended_confidence(None, None), 0.0);
    }

    #[test]
    fn history_is_a_bounded_ring() {
        let now = Utc::now();
        let mut history = StopPassHistory::new();
        for i in 0..(STOP_PASS_CAPACITY + 3) {
            history.push(pass(i, now, None));
        }
        assert_eq!(history.len(), STOP_PASS_CAPACITY);
        assert_eq!(history.records()[0].stop_id, "s3");
        assert_eq!(history.latest().map(|r| r.stop_id.as_str()), Some("s22"));
    }

    #[test]
    fn history_clamps_reported_confidence() {
        let mut history = StopPassHistory::new();
        let mut record = pass(0, Utc::now(), None);
        record.confidence = 4.0;
        history.push(record);
        assert_eq!(history.latest().map(|r| r.confidence), Some(1.0));
    }

    #[test]
    fn latest_positioned_skips_records_without_position() {
        let now = Utc::now();
        let mut history = StopPassHistory::new();
        history.push(pass(0, now, Some(GeoPoint::new(1.0, 2.0))));
        history.push(pass(1, now, None));
        let (record, point) = history.latest_positioned().unwrap();
        assert_eq!(record.stop_id, "s0");
        assert_eq!(point, GeoPoint::new(1.0, 2.0));
    }

    #[test]
    fn recent_count_respects_window() {
        let now = Utc::now();
        let mut history = StopPassHistory::new();
        history.push(pass(0, now - Duration::minutes(10), None));
        history.push(pass(1, now - Duration::minutes(2), None));
        history.push(pass(2, now - Duration::seconds(20), None));
        assert_eq!(history.recent_count(now, Duration::minutes(5)), 2);
    }
}
