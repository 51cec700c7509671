use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::fallback::FallbackSnapshot;
use crate::models::{
    ActiveTarget, ApproachKey, Decision, OperatingMode, ScheduleDeviation, ScheduledArrival,
};
use crate::telemetry::TelemetrySink;

use super::config::DecisionConfig;
use super::evaluate::{self, PositionFix, Verdict};
use super::mode::select_mode;

/// Everything one tick needs, passed by value-like references.
pub struct DecisionInputs<'a> {
    pub target: &'a ActiveTarget,
    pub schedule: Option<&'a ScheduledArrival>,
    pub fallback: &'a FallbackSnapshot,
    pub now: DateTime<Utc>,
}

/// Produces one `Decision` per tick and guarantees at most one notifying
/// decision per approach event.
pub struct DecisionEngine {
    config: DecisionConfig,
    telemetry: Arc<dyn TelemetrySink>,
    notified: Option<ApproachKey>,
    last_mode: Option<OperatingMode>,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            config,
            telemetry,
            notified: None,
            last_mode: None,
        }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn has_notified(&self, key: &ApproachKey) -> bool {
        self.notified.as_ref() == Some(key)
    }

    /// Claims `key`. Any claim for an earlier approach is dropped.
    pub fn mark_notified(&mut self, key: ApproachKey) {
        self.notified = Some(key);
    }

    /// Forgets every claim and the last mode, e.g. after the target changes.
    pub fn reset(&mut self) {
        self.notified = None;
        self.last_mode = None;
    }

    /// Evaluates one tick. A notifying decision claims the approach key, so
    /// later ticks for the same approach come back with `should_notify = false`.
    pub fn evaluate(&mut self, inputs: &DecisionInputs<'_>) -> Decision {
        let key = inputs.target.key();

        let current_accuracy = inputs
            .fallback
            .current_sample
            .as_ref()
            .map(|sample| sample.accuracy_meters);
        let mode = select_mode(
            self.config.preference,
            current_accuracy,
            self.config.low_accuracy_threshold_meters,
        );
        if self.last_mode != Some(mode) {
            info!(
                "target {}: operating mode {} -> {}",
                key.target_id,
                self.last_mode.map_or("none", |m| m.as_str()),
                mode.as_str()
            );
            self.last_mode = Some(mode);
        }

        let (verdict, deviation) = self.verdict_for(mode, inputs);
        if let Some(deviation) = deviation.as_ref().filter(|d| d.significant) {
            warn!(
                "target {}: schedule and position disagree by {}s (schedule {}s, position {}s)",
                key.target_id,
                deviation.deviation_secs,
                deviation.time_based_eta_secs,
                deviation.position_based_eta_secs
            );
        }

        let mut decision = Decision {
            target_id: key.target_id.clone(),
            should_notify: verdict.should_notify,
            mode,
            confidence: verdict.confidence,
            eta_seconds: verdict.eta_seconds,
            distance_to_target: verdict.distance_meters,
            reason: verdict.reason,
            produced_at: inputs.now,
            deviation,
        };

        if decision.should_notify {
            if self.has_notified(&key) {
                debug!("target {}: trigger suppressed, approach already notified", key.target_id);
                self.telemetry.record_suppressed_duplicate(&key.target_id);
                decision.should_notify = false;
                decision.reason =
                    format!("already notified for this approach; {}", decision.reason);
            } else {
                self.mark_notified(key);
            }
        }

        self.telemetry.record_decision(&decision);
        decision
    }

    fn verdict_for(
        &self,
        mode: OperatingMode,
        inputs: &DecisionInputs<'_>,
    ) -> (Verdict, Option<ScheduleDeviation>) {
        let config = &self.config;
        let time = || evaluate::time_only(inputs.schedule, inputs.now, config.lead_time);
        let speed = inputs
            .fallback
            .speed_mps
            .filter(|speed| *speed > 0.0)
            .unwrap_or(config.assumed_speed_mps);
        let position = |fix: Option<PositionFix>| {
            evaluate::position_only(
                fix,
                &inputs.target.target.location,
                config.notify_radius_meters,
                speed,
            )
        };
        let live_fix = inputs.fallback.current_sample.as_ref().map(|sample| PositionFix {
            point: sample.point(),
            accuracy_meters: sample.accuracy_meters,
        });

        match mode {
            OperatingMode::TimeOnly => (time(), None),
            OperatingMode::PositionOnly => (position(live_fix), None),
            OperatingMode::Hybrid => {
                evaluate::hybrid(time(), position(live_fix), config.deviation_threshold)
            }
            OperatingMode::Degraded => {
                let estimate = &inputs.fallback.estimate;
                let usable = estimate.is_usable()
                    && estimate
                        .accuracy_meters
                        .is_some_and(|a| a < config.degraded_position_max_accuracy_meters);
                let blend = match (usable, estimate.point, estimate.accuracy_meters) {
                    (true, Some(point), Some(accuracy_meters)) => Some((
                        position(Some(PositionFix {
                            point,
                            accuracy_meters,
                        })),
                        estimate.confidence,
                    )),
                    _ => None,
                };
                (evaluate::degraded(time(), blend), None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{
        EstimateSource, FallbackState, FallbackStrategy, PositionEstimate, SignalHealth,
    };
    use crate::models::{GeoPoint, ModePreference, MonitorTarget, PositionSample};
    use crate::telemetry::{NoopTelemetry, StatsCollector};
    use chrono::Duration;
    use proptest::prelude::*;

    const STATION: GeoPoint = GeoPoint {
        latitude: 35.0,
        longitude: 139.0,
    };

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn target() -> ActiveTarget {
        ActiveTarget::assign(
            MonitorTarget {
                target_id: "kanda".into(),
                station_name: "Kanda".into(),
                location: STATION,
                leg_id: "leg-1".into(),
                transfer_to: None,
            },
            now(),
        )
    }

    fn meters_north(meters: f64) -> (f64, f64) {
        (STATION.latitude + meters / 111_195.0, STATION.longitude)
    }

    fn snapshot(sample: Option<PositionSample>, estimate: PositionEstimate) -> FallbackSnapshot {
        FallbackSnapshot {
            state: FallbackState::inactive(sample.clone()),
            health: SignalHealth::Normal,
            estimate,
            current_sample: sample,
            speed_mps: None,
            taken_at: now(),
        }
    }

    fn live(meters: f64, accuracy: f64) -> FallbackSnapshot {
        let (lat, lon) = meters_north(meters);
        let sample = PositionSample::new(lat, lon, accuracy, now());
        let estimate = PositionEstimate {
            source: EstimateSource::Live,
            point: Some(sample.point()),
            accuracy_meters: Some(accuracy),
            confidence: 1.0,
        };
        snapshot(Some(sample), estimate)
    }

    fn engine(preference: ModePreference, stats: &StatsCollector) -> DecisionEngine {
        let config = DecisionConfig {
            preference,
            ..DecisionConfig::default()
        };
        DecisionEngine::new(config, Arc::new(stats.clone()))
    }

    #[test]
    fn time_only_inside_lead_time_notifies() {
        let stats = StatsCollector::new();
        let mut engine = engine(ModePreference::TimeOnly, &stats);
        let target = target();
        let schedule = ScheduledArrival {
            time: now() + Duration::minutes(4),
            delay_minutes: 0,
        };
        let fallback = snapshot(None, PositionEstimate::unavailable());

        let decision = engine.evaluate(&DecisionInputs {
            target: &target,
            schedule: Some(&schedule),
            fallback: &fallback,
            now: now(),
        });

        assert!(decision.should_notify);
        assert_eq!(decision.mode, OperatingMode::TimeOnly);
        assert_eq!(decision.confidence, 0.8);
    }

    #[test]
    fn position_only_close_accurate_fix_notifies() {
        let stats = StatsCollector::new();
        let mut engine = engine(ModePreference::PositionOnly, &stats);
        let target = target();
        let fallback = live(300.0, 20.0);

        let decision = engine.evaluate(&DecisionInputs {
            target: &target,
            schedule: None,
            fallback: &fallback,
            now: now(),
        });

        assert!(decision.should_notify);
        assert_eq!(decision.mode, OperatingMode::PositionOnly);
        assert_eq!(decision.confidence, 1.0);
        assert!(decision.distance_to_target.is_some());
    }

    #[test]
    fn hybrid_reports_deviation() {
        let stats = StatsCollector::new();
        let mut engine = engine(ModePreference::Hybrid, &stats);
        let target = target();
        let schedule = ScheduledArrival {
            time: now() + Duration::minutes(20),
            delay_minutes: 0,
        };
        let fallback = live(300.0, 10.0);

        let decision = engine.evaluate(&DecisionInputs {
            target: &target,
            schedule: Some(&schedule),
            fallback: &fallback,
            now: now(),
        });

        assert_eq!(decision.mode, OperatingMode::Hybrid);
        assert!(decision.should_notify);
        let deviation = decision.deviation.unwrap();
        assert!(deviation.significant);
        assert!(deviation.deviation_secs > 0);
    }

    #[test]
    fn degraded_blends_fallback_estimate() {
        let stats = StatsCollector::new();
        let mut engine = engine(ModePreference::Hybrid, &stats);
        let target = target();
        let schedule = ScheduledArrival {
            time: now() + Duration::minutes(10),
            delay_minutes: 0,
        };
        let (lat, lon) = meters_north(300.0);
        let estimate = PositionEstimate {
            source: EstimateSource::Fallback(FallbackStrategy::StopSequenceInference),
            point: Some(GeoPoint::new(lat, lon)),
            accuracy_meters: Some(80.0),
            confidence: 0.7,
        };
        let fallback = snapshot(None, estimate);

        let decision = engine.evaluate(&DecisionInputs {
            target: &target,
            schedule: Some(&schedule),
            fallback: &fallback,
            now: now(),
        });

        assert_eq!(decision.mode, OperatingMode::Degraded);
        // position alone would fire; the schedule verdict wins
        assert!(!decision.should_notify);
        // ratio 80/300 scores 0.8, scaled by the estimate's 0.7
        let expected = 0.8 * 0.8 + 0.2 * (0.8 * 0.7);
        assert!((decision.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn second_trigger_for_same_approach_is_suppressed() {
        let stats = StatsCollector::new();
        let mut engine = engine(ModePreference::PositionOnly, &stats);
        let target = target();
        let fallback = live(100.0, 10.0);
        let inputs = DecisionInputs {
            target: &target,
            schedule: None,
            fallback: &fallback,
            now: now(),
        };

        assert!(engine.evaluate(&inputs).should_notify);
        let repeat = engine.evaluate(&inputs);
        assert!(!repeat.should_notify);
        assert!(repeat.reason.starts_with("already notified"));
        assert_eq!(stats.snapshot().suppressed_duplicates, 1);
        assert_eq!(stats.snapshot().decisions_evaluated, 2);
    }

    #[test]
    fn new_approach_event_can_notify_again() {
        let stats = StatsCollector::new();
        let mut engine = engine(ModePreference::PositionOnly, &stats);
        let first = target();
        let second = ActiveTarget::assign(first.target.clone(), now());
        let fallback = live(100.0, 10.0);

        for active in [&first, &second] {
            let decision = engine.evaluate(&DecisionInputs {
                target: active,
                schedule: None,
                fallback: &fallback,
                now: now(),
            });
            assert!(decision.should_notify);
        }
    }

    #[test]
    fn missing_everything_still_decides() {
        let stats = StatsCollector::new();
        let mut engine = engine(ModePreference::Hybrid, &stats);
        let target = target();
        let fallback = snapshot(None, PositionEstimate::unavailable());

        let decision = engine.evaluate(&DecisionInputs {
            target: &target,
            schedule: None,
            fallback: &fallback,
            now: now(),
        });

        assert_eq!(decision.mode, OperatingMode::Degraded);
        assert!(!decision.should_notify);
        assert_eq!(decision.confidence, 0.0);
    }

    proptest! {
        #[test]
        fn confidence_always_in_unit_range(
            meters in 0.0f64..20_000.0,
            accuracy in 0.0f64..2_000.0,
            minutes_out in -30i64..120,
            delay in 0i64..30,
            estimate_confidence in 0.0f64..=1.0,
            pref in 0u8..3,
        ) {
            let preference = match pref {
                0 => ModePreference::TimeOnly,
                1 => ModePreference::PositionOnly,
                _ => ModePreference::Hybrid,
            };
            let config = DecisionConfig {
                preference,
                ..DecisionConfig::default()
            };
            let mut engine = DecisionEngine::new(config, Arc::new(NoopTelemetry));
            let target = target();
            let schedule = ScheduledArrival {
                time: now() + Duration::minutes(minutes_out),
                delay_minutes: delay,
            };
            let mut fallback = live(meters, accuracy);
            fallback.estimate.confidence = estimate_confidence;

            let decision = engine.evaluate(&DecisionInputs {
                target: &target,
                schedule: Some(&schedule),
                fallback: &fallback,
                now: now(),
            });
            prop_assert!((0.0..=1.0).contains(&decision.confidence));
        }
    }
}
