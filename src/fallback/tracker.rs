//! Pure outage state machine. Every method takes `now` explicitly; the async
//! controller owns the clock and the polling cadence.

use chrono::{DateTime, Utc};

use crate::models::{GeoPoint, PositionSample};

use super::config::FallbackConfig;
use super::state::{
    blended_confidence, last_known_confidence, stop_sequence_confidence, EstimateSource,
    FallbackSnapshot, FallbackState, FallbackStrategy, PositionEstimate, SignalHealth,
    StopPassHistory, StopPassRecord, MANUAL_CONFIRMATION_CONFIDENCE, STOP_FIX_ACCURACY_METERS,
};

/// Speeds above this between two fixes are treated as a bad fix, not motion.
const MAX_PLAUSIBLE_SPEED_MPS: f64 = 120.0;

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackTransition {
    OutageStarted {
        strategy: Option<FallbackStrategy>,
    },
    StrategyChanged {
        from: Option<FallbackStrategy>,
        to: Option<FallbackStrategy>,
    },
    /// A good sample arrived but auto-recovery is off.
    AwaitingDismissal,
    Recovered,
}

#[derive(Debug, Clone)]
struct ManualFix {
    stop_name: String,
    point: Option<GeoPoint>,
}

#[derive(Debug, Clone)]
pub struct FallbackTracker {
    config: FallbackConfig,
    health: SignalHealth,
    strategy: Option<FallbackStrategy>,
    outage_started_at: Option<DateTime<Utc>>,
    last_good: Option<PositionSample>,
    previous_good: Option<PositionSample>,
    latest_sample: Option<PositionSample>,
    /// Outage timer starts from here when no good sample has been seen since.
    baseline: DateTime<Utc>,
    history: StopPassHistory,
    manual: Option<ManualFix>,
}

impl FallbackTracker {
    pub fn new(config: FallbackConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            health: SignalHealth::Normal,
            strategy: None,
            outage_started_at: None,
            last_good: None,
            previous_good: None,
            latest_sample: None,
            baseline: now,
            history: StopPassHistory::new(),
            manual: None,
        }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    pub fn health(&self) -> SignalHealth {
        self.health
    }

    pub fn is_active(&self) -> bool {
        self.health != SignalHealth::Normal
    }

    pub fn manual_stop_name(&self) -> Option<&str> {
        self.manual.as_ref().map(|fix| fix.stop_name.as_str())
    }

    pub fn stop_passes(&self) -> Vec<StopPassRecord> {
        self.history.records()
    }

    /// Restarts the outage timer, e.g. when monitoring (re)starts.
    pub fn reset_baseline(&mut self, now: DateTime<Utc>) {
        self.baseline = now;
    }

    pub fn observe_sample(
        &mut self,
        sample: PositionSample,
        now: DateTime<Utc>,
    ) -> Option<FallbackTransition> {
        let is_newest = self
            .latest_sample
            .as_ref()
            .map_or(true, |latest| sample.captured_at >= latest.captured_at);
        if is_newest {
            self.latest_sample = Some(sample.clone());
        }

        let good = sample.is_fresh(now, self.config.freshness_window)
            && sample.is_accurate_within(self.config.accuracy_bound_meters);
        if !good {
            return None;
        }

        let newer_than_good = self
            .last_good
            .as_ref()
            .map_or(true, |last| sample.captured_at > last.captured_at);
        if !newer_than_good {
            return None;
        }
        self.previous_good = self.last_good.replace(sample);

        match self.health {
            SignalHealth::Normal | SignalHealth::Recovering => None,
            SignalHealth::Outage if self.manual.is_some() => None,
            SignalHealth::Outage if self.config.auto_recovery => {
                self.recover();
                Some(FallbackTransition::Recovered)
            }
            SignalHealth::Outage => {
                self.health = SignalHealth::Recovering;
                Some(FallbackTransition::AwaitingDismissal)
            }
        }
    }

    /// Outage detection and strategy refresh; called once per polling tick.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<FallbackTransition> {
        if self.health == SignalHealth::Normal {
            let last_fresh = match &self.last_good {
                Some(sample) => sample.captured_at.max(self.baseline),
                None => self.baseline,
            };
            if now - last_fresh < self.config.outage_threshold {
                return None;
            }

            self.health = SignalHealth::Outage;
            self.outage_started_at = Some(now);
            self.strategy = self.select_strategy(now);
            return Some(FallbackTransition::OutageStarted {
                strategy: self.strategy,
            });
        }

        let before = self.strategy;
        self.strategy = self.select_strategy(now);
        if before != self.strategy {
            Some(FallbackTransition::StrategyChanged {
                from: before,
                to: self.strategy,
            })
        } else {
            None
        }
    }

    pub fn report_stop_crossing(&mut self, record: StopPassRecord, now: DateTime<Utc>) {
        self.history.push(record);
        if self.is_active() {
            self.strategy = self.select_strategy(now);
        }
    }

    /// Explicit user input; pins `ManualConfirmation` until cleared.
    pub fn confirm_manually(
        &mut self,
        stop_name: String,
        point: Option<GeoPoint>,
        now: DateTime<Utc>,
    ) -> Option<FallbackTransition> {
        self.manual = Some(ManualFix { stop_name, point });

        if self.health == SignalHealth::Normal {
            self.health = SignalHealth::Outage;
            self.outage_started_at = Some(now);
            self.strategy = Some(FallbackStrategy::ManualConfirmation);
            return Some(FallbackTransition::OutageStarted {
                strategy: self.strategy,
            });
        }

        let before = self.strategy.replace(FallbackStrategy::ManualConfirmation);
        (before != self.strategy).then_some(FallbackTransition::StrategyChanged {
            from: before,
            to: self.strategy,
        })
    }

    pub fn clear_manual_confirmation(&mut self, now: DateTime<Utc>) -> Option<FallbackTransition> {
        self.manual.take()?;

        if !self.is_active() {
            return None;
        }

        let has_fresh_good = self
            .last_good
            .as_ref()
            .is_some_and(|sample| sample.is_fresh(now, self.config.freshness_window));
        if has_fresh_good && self.config.auto_recovery {
            self.recover();
            return Some(FallbackTransition::Recovered);
        }

        let before = self.strategy;
        self.strategy = self.select_strategy(now);
        (before != self.strategy).then_some(FallbackTransition::StrategyChanged {
            from: before,
            to: self.strategy,
        })
    }

    /// Manual dismissal of an outage; the outage timer restarts from `now`.
    pub fn dismiss(&mut self, now: DateTime<Utc>) -> Option<FallbackTransition> {
        if !self.is_active() {
            return None;
        }
        self.manual = None;
        self.recover();
        self.baseline = now;
        Some(FallbackTransition::Recovered)
    }

    pub fn state(&self, now: DateTime<Utc>) -> FallbackState {
        if !self.is_active() {
            return FallbackState::inactive(self.last_good.clone());
        }

        FallbackState {
            active: true,
            strategy: self.strategy,
            confidence: self.estimate(now).confidence,
            outage_started_at: self.outage_started_at,
            last_good_position: self.last_good.clone(),
        }
    }

    pub fn estimate(&self, now: DateTime<Utc>) -> PositionEstimate {
        if self.is_active() {
            return match self.strategy {
                Some(strategy) => self.substitute(strategy, now),
                None => PositionEstimate::unavailable(),
            };
        }

        let fresh_good = self
            .last_good
            .as_ref()
            .filter(|sample| sample.is_fresh(now, self.config.freshness_window));
        if let Some(sample) = fresh_good.or_else(|| self.current_sample(now)) {
            return PositionEstimate {
                source: EstimateSource::Live,
                point: Some(sample.point()),
                accuracy_meters: Some(sample.accuracy_meters),
                confidence: 1.0,
            };
        }

        match &self.last_good {
            Some(sample) => PositionEstimate {
                source: EstimateSource::Live,
                point: Some(sample.point()),
                accuracy_meters: Some(sample.accuracy_meters),
                confidence: last_known_confidence(sample.age(now)),
            },
            None => PositionEstimate::unavailable(),
        }
    }

    pub fn current_sample(&self, now: DateTime<Utc>) -> Option<&PositionSample> {
        self.latest_sample
            .as_ref()
            .filter(|sample| sample.is_fresh(now, self.config.freshness_window))
    }

    pub fn speed_mps(&self, now: DateTime<Utc>) -> Option<f64> {
        let (previous, last) = (self.previous_good.as_ref()?, self.last_good.as_ref()?);
        if last.age(now) >= self.config.outage_threshold {
            return None;
        }

        let elapsed = (last.captured_at - previous.captured_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return None;
        }

        let speed = previous.point().distance_to(&last.point()) / elapsed;
        (speed.is_finite() && speed <= MAX_PLAUSIBLE_SPEED_MPS).then_some(speed)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> FallbackSnapshot {
        FallbackSnapshot {
            state: self.state(now),
            health: self.health,
            estimate: self.estimate(now),
            current_sample: self.current_sample(now).cloned(),
            speed_mps: self.speed_mps(now),
            taken_at: now,
        }
    }

    fn recover(&mut self) {
        self.health = SignalHealth::Normal;
        self.strategy = None;
        self.outage_started_at = None;
    }

    fn select_strategy(&self, now: DateTime<Utc>) -> Option<FallbackStrategy> {
        if self.manual.is_some() {
            return Some(FallbackStrategy::ManualConfirmation);
        }

        let recent_position = self
            .last_good
            .as_ref()
            .is_some_and(|sample| sample.age(now) < self.config.last_known_max_age);
        let has_history = !self.history.is_empty();

        match (recent_position, has_history, self.last_good.is_some()) {
            (true, true, _) => Some(FallbackStrategy::Blended),
            (true, false, _) => Some(FallbackStrategy::LastKnownPosition),
            (false, true, _) => Some(FallbackStrategy::StopSequenceInference),
            (false, false, true) => Some(FallbackStrategy::LastKnownPosition),
            (false, false, false) => None,
        }
    }

    fn substitute(&self, strategy: FallbackStrategy, now: DateTime<Utc>) -> PositionEstimate {
        match strategy {
            FallbackStrategy::LastKnownPosition => self
                .last_known_estimate(now)
                .unwrap_or_else(PositionEstimate::unavailable),
            FallbackStrategy::StopSequenceInference => self
                .stop_sequence_estimate(now)
                .unwrap_or_else(PositionEstimate::unavailable),
            FallbackStrategy::ManualConfirmation => {
                let point = self.manual.as_ref().and_then(|fix| fix.point);
                PositionEstimate {
                    source: EstimateSource::Fallback(FallbackStrategy::ManualConfirmation),
                    point,
                    accuracy_meters: point.map(|_| STOP_FIX_ACCURACY_METERS),
                    confidence: MANUAL_CONFIRMATION_CONFIDENCE,
                }
            }
            FallbackStrategy::Blended => self.blended_estimate(now),
        }
    }

    fn last_known_estimate(&self, now: DateTime<Utc>) -> Option<PositionEstimate> {
        self.last_good.as_ref().map(|sample| PositionEstimate {
            source: EstimateSource::Fallback(FallbackStrategy::LastKnownPosition),
            point: Some(sample.point()),
            accuracy_meters: Some(sample.accuracy_meters),
            confidence: last_known_confidence(sample.age(now)),
        })
    }

    fn stop_sequence_estimate(&self, now: DateTime<Utc>) -> Option<PositionEstimate> {
        if self.history.is_empty() {
            return None;
        }

        let recent = self
            .history
            .recent_count(now, self.config.recent_stop_window);
        let point = self.history.latest_positioned().map(|(_, point)| point);

        Some(PositionEstimate {
            source: EstimateSource::Fallback(FallbackStrategy::StopSequenceInference),
            point,
            accuracy_meters: point.map(|_| STOP_FIX_ACCURACY_METERS),
            confidence: stop_sequence_confidence(recent),
        })
    }

    /// Midpoint of the last-known and stop-inferred positions.
    fn blended_estimate(&self, now: DateTime<Utc>) -> PositionEstimate {
        let positioned = |estimate: Option<PositionEstimate>| {
            estimate.and_then(|e| e.point.map(|point| (point, e.accuracy_meters, e.confidence)))
        };
        let last_known = positioned(self.last_known_estimate(now));
        let inferred = positioned(self.stop_sequence_estimate(now));

        let (point, accuracy_meters) = match (last_known, inferred) {
            (Some((a, acc_a, _)), Some((b, acc_b, _))) => {
                let accuracy = match (acc_a, acc_b) {
                    (Some(x), Some(y)) => Some(x.max(y)),
                    (x, y) => x.or(y),
                };
                (Some(a.midpoint(&b)), accuracy)
            }
            (Some((point, accuracy, _)), None) | (None, Some((point, accuracy, _))) => {
                (Some(point), accuracy)
            }
            (None, None) => (None, None),
        };

        PositionEstimate {
            source: EstimateSource::Fallback(FallbackStrategy::Blended),
            point,
            accuracy_meters,
            confidence: blended_confidence(
                last_known.map(|(_, _, c)| c),
                inferred.map(|(_, _, c)| c),
            ),
        }
    }
}
