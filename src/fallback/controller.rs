use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::models::{GeoPoint, PositionSample};
use crate::telemetry::{FallbackEvent, TelemetrySink};

use super::config::FallbackConfig;
use super::state::{FallbackSnapshot, FallbackState, StopPassRecord};
use super::tracker::{FallbackTracker, FallbackTransition};

struct OutagePoller {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Owns the fallback state and the outage-polling task. All mutation goes
/// through this type; readers get value snapshots.
#[derive(Clone)]
pub struct FallbackController {
    tracker: Arc<Mutex<FallbackTracker>>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn TelemetrySink>,
    poll_interval: Duration,
    poller: Arc<Mutex<Option<OutagePoller>>>,
}

impl FallbackController {
    pub fn new(
        config: FallbackConfig,
        poll_interval: Duration,
        clock: Arc<dyn Clock>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let tracker = FallbackTracker::new(config, clock.now());
        Self {
            tracker: Arc::new(Mutex::new(tracker)),
            clock,
            telemetry,
            poll_interval,
            poller: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut poller = self.poller.lock().await;
        if poller.is_some() {
            bail!("fallback polling already active");
        }

        self.tracker.lock().await.reset_baseline(self.clock.now());

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(outage_loop(self.clone(), cancel_token.clone()));
        *poller = Some(OutagePoller {
            handle,
            cancel_token,
        });

        info!(
            "fallback polling started (every {}ms)",
            self.poll_interval.as_millis()
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let Some(poller) = self.poller.lock().await.take() else {
            return Ok(());
        };

        poller.cancel_token.cancel();
        poller
            .handle
            .await
            .context("fallback polling task failed to join")
    }

    pub async fn is_running(&self) -> bool {
        self.poller.lock().await.is_some()
    }

    pub async fn observe_sample(&self, sample: PositionSample) {
        let now = self.clock.now();
        let transition = self.tracker.lock().await.observe_sample(sample, now);
        self.announce(transition);
    }

    /// Runs one outage check immediately.
    pub async fn poll(&self) {
        let now = self.clock.now();
        let transition = self.tracker.lock().await.poll(now);
        self.announce(transition);
    }

    pub async fn report_stop_crossing(
        &self,
        stop_id: impl Into<String>,
        stop_name: impl Into<String>,
        position: Option<GeoPoint>,
        confidence: f64,
    ) {
        let now = self.clock.now();
        let record = StopPassRecord {
            stop_id: stop_id.into(),
            stop_name: stop_name.into(),
            observed_at: now,
            position,
            confidence,
        };
        debug!("stop crossing reported: {} ({})", record.stop_name, record.stop_id);
        self.tracker.lock().await.report_stop_crossing(record, now);
    }

    pub async fn confirm_manually(&self, stop_name: impl Into<String>, position: Option<GeoPoint>) {
        let now = self.clock.now();
        let stop_name = stop_name.into();
        info!("manual position confirmation at {stop_name}");
        let transition = self
            .tracker
            .lock()
            .await
            .confirm_manually(stop_name, position, now);
        self.announce(transition);
    }

    pub async fn clear_manual_confirmation(&self) {
        let now = self.clock.now();
        let transition = self.tracker.lock().await.clear_manual_confirmation(now);
        self.announce(transition);
    }

    pub async fn dismiss_outage(&self) {
        let now = self.clock.now();
        let transition = self.tracker.lock().await.dismiss(now);
        self.announce(transition);
    }

    pub async fn state(&self) -> FallbackState {
        let now = self.clock.now();
        self.tracker.lock().await.state(now)
    }

    pub async fn snapshot(&self) -> FallbackSnapshot {
        let now = self.clock.now();
        self.tracker.lock().await.snapshot(now)
    }

    pub async fn stop_passes(&self) -> Vec<StopPassRecord> {
        self.tracker.lock().await.stop_passes()
    }

    fn announce(&self, transition: Option<FallbackTransition>) {
        let Some(transition) = transition else {
            return;
        };

        match transition {
            FallbackTransition::OutageStarted { strategy } => {
                warn!(
                    "positioning outage detected; fallback strategy {}",
                    strategy.map_or("none (no estimate available)", |s| s.as_str())
                );
                self.telemetry.record_fallback(FallbackEvent::Activated);
            }
            FallbackTransition::StrategyChanged { from, to } => {
                info!(
                    "fallback strategy {} -> {}",
                    from.map_or("none", |s| s.as_str()),
                    to.map_or("none", |s| s.as_str())
                );
            }
            FallbackTransition::AwaitingDismissal => {
                info!("positioning restored; waiting for manual dismissal of the outage");
            }
            FallbackTransition::Recovered => {
                info!("positioning recovered; fallback inactive");
                self.telemetry.record_fallback(FallbackEvent::Recovered);
            }
        }
    }
}

async fn outage_loop(controller: FallbackController, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(controller.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => controller.poll().await,
            _ = cancel_token.cancelled() => {
                debug!("fallback polling loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::fallback::state::FallbackStrategy;
    use crate::telemetry::StatsCollector;

    fn controller(stats: &StatsCollector) -> FallbackController {
        FallbackController::new(
            FallbackConfig::default(),
            Duration::from_secs(5),
            Arc::new(TokioClock::new()),
            Arc::new(stats.clone()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn outage_is_flagged_within_one_polling_tick() {
        let stats = StatsCollector::new();
        let fallback = controller(&stats);
        fallback.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(!fallback.state().await.active);

        // threshold is 30s; the 5s poll must flag it no later than 35s
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(fallback.state().await.active);
        assert_eq!(stats.snapshot().fallback_activations, 1);

        fallback.stop().await.unwrap();
        assert!(!fallback.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_sample_ends_outage() {
        let stats = StatsCollector::new();
        let clock = TokioClock::new();
        let fallback = FallbackController::new(
            FallbackConfig::default(),
            Duration::from_secs(5),
            Arc::new(clock),
            Arc::new(stats.clone()),
        );
        fallback.start().await.unwrap();
        fallback
            .report_stop_crossing("s1", "Kanda", None, 0.9)
            .await;

        tokio::time::sleep(Duration::from_secs(36)).await;
        let state = fallback.state().await;
        assert!(state.active);
        assert_eq!(state.strategy, Some(FallbackStrategy::StopSequenceInference));

        fallback
            .observe_sample(PositionSample::new(35.0, 139.0, 12.0, clock.now()))
            .await;
        let state = fallback.state().await;
        assert!(!state.active);
        assert!(state.outage_started_at.is_none());
        assert_eq!(stats.snapshot().fallback_recoveries, 1);

        fallback.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_dismissal_ends_outage_without_auto_recovery() {
        let stats = StatsCollector::new();
        let clock = TokioClock::new();
        let fallback = FallbackController::new(
            FallbackConfig {
                auto_recovery: false,
                ..FallbackConfig::default()
            },
            Duration::from_secs(5),
            Arc::new(clock),
            Arc::new(stats.clone()),
        );
        fallback.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(36)).await;

        fallback
            .observe_sample(PositionSample::new(35.0, 139.0, 12.0, clock.now()))
            .await;
        let snapshot = fallback.snapshot().await;
        assert_eq!(snapshot.health, crate::fallback::SignalHealth::Recovering);
        assert!(snapshot.state.active);

        fallback.dismiss_outage().await;
        assert!(!fallback.state().await.active);
        assert_eq!(stats.snapshot().fallback_recoveries, 1);

        fallback.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_confirmation_pins_fallback_until_cleared() {
        let clock = TokioClock::new();
        let fallback = FallbackController::new(
            FallbackConfig::default(),
            Duration::from_secs(5),
            Arc::new(clock),
            Arc::new(StatsCollector::new()),
        );
        fallback
            .observe_sample(PositionSample::new(35.0, 139.0, 12.0, clock.now()))
            .await;

        fallback
            .confirm_manually("Ochanomizu", Some(GeoPoint::new(35.70, 139.77)))
            .await;
        let state = fallback.state().await;
        assert!(state.active);
        assert_eq!(state.strategy, Some(FallbackStrategy::ManualConfirmation));

        fallback.clear_manual_confirmation().await;
        assert!(!fallback.state().await.active);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let fallback = controller(&StatsCollector::new());
        fallback.start().await.unwrap();
        assert!(fallback.start().await.is_err());
        fallback.stop().await.unwrap();
        fallback.stop().await.unwrap();
    }
}
