use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::decision::{DecisionEngine, DecisionInputs};
use crate::delivery::{ChannelRegistry, DeliveryManager};
use crate::fallback::FallbackController;
use crate::models::{
    ActiveTarget, ApproachKey, Decision, DeliveryReport, MonitorTarget, Notification,
    NotificationPayload,
};
use crate::sources::{
    compose_message, HistoryStore, MessageGenerator, MessageStyle, PositionSource, ScheduleSource,
};
use crate::telemetry::TelemetrySink;

use super::config::MonitorConfig;
use super::state::MonitorState;

const EVENT_CAPACITY: usize = 64;
/// Arrival alerts closer than this are sent in the urgent style.
const URGENT_ETA_SECONDS: i64 = 60;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Collaborators injected into the monitor.
pub struct MonitorDeps {
    pub clock: Arc<dyn Clock>,
    pub position_source: Arc<dyn PositionSource>,
    pub schedule_source: Arc<dyn ScheduleSource>,
    pub channels: ChannelRegistry,
    pub message_generator: Option<Arc<dyn MessageGenerator>>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub history: Option<Arc<dyn HistoryStore>>,
}

struct Ticker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// One monitoring session: owns the decision ticker, the fallback
/// controller, delivery tasks, snooze timers and the monitored target.
#[derive(Clone)]
pub struct MonitorController {
    config: Arc<MonitorConfig>,
    state: Arc<Mutex<MonitorState>>,
    /// Held for the whole of a tick, so ticks never overlap.
    engine: Arc<Mutex<DecisionEngine>>,
    fallback: FallbackController,
    delivery: DeliveryManager,
    clock: Arc<dyn Clock>,
    position_source: Arc<dyn PositionSource>,
    schedule_source: Arc<dyn ScheduleSource>,
    message_generator: Option<Arc<dyn MessageGenerator>>,
    history: Option<Arc<dyn HistoryStore>>,
    target: Arc<watch::Sender<Option<ActiveTarget>>>,
    ticker: Arc<Mutex<Option<Ticker>>>,
    session: Arc<StdMutex<CancellationToken>>,
    snooze: Arc<StdMutex<CancellationToken>>,
    tasks: Arc<StdMutex<Vec<JoinHandle<()>>>>,
    decisions: broadcast::Sender<Decision>,
    deliveries: broadcast::Sender<DeliveryReport>,
}

impl MonitorController {
    pub fn new(config: MonitorConfig, deps: MonitorDeps) -> Self {
        let fallback = FallbackController::new(
            config.fallback.clone(),
            config.fallback_poll_interval,
            deps.clock.clone(),
            deps.telemetry.clone(),
        );
        let delivery =
            DeliveryManager::new(deps.channels, deps.clock.clone(), deps.telemetry.clone())
                .with_retention(config.delivery_retention);
        let engine = DecisionEngine::new(config.decision.clone(), deps.telemetry);

        let (target, _) = watch::channel(None);
        let (decisions, _) = broadcast::channel(EVENT_CAPACITY);
        let (deliveries, _) = broadcast::channel(EVENT_CAPACITY);
        let session = CancellationToken::new();
        let snooze = session.child_token();

        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(MonitorState::new())),
            engine: Arc::new(Mutex::new(engine)),
            fallback,
            delivery,
            clock: deps.clock,
            position_source: deps.position_source,
            schedule_source: deps.schedule_source,
            message_generator: deps.message_generator,
            history: deps.history,
            target: Arc::new(target),
            ticker: Arc::new(Mutex::new(None)),
            session: Arc::new(StdMutex::new(session)),
            snooze: Arc::new(StdMutex::new(snooze)),
            tasks: Arc::new(StdMutex::new(Vec::new())),
            decisions,
            deliveries,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn fallback(&self) -> &FallbackController {
        &self.fallback
    }

    pub fn delivery(&self) -> &DeliveryManager {
        &self.delivery
    }

    /// Fired once per tick.
    pub fn subscribe_decisions(&self) -> broadcast::Receiver<Decision> {
        self.decisions.subscribe()
    }

    /// Fired once per finished delivery, abandoned ones included.
    pub fn subscribe_deliveries(&self) -> broadcast::Receiver<DeliveryReport> {
        self.deliveries.subscribe()
    }

    pub fn subscribe_target(&self) -> watch::Receiver<Option<ActiveTarget>> {
        self.target.subscribe()
    }

    pub fn current_target(&self) -> Option<ActiveTarget> {
        self.target.borrow().clone()
    }

    pub async fn snapshot(&self) -> MonitorState {
        self.state.lock().await.clone()
    }

    pub async fn is_monitoring(&self) -> bool {
        self.state.lock().await.is_monitoring()
    }

    pub async fn start(&self, target: MonitorTarget) -> Result<ActiveTarget> {
        let mut ticker = self.ticker.lock().await;
        if ticker.is_some() {
            bail!("monitoring already active");
        }

        let now = self.clock.now();
        let active = ActiveTarget::assign(target, now);
        {
            let mut engine = self.engine.lock().await;
            engine.reset();
            self.target.send_replace(Some(active.clone()));
        }

        let session = CancellationToken::new();
        *lock(&self.snooze) = session.child_token();
        *lock(&self.session) = session;
        self.state.lock().await.begin(active.clone(), now);

        if let Err(err) = self.fallback.start().await {
            self.state.lock().await.stop();
            self.target.send_replace(None);
            return Err(err.context("failed to start fallback polling"));
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(decision_loop(self.clone(), cancel_token.clone()));
        *ticker = Some(Ticker {
            handle,
            cancel_token,
        });

        info!(
            "monitoring {} ({}) every {}s, approach {}",
            active.target.target_id,
            active.target.station_name,
            self.config.decision_interval.as_secs(),
            active.approach_event_id
        );
        Ok(active)
    }

    /// Cancels the decision ticker, fallback polling, snooze timers and any
    /// in-flight delivery. Channels that already succeeded stay successful.
    pub async fn stop(&self) -> Result<()> {
        let Some(ticker) = self.ticker.lock().await.take() else {
            return Ok(());
        };

        ticker.cancel_token.cancel();
        let joined = ticker
            .handle
            .await
            .context("decision loop failed to join");

        self.fallback
            .stop()
            .await
            .context("failed to stop fallback polling")?;

        lock(&self.session).cancel();
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(err) = task.await {
                error!("monitor background task failed: {err}");
            }
        }

        self.target.send_replace(None);
        let ticks = {
            let mut state = self.state.lock().await;
            let ticks = state.ticks;
            state.stop();
            ticks
        };

        info!("monitoring stopped after {ticks} decision tick(s)");
        joined
    }

    /// Replaces the monitored target. The new target gets a fresh approach
    /// event, so it may notify even if the previous one already did.
    pub async fn change_target(&self, target: MonitorTarget) -> Result<ActiveTarget> {
        if !self.is_monitoring().await {
            bail!("cannot change target while monitoring is idle");
        }

        let mut engine = self.engine.lock().await;
        let active = ActiveTarget::assign(target, self.clock.now());
        let previous = self.target.send_replace(Some(active.clone()));
        engine.reset();

        {
            let session = lock(&self.session).clone();
            let mut snooze = lock(&self.snooze);
            snooze.cancel();
            *snooze = session.child_token();
        }
        self.state.lock().await.retarget(active.clone());
        drop(engine);

        info!(
            "monitored target {} -> {}, approach {}",
            previous.map_or_else(|| "none".to_string(), |p| p.target.target_id),
            active.target.target_id,
            active.approach_event_id
        );
        Ok(active)
    }

    /// Schedules a gentle re-alert for the current target. Returns how many
    /// snoozes the target has had.
    pub async fn snooze(&self) -> Result<u32> {
        let (target, count) = {
            let mut state = self.state.lock().await;
            if !state.is_monitoring() {
                bail!("cannot snooze while monitoring is idle");
            }
            let target = state
                .target
                .clone()
                .ok_or_else(|| anyhow!("no monitored target to snooze"))?;
            state.snooze_count += 1;
            (target, state.snooze_count)
        };

        let payload = NotificationPayload::Snooze {
            target_id: target.target.target_id.clone(),
            station_name: target.target.station_name.clone(),
            snooze_minutes: self.config.snooze_minutes,
            snooze_count: count,
        };
        let key = target.key();
        let snooze_token = lock(&self.snooze).clone();
        let delivery_token = lock(&self.session).child_token();
        let delay = self.config.snooze_duration();

        let controller = self.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = snooze_token.cancelled() => {
                    debug!("snooze for {} cancelled", key.target_id);
                }
                _ = tokio::time::sleep(delay) => {
                    controller.run_delivery(payload, key, delivery_token).await;
                }
            }
        });
        self.track(handle);

        info!(
            "snoozed {} for {} min (snooze #{count})",
            target.target.target_id, self.config.snooze_minutes
        );
        Ok(count)
    }

    /// Runs one decision tick immediately. `None` when idle.
    pub async fn evaluate_now(&self) -> Option<Decision> {
        self.tick().await
    }

    async fn tick(&self) -> Option<Decision> {
        let mut engine = self.engine.lock().await;
        let target = self.current_target()?;

        if let Some(sample) = self.position_source.current_position().await {
            self.fallback.observe_sample(sample).await;
        }
        let schedule = self
            .schedule_source
            .scheduled_arrival(&target.target.leg_id)
            .await;
        let fallback = self.fallback.snapshot().await;
        let now = self.clock.now();

        let decision = engine.evaluate(&DecisionInputs {
            target: &target,
            schedule: schedule.as_ref(),
            fallback: &fallback,
            now,
        });
        debug!(
            "target {}: mode {} notify={} confidence {:.2} ({})",
            decision.target_id,
            decision.mode.as_str(),
            decision.should_notify,
            decision.confidence,
            decision.reason
        );

        self.state.lock().await.record_decision(decision.clone());
        let _ = self.decisions.send(decision.clone());
        self.persist_decision(&decision);

        if decision.should_notify {
            self.dispatch_arrival(&target, &decision);
        }
        self.delivery.prune_expired(now);

        Some(decision)
    }

    fn dispatch_arrival(&self, target: &ActiveTarget, decision: &Decision) {
        let payload = match &target.target.transfer_to {
            Some(next_line) => NotificationPayload::Transfer {
                target_id: target.target.target_id.clone(),
                station_name: target.target.station_name.clone(),
                next_line: next_line.clone(),
                approach_event_id: target.approach_event_id,
                eta_seconds: decision.eta_seconds,
            },
            None => NotificationPayload::Arrival {
                target_id: target.target.target_id.clone(),
                station_name: target.target.station_name.clone(),
                approach_event_id: target.approach_event_id,
                eta_seconds: decision.eta_seconds,
            },
        };

        let key = target.key();
        let cancel = lock(&self.session).child_token();
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            controller.run_delivery(payload, key, cancel).await;
        });
        self.track(handle);
    }

    async fn run_delivery(
        &self,
        payload: NotificationPayload,
        key: ApproachKey,
        cancel: CancellationToken,
    ) {
        let style = message_style(&payload);
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(
                    "monitoring stopped before the {} alert for {} was sent",
                    payload.kind(),
                    key.target_id
                );
                return;
            }
            body = compose_message(
                self.message_generator.as_deref(),
                &payload,
                style,
                self.config.message_timeout,
            ) => body,
        };

        if self.current_target().map(|active| active.key()).as_ref() != Some(&key) {
            info!(
                "target changed before dispatch; dropping {} alert for {}",
                payload.kind(),
                key.target_id
            );
            return;
        }

        let notification = Notification::from_payload(payload, body);
        let report = self
            .delivery
            .deliver_with_cancel(notification, &self.config.delivery, cancel)
            .await;

        {
            let mut state = self.state.lock().await;
            if state.is_monitoring() {
                state.deliveries_completed += 1;
            }
        }
        self.persist_delivery(&report.notification_id).await;
        let _ = self.deliveries.send(report);
    }

    fn persist_decision(&self, decision: &Decision) {
        let Some(history) = self.history.clone() else {
            return;
        };
        let decision = decision.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = history.append_decision(&decision).await {
                error!("failed to persist decision for {}: {err:#}", decision.target_id);
            }
        });
        self.track(handle);
    }

    async fn persist_delivery(&self, notification_id: &str) {
        let (Some(history), Some(record)) =
            (&self.history, self.delivery.record(notification_id))
        else {
            return;
        };
        if let Err(err) = history.append_delivery(&record).await {
            error!("failed to persist delivery {notification_id}: {err:#}");
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

fn message_style(payload: &NotificationPayload) -> MessageStyle {
    match payload {
        NotificationPayload::Snooze { .. } => MessageStyle::Gentle,
        _ if payload
            .eta_seconds()
            .is_some_and(|eta| eta <= URGENT_ETA_SECONDS) =>
        {
            MessageStyle::Urgent
        }
        _ => MessageStyle::Standard,
    }
}

async fn decision_loop(controller: MonitorController, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(controller.config.decision_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = controller.tick() => {}
        }
    }

    debug!("decision loop shutting down");
}
