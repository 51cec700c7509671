use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::models::{
    AttemptOutcome, DeliveryAttempt, DeliveryChannel, DeliveryRecord, DeliveryReport,
    DeliveryResult, Notification,
};
use crate::telemetry::TelemetrySink;

use super::availability::AvailabilityCache;
use super::channel::{ChannelAvailability, ChannelError, ChannelRegistry};
use super::config::DeliveryConfig;

pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Upper bound for a deadline whose timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interruption {
    Deadline,
    Cancelled,
}

impl Interruption {
    fn as_str(self) -> &'static str {
        match self {
            Interruption::Deadline => "deadline",
            Interruption::Cancelled => "abandoned",
        }
    }

    fn check_outcome(self) -> AttemptOutcome {
        match self {
            Interruption::Deadline => {
                AttemptOutcome::Failure("availability check exceeded delivery deadline".into())
            }
            Interruption::Cancelled => {
                AttemptOutcome::Failure("abandoned during availability check".into())
            }
        }
    }

    fn attempt_outcome(self) -> AttemptOutcome {
        match self {
            Interruption::Deadline => AttemptOutcome::Failure("delivery deadline exceeded".into()),
            Interruption::Cancelled => AttemptOutcome::Failure("abandoned during attempt".into()),
        }
    }
}

/// Per-delivery bookkeeping while the channel loop runs.
#[derive(Default)]
struct DeliveryProgress {
    attempts: Vec<DeliveryAttempt>,
    successful: BTreeSet<DeliveryChannel>,
    failed: BTreeSet<DeliveryChannel>,
}

/// Turns one notification into a multi-channel delivery outcome. Channels
/// are tried one at a time, highest priority first, and the loop stops as
/// soon as the required channels have all succeeded.
#[derive(Clone)]
pub struct DeliveryManager {
    registry: Arc<ChannelRegistry>,
    availability: Arc<AvailabilityCache>,
    records: Arc<Mutex<HashMap<String, DeliveryRecord>>>,
    in_flight: Arc<Mutex<HashMap<String, CancellationToken>>>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn TelemetrySink>,
    retention: chrono::Duration,
}

impl DeliveryManager {
    pub fn new(
        registry: ChannelRegistry,
        clock: Arc<dyn Clock>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            availability: Arc::new(AvailabilityCache::default()),
            records: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            clock,
            telemetry,
            retention: chrono::Duration::hours(DEFAULT_RETENTION_HOURS),
        }
    }

    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn availability(&self) -> &AvailabilityCache {
        &self.availability
    }

    fn records_lock(&self) -> MutexGuard<'_, HashMap<String, DeliveryRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn in_flight_lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn deliver(
        &self,
        notification: Notification,
        config: &DeliveryConfig,
    ) -> DeliveryReport {
        self.deliver_with_cancel(notification, config, CancellationToken::new())
            .await
    }

    /// Runs the channel loop. Cancelling `cancel` (or calling
    /// `abandon_in_flight`) cuts the current availability check or attempt
    /// short and stops further attempts; channels that already succeeded
    /// stay successful.
    pub async fn deliver_with_cancel(
        &self,
        notification: Notification,
        config: &DeliveryConfig,
        cancel: CancellationToken,
    ) -> DeliveryReport {
        let started = Instant::now();
        let deadline = started
            .checked_add(config.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let id = notification.id.clone();

        self.open_record(&notification, config);
        self.in_flight_lock().insert(id.clone(), cancel.clone());
        info!(
            "delivering notification {} ({}) within {}s",
            id,
            notification.title,
            config.timeout.as_secs()
        );

        let mut progress = DeliveryProgress::default();
        let mut interruption = None;
        let mut quorum = false;

        'channels: for channel in config.ordered_channels() {
            if cancel.is_cancelled() {
                interruption = Some(Interruption::Cancelled);
                break;
            }
            if Instant::now() >= deadline {
                interruption = Some(Interruption::Deadline);
                break;
            }

            let Some(dispatcher) = self.registry.get(channel) else {
                debug!("notification {id}: no dispatcher for {}", channel.as_str());
                self.push_attempt(
                    &id,
                    &mut progress,
                    channel,
                    AttemptOutcome::Unavailable,
                    self.clock.now(),
                    Instant::now(),
                    0,
                );
                progress.failed.insert(channel);
                continue;
            };

            let checked_at = self.clock.now();
            let check_started = Instant::now();
            let checked = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Interruption::Cancelled),
                checked = tokio::time::timeout_at(
                    deadline,
                    self.availability.check(dispatcher.as_ref()),
                ) => checked.map_err(|_| Interruption::Deadline),
            };
            let availability = match checked {
                Ok(availability) => availability,
                Err(cut) => {
                    warn!(
                        "notification {id}: availability check for {} cut short ({})",
                        channel.as_str(),
                        cut.as_str()
                    );
                    self.push_attempt(
                        &id,
                        &mut progress,
                        channel,
                        cut.check_outcome(),
                        checked_at,
                        check_started,
                        0,
                    );
                    progress.failed.insert(channel);
                    interruption = Some(cut);
                    break;
                }
            };

            let skipped = match availability {
                ChannelAvailability::Available => None,
                ChannelAvailability::Unavailable(reason) => {
                    debug!("notification {id}: {} unavailable ({reason})", channel.as_str());
                    Some(AttemptOutcome::Unavailable)
                }
                ChannelAvailability::PermissionDenied => {
                    debug!("notification {id}: {} permission denied", channel.as_str());
                    Some(AttemptOutcome::PermissionDenied)
                }
            };
            if let Some(outcome) = skipped {
                self.push_attempt(
                    &id,
                    &mut progress,
                    channel,
                    outcome,
                    checked_at,
                    check_started,
                    0,
                );
                progress.failed.insert(channel);
                continue;
            }

            let mut retry_index = 0u32;
            loop {
                let attempted_at = self.clock.now();
                let attempt_started = Instant::now();
                let attempt = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Interruption::Cancelled),
                    result = tokio::time::timeout_at(
                        deadline,
                        dispatcher.deliver(&notification),
                    ) => result.map_err(|_| Interruption::Deadline),
                };
                let result = match attempt {
                    Ok(result) => result,
                    Err(cut) => {
                        self.push_attempt(
                            &id,
                            &mut progress,
                            channel,
                            cut.attempt_outcome(),
                            attempted_at,
                            attempt_started,
                            retry_index,
                        );
                        progress.failed.insert(channel);
                        interruption = Some(cut);
                        break 'channels;
                    }
                };

                let err = match result {
                    Ok(()) => {
                        self.push_attempt(
                            &id,
                            &mut progress,
                            channel,
                            AttemptOutcome::Success,
                            attempted_at,
                            attempt_started,
                            retry_index,
                        );
                        progress.successful.insert(channel);
                        break;
                    }
                    Err(err) => err,
                };

                self.push_attempt(
                    &id,
                    &mut progress,
                    channel,
                    err.outcome(),
                    attempted_at,
                    attempt_started,
                    retry_index,
                );
                match &err {
                    ChannelError::PermissionDenied => self
                        .availability
                        .record(channel, ChannelAvailability::PermissionDenied),
                    ChannelError::Unavailable(reason) => self
                        .availability
                        .record(channel, ChannelAvailability::Unavailable(reason.clone())),
                    _ => {}
                }

                if !err.is_retryable() || retry_index >= config.max_retry_attempts {
                    debug!(
                        "notification {id}: giving up on {} after {} attempt(s): {err}",
                        channel.as_str(),
                        retry_index + 1
                    );
                    progress.failed.insert(channel);
                    break;
                }

                retry_index += 1;
                let backoff = config.backoff_for(retry_index);
                debug!(
                    "notification {id}: {} failed ({err}), retry {} in {}ms",
                    channel.as_str(),
                    retry_index,
                    backoff.as_millis()
                );

                let interrupted = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Some(Interruption::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => Some(Interruption::Deadline),
                    _ = tokio::time::sleep(backoff) => None,
                };
                if interrupted.is_some() {
                    progress.failed.insert(channel);
                    interruption = interrupted;
                    break 'channels;
                }
            }

            if config.quorum_met(&progress.successful) {
                quorum = true;
                break;
            }
        }

        let result = if quorum {
            DeliveryResult::Success
        } else if interruption == Some(Interruption::Deadline) {
            DeliveryResult::Timeout
        } else if progress.successful.is_empty() {
            DeliveryResult::Failure
        } else {
            DeliveryResult::PartialSuccess
        };
        let abandoned = interruption == Some(Interruption::Cancelled);

        self.in_flight_lock().remove(&id);
        self.close_record(&id, result, abandoned);

        let report = DeliveryReport {
            notification_id: id,
            result,
            successful_channels: progress.successful.iter().copied().collect(),
            failed_channels: progress
                .failed
                .difference(&progress.successful)
                .copied()
                .collect(),
            attempts: progress.attempts,
            abandoned,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        log_outcome(&report);
        self.telemetry.record_delivery(&report);
        report
    }

    /// Stops every running delivery after its current attempt. Returns how
    /// many were signalled.
    pub fn abandon_in_flight(&self) -> usize {
        let in_flight = self.in_flight_lock();
        for (id, token) in in_flight.iter() {
            info!("abandoning in-flight delivery {id}");
            token.cancel();
        }
        in_flight.len()
    }

    pub fn abandon(&self, notification_id: &str) -> bool {
        match self.in_flight_lock().get(notification_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight_lock().len()
    }

    pub fn record(&self, notification_id: &str) -> Option<DeliveryRecord> {
        self.records_lock().get(notification_id).cloned()
    }

    /// All retained records, oldest first.
    pub fn records(&self) -> Vec<DeliveryRecord> {
        let mut records: Vec<DeliveryRecord> = self.records_lock().values().cloned().collect();
        records.sort_by_key(|record| record.created_at);
        records
    }

    /// Drops completed records older than the retention window.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records_lock();
        let before = records.len();
        records.retain(|_, record| !record.completed || now - record.created_at <= self.retention);
        let pruned = before - records.len();
        if pruned > 0 {
            debug!("pruned {pruned} expired delivery record(s)");
        }
        pruned
    }

    fn open_record(&self, notification: &Notification, config: &DeliveryConfig) {
        let record = DeliveryRecord {
            notification_id: notification.id.clone(),
            created_at: self.clock.now(),
            required_channels: config.required_channels.clone(),
            fallback_channels: config.fallback_channels.clone(),
            attempts: Vec::new(),
            completed: false,
            final_result: None,
            abandoned: false,
            payload: notification.payload.clone(),
        };
        self.records_lock().insert(record.notification_id.clone(), record);
    }

    fn close_record(&self, notification_id: &str, result: DeliveryResult, abandoned: bool) {
        if let Some(record) = self.records_lock().get_mut(notification_id) {
            record.completed = true;
            record.final_result = Some(result);
            record.abandoned = abandoned;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_attempt(
        &self,
        notification_id: &str,
        progress: &mut DeliveryProgress,
        channel: DeliveryChannel,
        outcome: AttemptOutcome,
        attempted_at: DateTime<Utc>,
        started: Instant,
        retry_index: u32,
    ) {
        let attempt = DeliveryAttempt {
            channel,
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
            retry_index,
            attempted_at,
        };
        if let Some(record) = self.records_lock().get_mut(notification_id) {
            record.attempts.push(attempt.clone());
        }
        progress.attempts.push(attempt);
    }
}

fn log_outcome(report: &DeliveryReport) {
    let channels = |list: &[DeliveryChannel]| {
        list.iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",")
    };
    let succeeded = channels(&report.successful_channels);
    let failed = channels(&report.failed_channels);
    let suffix = if report.abandoned { " (abandoned)" } else { "" };

    match report.result {
        DeliveryResult::Success => info!(
            "notification {} delivered via [{}] after {} attempt(s){}",
            report.notification_id,
            succeeded,
            report.attempts.len(),
            suffix
        ),
        DeliveryResult::PartialSuccess | DeliveryResult::Timeout => warn!(
            "notification {} {}: succeeded [{}], failed [{}], {} attempt(s) in {}ms{}",
            report.notification_id,
            report.result.as_str(),
            succeeded,
            failed,
            report.attempts.len(),
            report.elapsed_ms,
            suffix
        ),
        DeliveryResult::Failure => error!(
            "notification {} failed on every channel [{}] after {} attempt(s){}",
            report.notification_id,
            failed,
            report.attempts.len(),
            suffix
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::delivery::channel::ChannelDispatcher;
    use crate::models::DeliveryChannel::{Badge, Haptic, LocalSound, SystemNotification};
    use crate::sources::BoxFuture;
    use crate::telemetry::StatsCollector;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedChannel {
        channel: DeliveryChannel,
        availability: ChannelAvailability,
        script: Mutex<VecDeque<Result<(), ChannelError>>>,
        otherwise: Result<(), ChannelError>,
        calls: AtomicUsize,
    }

    impl ScriptedChannel {
        fn new(
            channel: DeliveryChannel,
            script: Vec<Result<(), ChannelError>>,
            otherwise: Result<(), ChannelError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                channel,
                availability: ChannelAvailability::Available,
                script: Mutex::new(script.into()),
                otherwise,
                calls: AtomicUsize::new(0),
            })
        }

        fn ok(channel: DeliveryChannel) -> Arc<Self> {
            Self::new(channel, Vec::new(), Ok(()))
        }

        fn failing(channel: DeliveryChannel, err: ChannelError) -> Arc<Self> {
            Self::new(channel, Vec::new(), Err(err))
        }

        fn unavailable(channel: DeliveryChannel) -> Arc<Self> {
            Arc::new(Self {
                channel,
                availability: ChannelAvailability::Unavailable("no hardware".into()),
                script: Mutex::new(VecDeque::new()),
                otherwise: Ok(()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ChannelDispatcher for ScriptedChannel {
        fn channel(&self) -> DeliveryChannel {
            self.channel
        }

        fn check_availability(&self) -> BoxFuture<'_, ChannelAvailability> {
            Box::pin(async move { self.availability.clone() })
        }

        fn deliver<'a>(
            &'a self,
            _notification: &'a Notification,
        ) -> BoxFuture<'a, Result<(), ChannelError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let next = self.script.lock().unwrap().pop_front();
                next.unwrap_or_else(|| self.otherwise.clone())
            })
        }
    }

    /// Stalls forever in its availability check or in every delivery.
    struct HangingChannel {
        channel: DeliveryChannel,
        hang_on_check: bool,
        calls: AtomicUsize,
    }

    impl HangingChannel {
        fn on_check(channel: DeliveryChannel) -> Arc<Self> {
            Arc::new(Self {
                channel,
                hang_on_check: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn on_deliver(channel: DeliveryChannel) -> Arc<Self> {
            Arc::new(Self {
                channel,
                hang_on_check: false,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ChannelDispatcher for HangingChannel {
        fn channel(&self) -> DeliveryChannel {
            self.channel
        }

        fn check_availability(&self) -> BoxFuture<'_, ChannelAvailability> {
            Box::pin(async move {
                if self.hang_on_check {
                    std::future::pending::<()>().await;
                }
                ChannelAvailability::Available
            })
        }

        fn deliver<'a>(
            &'a self,
            _notification: &'a Notification,
        ) -> BoxFuture<'a, Result<(), ChannelError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
                Ok(())
            })
        }
    }

    fn manager(channels: &[Arc<ScriptedChannel>], stats: &StatsCollector) -> DeliveryManager {
        let mut registry = ChannelRegistry::new();
        for channel in channels {
            registry.register(channel.clone());
        }
        DeliveryManager::new(registry, Arc::new(TokioClock::new()), Arc::new(stats.clone()))
    }

    fn config(required: &[DeliveryChannel], fallback: &[DeliveryChannel]) -> DeliveryConfig {
        DeliveryConfig {
            required_channels: required.iter().copied().collect(),
            fallback_channels: fallback.to_vec(),
            ..DeliveryConfig::default()
        }
    }

    fn notification() -> Notification {
        Notification::new(uuid::Uuid::new_v4().to_string(), "Next stop: Kanda", "Get ready")
    }

    #[tokio::test(start_paused = true)]
    async fn required_channel_success_stops_immediately() {
        let stats = StatsCollector::new();
        let system = ScriptedChannel::ok(SystemNotification);
        let sound = ScriptedChannel::ok(LocalSound);
        let manager = manager(&[system.clone(), sound.clone()], &stats);

        let report = manager
            .deliver(notification(), &DeliveryConfig::default())
            .await;

        assert_eq!(report.result, DeliveryResult::Success);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.attempts_for(SystemNotification), 1);
        assert_eq!(sound.calls(), 0);
        assert_eq!(stats.snapshot().deliveries_by_result.get("Success"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_is_attempted_once() {
        let stats = StatsCollector::new();
        let system = ScriptedChannel::failing(SystemNotification, ChannelError::PermissionDenied);
        let sound = ScriptedChannel::ok(LocalSound);
        let manager = manager(&[system.clone(), sound], &stats);

        let report = manager
            .deliver(notification(), &config(&[SystemNotification], &[LocalSound]))
            .await;

        assert_eq!(report.attempts_for(SystemNotification), 1);
        assert_eq!(system.calls(), 1);
        assert_eq!(report.result, DeliveryResult::PartialSuccess);
        assert_eq!(report.successful_channels, vec![LocalSound]);
        assert_eq!(
            manager.availability().cached(SystemNotification),
            Some(ChannelAvailability::PermissionDenied)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn denied_required_channel_gives_partial_success() {
        let stats = StatsCollector::new();
        let system = ScriptedChannel::ok(SystemNotification);
        let sound = ScriptedChannel::failing(LocalSound, ChannelError::PermissionDenied);
        let manager = manager(&[system, sound], &stats);

        let report = manager
            .deliver(notification(), &config(&[SystemNotification, LocalSound], &[]))
            .await;

        assert_eq!(report.result, DeliveryResult::PartialSuccess);
        assert_eq!(report.successful_channels, vec![SystemNotification]);
        assert_eq!(report.failed_channels, vec![LocalSound]);
        assert_eq!(report.attempts_for(LocalSound), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_succeed() {
        let stats = StatsCollector::new();
        let system = ScriptedChannel::new(
            SystemNotification,
            vec![
                Err(ChannelError::Transient("busy".into())),
                Err(ChannelError::Transient("busy".into())),
            ],
            Ok(()),
        );
        let manager = manager(&[system.clone()], &stats);

        let report = manager
            .deliver(notification(), &config(&[SystemNotification], &[]))
            .await;

        assert_eq!(report.result, DeliveryResult::Success);
        let retries: Vec<u32> = report.attempts.iter().map(|a| a.retry_index).collect();
        assert_eq!(retries, vec![0, 1, 2]);
        // 1s + 3s of backoff
        assert!(report.elapsed_ms >= 4_000 && report.elapsed_ms < 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_capped() {
        let stats = StatsCollector::new();
        let system =
            ScriptedChannel::failing(SystemNotification, ChannelError::Transient("busy".into()));
        let badge = ScriptedChannel::ok(Badge);
        let manager = manager(&[system.clone(), badge], &stats);
        let config = DeliveryConfig {
            max_retry_attempts: 2,
            backoff_schedule: vec![Duration::from_secs(1)],
            ..config(&[SystemNotification], &[Badge])
        };

        let report = manager.deliver(notification(), &config).await;

        assert_eq!(system.calls(), 3);
        assert_eq!(report.result, DeliveryResult::PartialSuccess);
        assert_eq!(report.successful_channels, vec![Badge]);
        assert_eq!(report.failed_channels, vec![SystemNotification]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_reports_timeout_with_partial_successes() {
        let stats = StatsCollector::new();
        let sound = ScriptedChannel::ok(LocalSound);
        let badge = ScriptedChannel::failing(Badge, ChannelError::Transient("busy".into()));
        let manager = manager(&[sound, badge.clone()], &stats);
        let config = DeliveryConfig {
            backoff_schedule: vec![Duration::from_secs(10)],
            ..config(&[Badge], &[LocalSound])
        };

        let report = manager.deliver(notification(), &config).await;

        assert_eq!(report.result, DeliveryResult::Timeout);
        assert_eq!(report.successful_channels, vec![LocalSound]);
        // attempts at 0s, 10s and 20s; the 30s deadline cuts the next backoff
        assert_eq!(badge.calls(), 3);
        assert!(report.elapsed_ms >= 30_000 && report.elapsed_ms < 31_000);
        assert!(report.result.reached_user(&report.successful_channels));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_channel_is_skipped_without_delivery() {
        let stats = StatsCollector::new();
        let system = ScriptedChannel::unavailable(SystemNotification);
        let sound = ScriptedChannel::ok(LocalSound);
        let manager = manager(&[system.clone(), sound], &stats);

        let report = manager
            .deliver(notification(), &config(&[SystemNotification], &[LocalSound]))
            .await;

        assert_eq!(system.calls(), 0);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::Unavailable);
        assert_eq!(report.result, DeliveryResult::PartialSuccess);
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_channel_counts_as_unavailable() {
        let stats = StatsCollector::new();
        let badge = ScriptedChannel::ok(Badge);
        let manager = manager(&[badge], &stats);

        let report = manager
            .deliver(notification(), &config(&[], &[Haptic, Badge]))
            .await;

        assert_eq!(report.result, DeliveryResult::Success);
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[0].channel, Haptic);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoning_stops_retries_and_marks_record() {
        let stats = StatsCollector::new();
        let system =
            ScriptedChannel::failing(SystemNotification, ChannelError::Transient("busy".into()));
        let manager = manager(&[system.clone()], &stats);
        let config = DeliveryConfig {
            backoff_schedule: vec![Duration::from_secs(10)],
            ..config(&[SystemNotification], &[])
        };
        let notification = notification();
        let id = notification.id.clone();

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.deliver(notification, &config).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.abandon_in_flight(), 1);

        let report = task.await.unwrap();
        assert!(report.abandoned);
        assert_eq!(report.result, DeliveryResult::Failure);
        assert_eq!(system.calls(), 1);

        let record = manager.record(&id).unwrap();
        assert!(record.completed);
        assert!(record.abandoned);
        assert_eq!(record.attempts.len(), 1);
        assert_eq!(manager.in_flight_count(), 0);
        assert_eq!(stats.snapshot().abandoned_deliveries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoning_one_delivery_keeps_earlier_successes() {
        let stats = StatsCollector::new();
        let system = ScriptedChannel::ok(SystemNotification);
        let badge = ScriptedChannel::failing(Badge, ChannelError::Transient("busy".into()));
        let manager = manager(&[system.clone(), badge.clone()], &stats);
        let config = config(&[Badge], &[SystemNotification]);
        let notification = notification();
        let id = notification.id.clone();

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.deliver(notification, &config).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!manager.abandon("no-such-delivery"));
        assert!(manager.abandon(&id));

        let report = task.await.unwrap();
        assert!(report.abandoned);
        assert_eq!(report.result, DeliveryResult::PartialSuccess);
        assert_eq!(report.successful_channels, vec![SystemNotification]);
        assert_eq!(badge.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_availability_check_is_bounded_by_deadline() {
        let stats = StatsCollector::new();
        let system = HangingChannel::on_check(SystemNotification);
        let mut registry = ChannelRegistry::new();
        registry.register(system.clone());
        let manager =
            DeliveryManager::new(registry, Arc::new(TokioClock::new()), Arc::new(stats.clone()));

        let report = tokio::time::timeout(
            Duration::from_secs(60),
            manager.deliver(notification(), &config(&[SystemNotification], &[])),
        )
        .await
        .expect("deadline should end the delivery");

        assert_eq!(report.result, DeliveryResult::Timeout);
        assert!(!report.abandoned);
        assert_eq!(report.failed_channels, vec![SystemNotification]);
        assert_eq!(system.calls.load(Ordering::SeqCst), 0);
        assert!(report.elapsed_ms >= 30_000 && report.elapsed_ms < 31_000);
        assert!(matches!(report.attempts[0].outcome, AttemptOutcome::Failure(_)));
        assert_eq!(manager.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoning_cuts_a_stalled_attempt_short() {
        let stats = StatsCollector::new();
        let system = HangingChannel::on_deliver(SystemNotification);
        let mut registry = ChannelRegistry::new();
        registry.register(system.clone());
        let manager =
            DeliveryManager::new(registry, Arc::new(TokioClock::new()), Arc::new(stats.clone()));
        let notification = notification();
        let id = notification.id.clone();
        let config = config(&[SystemNotification], &[]);

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.deliver(notification, &config).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.abandon_in_flight(), 1);

        let report = task.await.unwrap();
        assert!(report.abandoned);
        assert_eq!(report.result, DeliveryResult::Failure);
        assert_eq!(system.calls.load(Ordering::SeqCst), 1);
        assert!(report.elapsed_ms < 2_000);
        assert_eq!(
            report.attempts[0].outcome,
            AttemptOutcome::Failure("abandoned during attempt".into())
        );
        assert!(manager.record(&id).unwrap().abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_timeout_does_not_overflow() {
        let stats = StatsCollector::new();
        let manager = manager(&[ScriptedChannel::ok(SystemNotification)], &stats);
        let config = DeliveryConfig {
            timeout: Duration::MAX,
            ..config(&[SystemNotification], &[])
        };

        let report = manager.deliver(notification(), &config).await;

        assert_eq!(report.result, DeliveryResult::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_records_are_pruned() {
        let stats = StatsCollector::new();
        let clock = TokioClock::new();
        let mut registry = ChannelRegistry::new();
        registry.register(ScriptedChannel::ok(SystemNotification));
        let manager = DeliveryManager::new(registry, Arc::new(clock), Arc::new(stats));

        manager.deliver(notification(), &DeliveryConfig::default()).await;
        tokio::time::advance(Duration::from_secs(25 * 3600)).await;
        manager.deliver(notification(), &DeliveryConfig::default()).await;

        assert_eq!(manager.records().len(), 2);
        assert_eq!(manager.prune_expired(clock.now()), 1);
        assert_eq!(manager.records().len(), 1);
    }
}
