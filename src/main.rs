use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use log::info;

use commute_alarm::{
    clock::{Clock, ManualClock},
    db::Database,
    delivery::ChannelRegistry,
    models::{DeliveryChannel, GeoPoint, MonitorTarget, ScheduledArrival},
    monitor::{MonitorController, MonitorDeps},
    settings::{AlarmSettings, SettingsStore},
    simulation::{LoggingChannel, MemoryHistory, SimulatedPosition, StaticSchedule},
    sources::HistoryStore,
    telemetry::StatsCollector,
};

const STEP_SECONDS: i64 = 10;
const STEPS: u32 = 40;
/// Roughly 30 km/h between stops.
const METERS_PER_STEP: f64 = 85.0;
const START_DISTANCE_METERS: f64 = 3_200.0;
const TUNNEL_STEPS: std::ops::Range<u32> = 12..17;

fn north_of(origin: GeoPoint, meters: f64) -> GeoPoint {
    GeoPoint::new(origin.latitude + meters / 111_195.0, origin.longitude)
}

fn load_settings(path: Option<PathBuf>) -> Result<AlarmSettings> {
    let settings = match path {
        Some(path) => SettingsStore::new(path)?.get(),
        None => AlarmSettings::default(),
    };
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    commute_alarm::init_logging();

    let mut args = std::env::args().skip(1);
    let settings = load_settings(args.next().map(PathBuf::from))?;
    let history: Arc<dyn HistoryStore> = match args.next() {
        Some(path) => Arc::new(Database::new(PathBuf::from(path))?),
        None => Arc::new(MemoryHistory::new()),
    };

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let station = GeoPoint::new(35.6918, 139.7709);
    let position = Arc::new(SimulatedPosition::new(clock.clone()));
    let schedule = Arc::new(StaticSchedule::new());
    schedule.set(
        "chuo-rapid-0812",
        ScheduledArrival {
            time: clock.now() + Duration::minutes(6),
            delay_minutes: 1,
        },
    );

    let channels = ChannelRegistry::new()
        .with(LoggingChannel::new(DeliveryChannel::SystemNotification))
        .with(LoggingChannel::new(DeliveryChannel::LocalSound))
        .with(LoggingChannel::new(DeliveryChannel::Haptic));
    let stats = StatsCollector::new();

    let monitor = MonitorController::new(
        settings.monitor_config(),
        MonitorDeps {
            clock: clock.clone(),
            position_source: position.clone(),
            schedule_source: schedule,
            channels,
            message_generator: None,
            telemetry: Arc::new(stats.clone()),
            history: Some(history),
        },
    );

    let target = monitor
        .start(MonitorTarget {
            target_id: "kanda".into(),
            station_name: "Kanda".into(),
            location: station,
            leg_id: "chuo-rapid-0812".into(),
            transfer_to: Some("Yamanote Line".into()),
        })
        .await?;
    info!("simulating approach {}", target.approach_event_id);

    for step in 0..STEPS {
        let remaining = (START_DISTANCE_METERS - f64::from(step) * METERS_PER_STEP).max(0.0);
        if TUNNEL_STEPS.contains(&step) {
            position.lose_signal();
        } else {
            position.set_fix(north_of(station, remaining), 15.0);
        }
        if step == TUNNEL_STEPS.end - 1 {
            monitor
                .fallback()
                .report_stop_crossing("JC-04", "Yotsuya", None, 0.9)
                .await;
        }

        monitor.fallback().poll().await;
        if let Some(decision) = monitor.evaluate_now().await {
            println!("{}", serde_json::to_string(&decision)?);
        }
        clock.advance(Duration::seconds(STEP_SECONDS));
    }

    monitor.stop().await?;
    println!("{}", serde_json::to_string_pretty(&stats.snapshot())?);
    Ok(())
}
