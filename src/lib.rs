pub mod clock;
pub mod db;
pub mod decision;
pub mod delivery;
pub mod fallback;
pub mod models;
pub mod monitor;
pub mod settings;
pub mod simulation;
pub mod sources;
pub mod telemetry;

/// Initializes `env_logger` from `RUST_LOG`, defaulting to `info`. Later
/// calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
