//! Monitoring session: periodic decisions, fallback polling, alert
//! dispatch and snooze timers for one active target.

mod config;
mod controller;
mod state;

pub use config::MonitorConfig;
pub use controller::{MonitorController, MonitorDeps};
pub use state::{MonitorState, MonitorStatus};
