pub mod config;
pub mod controller;
pub mod state;
pub mod tracker;

pub use config::FallbackConfig;
pub use controller::FallbackController;
pub use state::{
    EstimateSource, FallbackSnapshot, FallbackState, FallbackStrategy, PositionEstimate,
    SignalHealth, StopPassRecord,
};
pub use tracker::{FallbackTracker, FallbackTransition};
