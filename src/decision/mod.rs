pub mod config;
pub mod engine;
pub mod evaluate;
pub mod mode;

pub use config::DecisionConfig;
pub use engine::{DecisionEngine, DecisionInputs};
pub use evaluate::{position_confidence, PositionFix, Verdict};
pub use mode::select_mode;
