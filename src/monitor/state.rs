use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ActiveTarget, Decision};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MonitorStatus {
    Idle,
    Monitoring,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        MonitorStatus::Idle
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorState {
    pub status: MonitorStatus,
    pub target: Option<ActiveTarget>,
    pub started_at: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub last_decision: Option<Decision>,
    /// Snoozes requested for the current target
    pub snooze_count: u32,
    pub deliveries_completed: u64,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_monitoring(&self) -> bool {
        self.status == MonitorStatus::Monitoring
    }

    pub fn begin(&mut self, target: ActiveTarget, now: DateTime<Utc>) {
        *self = Self {
            status: MonitorStatus::Monitoring,
            target: Some(target),
            started_at: Some(now),
            ..Self::default()
        };
    }

    /// Swaps the target and clears everything tied to the previous one.
    pub fn retarget(&mut self, target: ActiveTarget) {
        self.target = Some(target);
        self.last_decision = None;
        self.snooze_count = 0;
    }

    pub fn record_decision(&mut self, decision: Decision) {
        self.ticks += 1;
        self.last_decision = Some(decision);
    }

    pub fn stop(&mut self) {
        *self = Self::default();
    }
}
