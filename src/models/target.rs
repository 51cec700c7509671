use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::position::GeoPoint;

/// The stop a traveler wants to be woken for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorTarget {
    pub target_id: String,
    pub station_name: String,
    pub location: GeoPoint,
    /// Journey leg the schedule source is queried with.
    pub leg_id: String,
    /// Line to change to at this stop, if the stop is a transfer point.
    #[serde(default)]
    pub transfer_to: Option<String>,
}

/// Identity of one approach towards one target. A new approach event is
/// minted every time the monitored target is (re)assigned, so a repeated
/// trip to the same station is a distinct approach.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproachKey {
    pub target_id: String,
    pub approach_event_id: Uuid,
}

/// Immutable snapshot of the currently monitored target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTarget {
    pub target: MonitorTarget,
    pub approach_event_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

impl ActiveTarget {
    pub fn assign(target: MonitorTarget, assigned_at: DateTime<Utc>) -> Self {
        Self {
            target,
            approach_event_id: Uuid::new_v4(),
            assigned_at,
        }
    }

    pub fn key(&self) -> ApproachKey {
        ApproachKey {
            target_id: self.target.target_id.clone(),
            approach_event_id: self.approach_event_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledArrival {
    pub time: DateTime<Utc>,
    /// Known delay reported by the operator; positive means late.
    #[serde(default)]
    pub delay_minutes: i64,
}

impl ScheduledArrival {
    /// Signed adjustment applied to the timetable; a delay is a negative adjustment.
    /// `None` when the reported delay does not fit in a `Duration`.
    pub fn delay_adjustment(&self) -> Option<Duration> {
        Duration::try_minutes(self.delay_minutes.checked_neg()?)
    }

    /// `None` when the adjusted arrival falls outside the representable range.
    pub fn effective_arrival(&self) -> Option<DateTime<Utc>> {
        self.time.checked_sub_signed(self.delay_adjustment()?)
    }
}
