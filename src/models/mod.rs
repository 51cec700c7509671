pub mod decision;
pub mod delivery;
pub mod notification;
pub mod position;
pub mod target;

pub use decision::{Decision, ModePreference, OperatingMode, ScheduleDeviation};
pub use delivery::{
    AttemptOutcome, DeliveryAttempt, DeliveryChannel, DeliveryRecord, DeliveryReport,
    DeliveryResult,
};
pub use notification::{Notification, NotificationPayload};
pub use position::{GeoPoint, PositionSample};
pub use target::{ActiveTarget, ApproachKey, MonitorTarget, ScheduledArrival};
