use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured payload carried with every notification so history can be
/// rebuilt without parsing rendered text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NotificationPayload {
    #[serde(rename_all = "camelCase")]
    Arrival {
        target_id: String,
        station_name: String,
        approach_event_id: Uuid,
        eta_seconds: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    Snooze {
        target_id: String,
        station_name: String,
        snooze_minutes: u32,
        snooze_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    Transfer {
        target_id: String,
        station_name: String,
        next_line: String,
        approach_event_id: Uuid,
        eta_seconds: Option<i64>,
    },
}

impl NotificationPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationPayload::Arrival { .. } => "arrival",
            NotificationPayload::Snooze { .. } => "snooze",
            NotificationPayload::Transfer { .. } => "transfer",
        }
    }

    pub fn target_id(&self) -> &str {
        match self {
            NotificationPayload::Arrival { target_id, .. }
            | NotificationPayload::Snooze { target_id, .. }
            | NotificationPayload::Transfer { target_id, .. } => target_id,
        }
    }

    pub fn station_name(&self) -> &str {
        match self {
            NotificationPayload::Arrival { station_name, .. }
            | NotificationPayload::Snooze { station_name, .. }
            | NotificationPayload::Transfer { station_name, .. } => station_name,
        }
    }

    pub fn eta_seconds(&self) -> Option<i64> {
        match self {
            NotificationPayload::Arrival { eta_seconds, .. }
            | NotificationPayload::Transfer { eta_seconds, .. } => *eta_seconds,
            NotificationPayload::Snooze { .. } => None,
        }
    }

    pub fn title(&self) -> String {
        match self {
            NotificationPayload::Arrival { station_name, .. } => {
                format!("Approaching {station_name}")
            }
            NotificationPayload::Snooze { station_name, .. } => {
                format!("Reminder: {station_name}")
            }
            NotificationPayload::Transfer {
                station_name,
                next_line,
                ..
            } => format!("Transfer at {station_name} to {next_line}"),
        }
    }

    /// Deterministic body text used whenever no generated message is available.
    pub fn fallback_body(&self) -> String {
        let eta_phrase = match self.eta_seconds() {
            Some(secs) if secs >= 60 => format!("in about {} min", (secs + 30) / 60),
            Some(_) => "in less than a minute".to_string(),
            None => "soon".to_string(),
        };

        match self {
            NotificationPayload::Arrival { station_name, .. } => {
                format!("You will arrive at {station_name} {eta_phrase}. Time to get ready.")
            }
            NotificationPayload::Snooze {
                station_name,
                snooze_minutes,
                ..
            } => format!(
                "You snoozed {snooze_minutes} min ago. {station_name} is coming up."
            ),
            NotificationPayload::Transfer {
                station_name,
                next_line,
                ..
            } => format!(
                "You will arrive at {station_name} {eta_phrase}. Change to {next_line}."
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub payload: Option<NotificationPayload>,
}

impl Notification {
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            payload: None,
        }
    }

    pub fn from_payload(payload: NotificationPayload, body: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: payload.title(),
            body,
            payload: Some(payload),
        }
    }
}
