use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{from_json, parse_datetime, parse_delivery_result, to_json},
};
use crate::models::DeliveryRecord;

const DELIVERY_COLUMNS: &str = "notification_id, created_at, completed, final_result, abandoned, \
     required_channels_json, fallback_channels_json, attempts_json, payload_json";

fn row_to_record(row: &Row) -> Result<DeliveryRecord> {
    let created_at: String = row.get("created_at")?;
    let final_result: Option<String> = row.get("final_result")?;
    let required: String = row.get("required_channels_json")?;
    let fallback: String = row.get("fallback_channels_json")?;
    let attempts: String = row.get("attempts_json")?;
    let payload: Option<String> = row.get("payload_json")?;

    Ok(DeliveryRecord {
        notification_id: row.get("notification_id")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        required_channels: from_json(&required, "required_channels_json")?,
        fallback_channels: from_json(&fallback, "fallback_channels_json")?,
        attempts: from_json(&attempts, "attempts_json")?,
        completed: row.get("completed")?,
        final_result: final_result
            .as_deref()
            .map(parse_delivery_result)
            .transpose()?,
        abandoned: row.get("abandoned")?,
        payload: payload
            .map(|raw| from_json(&raw, "payload_json"))
            .transpose()?,
    })
}

impl Database {
    /// Inserts or replaces the record keyed by its notification id.
    pub async fn upsert_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            let payload = record
                .payload
                .as_ref()
                .map(|p| to_json(p, "payload_json"))
                .transpose()?;
            conn.execute(
                "INSERT OR REPLACE INTO deliveries (notification_id, created_at, completed, final_result, abandoned, required_channels_json, fallback_channels_json, attempts_json, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.notification_id,
                    record.created_at.to_rfc3339(),
                    record.completed,
                    record.final_result.map(|r| r.as_str()),
                    record.abandoned,
                    to_json(&record.required_channels, "required_channels_json")?,
                    to_json(&record.fallback_channels, "fallback_channels_json")?,
                    to_json(&record.attempts, "attempts_json")?,
                    payload,
                ],
            )
            .context("failed to save delivery record")?;
            Ok(())
        })
        .await
    }

    pub async fn get_delivery(&self, notification_id: &str) -> Result<Option<DeliveryRecord>> {
        let notification_id = notification_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE notification_id = ?1"
            ))?;
            let raw = stmt
                .query_row(params![notification_id], |row| Ok(row_to_record(row)))
                .optional()?;
            raw.transpose()
        })
        .await
    }

    /// Records created at or after `since`, oldest first.
    pub async fn deliveries_since(&self, since: DateTime<Utc>) -> Result<Vec<DeliveryRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE created_at >= ?1 ORDER BY created_at ASC"
            ))?;
            let mut rows = stmt.query(params![since.to_rfc3339()])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }

    /// Deletes completed records created before `cutoff`. Returns how many
    /// were removed.
    pub async fn prune_deliveries_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM deliveries WHERE completed = 1 AND created_at < ?1",
                    params![cutoff.to_rfc3339()],
                )
                .context("failed to prune delivery records")?;
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AttemptOutcome, DeliveryAttempt, DeliveryChannel, DeliveryResult, NotificationPayload,
    };
    use crate::sources::HistoryStore;
    use chrono::Duration;
    use std::collections::BTreeSet;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn record(id: &str, created_at: DateTime<Utc>, completed: bool) -> DeliveryRecord {
        DeliveryRecord {
            notification_id: id.into(),
            created_at,
            required_channels: BTreeSet::from([DeliveryChannel::SystemNotification]),
            fallback_channels: vec![DeliveryChannel::LocalSound, DeliveryChannel::Badge],
            attempts: vec![
                DeliveryAttempt {
                    channel: DeliveryChannel::SystemNotification,
                    outcome: AttemptOutcome::Failure("notification center busy".into()),
                    duration_ms: 12,
                    retry_index: 0,
                    attempted_at: created_at,
                },
                DeliveryAttempt {
                    channel: DeliveryChannel::SystemNotification,
                    outcome: AttemptOutcome::Success,
                    duration_ms: 8,
                    retry_index: 1,
                    attempted_at: created_at + Duration::seconds(1),
                },
            ],
            completed,
            final_result: completed.then_some(DeliveryResult::Success),
            abandoned: false,
            payload: Some(NotificationPayload::Arrival {
                target_id: "kanda".into(),
                station_name: "Kanda".into(),
                approach_event_id: Uuid::new_v4(),
                eta_seconds: Some(120),
            }),
        }
    }

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn record_is_replaced_when_it_completes() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("history.sqlite3")).unwrap();

        let open = record("n-1", start(), false);
        db.upsert_delivery(&open).await.unwrap();
        assert_eq!(db.get_delivery("n-1").await.unwrap(), Some(open));

        let done = record("n-1", start(), true);
        db.append_delivery(&done).await.unwrap();
        assert_eq!(db.get_delivery("n-1").await.unwrap(), Some(done));
        assert_eq!(db.get_delivery("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn pruning_keeps_recent_and_open_records() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("history.sqlite3")).unwrap();

        db.upsert_delivery(&record("old-done", start(), true)).await.unwrap();
        db.upsert_delivery(&record("old-open", start(), false)).await.unwrap();
        db.upsert_delivery(&record("new-done", start() + Duration::hours(30), true))
            .await
            .unwrap();

        let cutoff = start() + Duration::hours(6);
        assert_eq!(db.prune_deliveries_before(cutoff).await.unwrap(), 1);

        let remaining: Vec<String> = db
            .deliveries_since(start())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.notification_id)
            .collect();
        assert_eq!(remaining, vec!["old-open".to_string(), "new-done".to_string()]);
        assert_eq!(db.deliveries_since(cutoff).await.unwrap().len(), 1);
    }
}
