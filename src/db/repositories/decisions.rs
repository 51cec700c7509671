use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{from_json, parse_datetime, parse_mode, to_i64, to_json},
};
use crate::models::Decision;

const DECISION_COLUMNS: &str = "target_id, mode, should_notify, confidence, eta_seconds, \
     distance_meters, reason, deviation_json, produced_at";

fn row_to_decision(row: &Row) -> Result<Decision> {
    let mode: String = row.get("mode")?;
    let deviation: Option<String> = row.get("deviation_json")?;
    let produced_at: String = row.get("produced_at")?;

    Ok(Decision {
        target_id: row.get("target_id")?,
        should_notify: row.get("should_notify")?,
        mode: parse_mode(&mode)?,
        confidence: row.get("confidence")?,
        eta_seconds: row.get("eta_seconds")?,
        distance_to_target: row.get("distance_meters")?,
        reason: row.get("reason")?,
        produced_at: parse_datetime(&produced_at, "produced_at")?,
        deviation: deviation
            .map(|raw| from_json(&raw, "deviation_json"))
            .transpose()?,
    })
}

impl Database {
    /// Appends one decision and returns its row id.
    pub async fn insert_decision(&self, decision: &Decision) -> Result<i64> {
        let record = decision.clone();
        self.execute(move |conn| {
            let deviation = record
                .deviation
                .as_ref()
                .map(|d| to_json(d, "deviation_json"))
                .transpose()?;
            conn.execute(
                "INSERT INTO decisions (target_id, mode, should_notify, confidence, eta_seconds, distance_meters, reason, deviation_json, produced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.target_id,
                    record.mode.as_str(),
                    record.should_notify,
                    record.confidence,
                    record.eta_seconds,
                    record.distance_to_target,
                    record.reason,
                    deviation,
                    record.produced_at.to_rfc3339(),
                ],
            )
            .context("failed to insert decision")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Newest first.
    pub async fn recent_decisions(&self, limit: u64) -> Result<Vec<Decision>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DECISION_COLUMNS} FROM decisions ORDER BY produced_at DESC, id DESC LIMIT ?1"
            ))?;
            let mut rows = stmt.query(params![to_i64(limit)?])?;
            let mut decisions = Vec::new();
            while let Some(row) = rows.next()? {
                decisions.push(row_to_decision(row)?);
            }
            Ok(decisions)
        })
        .await
    }

    /// Oldest first.
    pub async fn decisions_for_target(&self, target_id: &str) -> Result<Vec<Decision>> {
        let target_id = target_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DECISION_COLUMNS} FROM decisions WHERE target_id = ?1 ORDER BY produced_at ASC, id ASC"
            ))?;
            let mut rows = stmt.query(params![target_id])?;
            let mut decisions = Vec::new();
            while let Some(row) = rows.next()? {
                decisions.push(row_to_decision(row)?);
            }
            Ok(decisions)
        })
        .await
    }
}
