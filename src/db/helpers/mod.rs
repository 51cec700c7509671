use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::models::{DeliveryResult, OperatingMode};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn to_json<T: Serialize + ?Sized>(value: &T, field: &str) -> Result<String> {
    serde_json::to_string(value).with_context(|| format!("failed to encode {field}"))
}

pub fn from_json<T: DeserializeOwned>(value: &str, field: &str) -> Result<T> {
    serde_json::from_str(value).with_context(|| format!("failed to decode {field}"))
}

pub fn parse_mode(value: &str) -> Result<OperatingMode> {
    match value {
        "TimeOnly" => Ok(OperatingMode::TimeOnly),
        "PositionOnly" => Ok(OperatingMode::PositionOnly),
        "Hybrid" => Ok(OperatingMode::Hybrid),
        "Degraded" => Ok(OperatingMode::Degraded),
        other => Err(anyhow!("unknown operating mode {other}")),
    }
}

pub fn parse_delivery_result(value: &str) -> Result<DeliveryResult> {
    match value {
        "Success" => Ok(DeliveryResult::Success),
        "PartialSuccess" => Ok(DeliveryResult::PartialSuccess),
        "Failure" => Ok(DeliveryResult::Failure),
        "Timeout" => Ok(DeliveryResult::Timeout),
        other => Err(anyhow!("unknown delivery result {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_model_strings() {
        for mode in [
            OperatingMode::TimeOnly,
            OperatingMode::PositionOnly,
            OperatingMode::Hybrid,
            OperatingMode::Degraded,
        ] {
            assert_eq!(parse_mode(mode.as_str()).unwrap(), mode);
        }
        for result in [
            DeliveryResult::Success,
            DeliveryResult::PartialSuccess,
            DeliveryResult::Failure,
            DeliveryResult::Timeout,
        ] {
            assert_eq!(parse_delivery_result(result.as_str()).unwrap(), result);
        }
        assert!(parse_mode("Sideways").is_err());
    }

    #[test]
    fn oversized_limits_are_rejected() {
        assert!(to_i64(u64::MAX).is_err());
        assert_eq!(to_i64(25).unwrap(), 25);
    }
}
