use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{DeliveryChannel, DeliveryReport};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub successes: u64,
    pub failures: u64,
    pub unavailable: u64,
    pub permission_denied: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub decisions_evaluated: u64,
    pub decisions_by_mode: HashMap<String, u64>,
    pub notify_decisions: u64,
    pub suppressed_duplicates: u64,
    pub fallback_activations: u64,
    pub fallback_recoveries: u64,
    pub deliveries_by_result: HashMap<String, u64>,
    pub abandoned_deliveries: u64,
    pub channels: HashMap<DeliveryChannel, ChannelStats>,
    pub recent_deliveries: Vec<DeliveryReport>,
}
