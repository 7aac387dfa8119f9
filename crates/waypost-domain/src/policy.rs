use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One alert condition with independent enter/recover thresholds.
///
/// Two-sided hysteresis: the condition enters at `enter_above` and recovers
/// only once the metric drops to `recover_below` or lower. Each condition
/// tracks its own state; entering or exiting one never perturbs another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    pub metric: String,
    pub enter_above: f64,
    pub recover_below: f64,
    /// Critical conditions trigger the periodic alert-interval snapshot.
    #[serde(default)]
    pub critical: bool,
}

/// Daily spend ceilings, reset at UTC midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostCaps {
    pub max_bytes_per_day: u64,
    pub max_snapshots_per_day: u32,
    pub max_uploads_per_day: u32,
}

/// Server-issued reporting configuration.
///
/// Immutable once fetched; identified by its content hash, which doubles as
/// the cache-validation token. Replaced atomically on refresh, never merged
/// field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub version: u32,
    pub sample_interval_s: u64,
    pub heartbeat_interval_s: u64,
    pub alert_report_interval_s: u64,
    /// Per-metric absolute change that makes a sample worth sending.
    pub delta_thresholds: BTreeMap<String, f64>,
    /// Keyed by condition name; each entry keeps its own hysteresis state.
    pub alert_conditions: BTreeMap<String, AlertCondition>,
    pub cost_caps: CostCaps,
    pub max_batch_readings: usize,
    pub max_batch_bytes: usize,
    pub max_queue_disk_bytes: u64,
    pub max_delivery_attempts: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Policy {
    /// Hardcoded conservative fallback used until a policy has ever been
    /// fetched successfully.
    pub fn conservative_default() -> Self {
        Policy {
            version: 0,
            sample_interval_s: 60,
            heartbeat_interval_s: 3600,
            alert_report_interval_s: 600,
            delta_thresholds: BTreeMap::new(),
            alert_conditions: BTreeMap::new(),
            cost_caps: CostCaps {
                max_bytes_per_day: 1_000_000,
                max_snapshots_per_day: 48,
                max_uploads_per_day: 12,
            },
            max_batch_readings: 20,
            max_batch_bytes: 64 * 1024,
            max_queue_disk_bytes: 50 * 1024 * 1024,
            max_delivery_attempts: 10,
            backoff_min_ms: 500,
            backoff_max_ms: 300_000,
        }
    }

    /// Content hash identifying this exact policy document. Serves as the
    /// cache-validation token between device and server.
    pub fn content_hash(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        hex::encode(digest)
    }
}
