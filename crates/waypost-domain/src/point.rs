use serde::{Deserialize, Serialize};

use crate::reading::MetricMap;

/// Durable telemetry record, unique on `(device_id, message_id)`.
///
/// That uniqueness constraint is the single source of truth for idempotency;
/// everything downstream reads each logical reading exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPoint {
    pub device_id: String,
    pub message_id: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub metrics: MetricMap,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// Terminal state of one ingest call, recorded on its ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Completed,
    /// Points were persisted but the ledger/side records were degraded.
    CompletedWithWarnings,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::CompletedWithWarnings => "completed_with_warnings",
        }
    }
}

/// Append-only audit record of one ingest call, written regardless of
/// point-level outcomes and never updated afterward.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionBatch {
    pub batch_id: uuid::Uuid,
    pub device_id: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub contract_version: u32,
    pub contract_hash: String,
    pub points_submitted: u32,
    pub points_accepted: u32,
    pub points_duplicate: u32,
    pub points_quarantined: u32,
    pub min_ts: Option<chrono::DateTime<chrono::Utc>>,
    pub max_ts: Option<chrono::DateTime<chrono::Utc>>,
    pub unknown_metric_keys: Vec<String>,
    pub type_mismatch_keys: Vec<String>,
    pub processing_status: ProcessingStatus,
}

/// What kind of schema drift a metric key exhibited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    UnknownKey,
    TypeMismatch,
}

impl DriftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftKind::UnknownKey => "unknown_key",
            DriftKind::TypeMismatch => "type_mismatch",
        }
    }
}

/// Side record for a drifted metric key. Never blocks acceptance.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftEvent {
    pub batch_id: uuid::Uuid,
    pub device_id: String,
    pub metric_key: String,
    pub kind: DriftKind,
    pub observed_at: chrono::DateTime<chrono::Utc>,
}

/// A type-mismatched key/value pair parked for later inspection instead of
/// being written to the primary table.
#[derive(Debug, Clone, PartialEq)]
pub struct QuarantinedTelemetry {
    pub batch_id: uuid::Uuid,
    pub device_id: String,
    pub message_id: String,
    pub metric_key: String,
    pub value: serde_json::Value,
    pub quarantined_at: chrono::DateTime<chrono::Utc>,
}

/// Per-call result reported back to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub batch_id: uuid::Uuid,
    pub accepted: u32,
    pub duplicates: u32,
    pub quarantined: u32,
}
