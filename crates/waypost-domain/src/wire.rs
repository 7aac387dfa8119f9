//! Wire DTOs shared by the ingest endpoint and the transport client.

use serde::{Deserialize, Serialize};

use crate::reading::MetricMap;

/// One submitted reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestPointDto {
    pub message_id: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub metrics: MetricMap,
}

/// Batch envelope posted to `/v1/ingest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequestDto {
    pub device_id: String,
    pub points: Vec<IngestPointDto>,
}

/// 200-class ingest response. Drift, duplicates and throttling are reported
/// here as metadata, never as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResponseDto {
    pub batch_id: uuid::Uuid,
    pub accepted: u32,
    pub duplicates: u32,
    pub quarantined: u32,
}

/// Body served by `/v1/policy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResponseDto {
    pub policy: crate::policy::Policy,
    /// Cache-validation token (the policy content hash).
    pub token: String,
    /// Client-side cache lifetime in seconds.
    pub refresh_after_s: u64,
}

/// Body served by the public `/v1/contract` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractResponseDto {
    pub version: u32,
    pub hash: String,
    pub keys: std::collections::BTreeMap<String, crate::contract::MetricType>,
}
