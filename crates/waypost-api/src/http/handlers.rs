use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use waypost_domain::wire::{ContractResponseDto, IngestRequestDto, IngestResponseDto};
use waypost_domain::{DriftEvent, IngestionBatch};

use super::auth::require_bearer;
use super::error::ApiError;
use super::server::AppState;
use crate::domain::ingestion_service::IngestTelemetryInput;

pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IngestRequestDto>,
) -> Result<Json<IngestResponseDto>, ApiError> {
    require_bearer(&headers, &state.device_token)?;

    let summary = state
        .ingestion
        .ingest(IngestTelemetryInput {
            device_id: request.device_id,
            points: request.points,
        })
        .await?;

    Ok(Json(IngestResponseDto {
        batch_id: summary.batch_id,
        accepted: summary.accepted,
        duplicates: summary.duplicates,
        quarantined: summary.quarantined,
    }))
}

/// Conditional policy fetch: a matching `If-None-Match` token costs the
/// device a 304 instead of a payload.
pub async fn policy(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_bearer(&headers, &state.device_token)?;

    let token = state.policy.policy_token();
    let etag = format!("\"{token}\"");
    let cache_control = format!("max-age={}", state.policy.refresh_after_s());

    let matched = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| if_none_match_hits(value, &etag));
    if matched {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, etag),
                (header::CACHE_CONTROL, cache_control),
            ],
        )
            .into_response());
    }

    Ok((
        [
            (header::ETAG, etag),
            (header::CACHE_CONTROL, cache_control),
        ],
        Json(state.policy.policy_response()),
    )
        .into_response())
}

/// `If-None-Match` can carry a comma-separated list and weak validators;
/// the policy token never changes meaning under weak comparison.
fn if_none_match_hits(header: &str, etag: &str) -> bool {
    header
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate.strip_prefix("W/").unwrap_or(candidate) == etag)
}

/// Public contract advertisement; no device identity needed to compare
/// schemas against it.
pub async fn contract(State(state): State<AppState>) -> Json<ContractResponseDto> {
    Json(state.policy.contract_response())
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Serialize)]
pub struct BatchAuditDto {
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
    pub processing_status: String,
}

impl From<IngestionBatch> for BatchAuditDto {
    fn from(batch: IngestionBatch) -> Self {
        Self {
            batch_id: batch.batch_id,
            device_id: batch.device_id,
            received_at: batch.received_at,
            contract_version: batch.contract_version,
            contract_hash: batch.contract_hash,
            points_submitted: batch.points_submitted,
            points_accepted: batch.points_accepted,
            points_duplicate: batch.points_duplicate,
            points_quarantined: batch.points_quarantined,
            min_ts: batch.min_ts,
            max_ts: batch.max_ts,
            unknown_metric_keys: batch.unknown_metric_keys,
            type_mismatch_keys: batch.type_mismatch_keys,
            processing_status: batch.processing_status.as_str().to_string(),
        }
    }
}

pub async fn list_batches(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<BatchAuditDto>>, ApiError> {
    require_bearer(&headers, &state.admin_token)?;

    let batches = state.ledger.list_batches(query.limit.min(500)).await?;
    Ok(Json(batches.into_iter().map(BatchAuditDto::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct DriftEventDto {
    pub batch_id: uuid::Uuid,
    pub device_id: String,
    pub metric_key: String,
    pub kind: String,
    pub observed_at: chrono::DateTime<chrono::Utc>,
}

impl From<DriftEvent> for DriftEventDto {
    fn from(event: DriftEvent) -> Self {
        Self {
            batch_id: event.batch_id,
            device_id: event.device_id,
            metric_key: event.metric_key,
            kind: event.kind.as_str().to_string(),
            observed_at: event.observed_at,
        }
    }
}

pub async fn list_drift(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<DriftEventDto>>, ApiError> {
    require_bearer(&headers, &state.admin_token)?;

    let events = state.drift.list_drift_events(query.limit.min(500)).await?;
    Ok(Json(events.into_iter().map(DriftEventDto::from).collect()))
}

/// Liveness plus a storage ping; degraded storage reports 503 so probes
/// stop routing ingest at a server that cannot persist it.
pub async fn healthz(State(state): State<AppState>) -> Response {
    match state.ledger.list_batches(1).await {
        Ok(_) => (StatusCode::OK, "ok").into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "storage ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable").into_response()
        }
    }
}
