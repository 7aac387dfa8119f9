use async_trait::async_trait;

use crate::error::DomainResult;
use crate::point::{DriftEvent, IngestionBatch, QuarantinedTelemetry, TelemetryPoint};

/// Outcome of an idempotent batch insert.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InsertPointsOutcome {
    pub accepted: u32,
    pub duplicates: u32,
}

/// Repository trait for durable telemetry points.
/// Infrastructure layer (waypost-postgres) implements this trait.
///
/// Implementations must enforce `(device_id, message_id)` uniqueness at the
/// storage layer so concurrent duplicate submissions race safely: a conflict
/// on an already-present key counts as a duplicate, never an error.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TelemetryPointRepository: Send + Sync {
    async fn insert_points(&self, points: Vec<TelemetryPoint>) -> DomainResult<InsertPointsOutcome>;
}

/// Repository trait for the append-only ingestion ledger.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait IngestionLedgerRepository: Send + Sync {
    /// Append one ledger row. Rows are immutable after write.
    async fn record_batch(&self, batch: IngestionBatch) -> DomainResult<()>;

    /// Newest-first page of ledger rows for the operator audit surface.
    async fn list_batches(&self, limit: u32) -> DomainResult<Vec<IngestionBatch>>;
}

/// Repository trait for drift side records and quarantined values.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DriftRepository: Send + Sync {
    async fn record_drift_events(&self, events: Vec<DriftEvent>) -> DomainResult<()>;

    async fn record_quarantined(&self, entries: Vec<QuarantinedTelemetry>) -> DomainResult<()>;

    async fn list_drift_events(&self, limit: u32) -> DomainResult<Vec<DriftEvent>>;
}
