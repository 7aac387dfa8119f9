use async_trait::async_trait;
use tracing::debug;
use waypost_domain::{
    DomainError, DomainResult, InsertPointsOutcome, TelemetryPoint, TelemetryPointRepository,
};

use crate::client::PostgresClient;

#[derive(Clone)]
pub struct PostgresTelemetryPointRepository {
    client: PostgresClient,
}

impl PostgresTelemetryPointRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TelemetryPointRepository for PostgresTelemetryPointRepository {
    /// Idempotent insert keyed on `(device_id, message_id)`. A conflict is a
    /// redelivery of an already-durable point and counts as a duplicate.
    async fn insert_points(&self, points: Vec<TelemetryPoint>) -> DomainResult<InsertPointsOutcome> {
        if points.is_empty() {
            return Ok(InsertPointsOutcome::default());
        }

        let mut conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let tx = conn
            .transaction()
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let statement = tx
            .prepare(
                "INSERT INTO telemetry_points
                     (device_id, message_id, captured_at, metrics, received_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (device_id, message_id) DO NOTHING",
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let submitted = points.len() as u32;
        let mut accepted = 0u32;
        for point in &points {
            let metrics = serde_json::Value::Object(point.metrics.clone());
            let inserted = tx
                .execute(
                    &statement,
                    &[
                        &point.device_id,
                        &point.message_id,
                        &point.captured_at,
                        &metrics,
                        &point.received_at,
                    ],
                )
                .await
                .map_err(|e| DomainError::RepositoryError(e.into()))?;
            accepted += inserted as u32;
        }

        tx.commit()
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let duplicates = submitted - accepted;
        debug!(submitted, accepted, duplicates, "inserted telemetry points");
        Ok(InsertPointsOutcome {
            accepted,
            duplicates,
        })
    }
}
