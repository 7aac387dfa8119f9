use async_trait::async_trait;
use tracing::debug;
use waypost_domain::{
    DomainError, DomainResult, DriftEvent, DriftRepository, QuarantinedTelemetry,
};

use crate::client::PostgresClient;
use crate::models::DriftEventRow;

#[derive(Clone)]
pub struct PostgresDriftRepository {
    client: PostgresClient,
}

impl PostgresDriftRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DriftRepository for PostgresDriftRepository {
    async fn record_drift_events(&self, events: Vec<DriftEvent>) -> DomainResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let statement = conn
            .prepare(
                "INSERT INTO drift_events (batch_id, device_id, metric_key, kind, observed_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        for event in &events {
            conn.execute(
                &statement,
                &[
                    &event.batch_id,
                    &event.device_id,
                    &event.metric_key,
                    &event.kind.as_str(),
                    &event.observed_at,
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;
        }

        debug!(count = events.len(), "recorded drift events");
        Ok(())
    }

    async fn record_quarantined(&self, entries: Vec<QuarantinedTelemetry>) -> DomainResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let statement = conn
            .prepare(
                "INSERT INTO quarantined_telemetry
                     (batch_id, device_id, message_id, metric_key, value, quarantined_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        for entry in &entries {
            conn.execute(
                &statement,
                &[
                    &entry.batch_id,
                    &entry.device_id,
                    &entry.message_id,
                    &entry.metric_key,
                    &entry.value,
                    &entry.quarantined_at,
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;
        }

        debug!(count = entries.len(), "recorded quarantined values");
        Ok(())
    }

    async fn list_drift_events(&self, limit: u32) -> DomainResult<Vec<DriftEvent>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                "SELECT batch_id, device_id, metric_key, kind, observed_at
                 FROM drift_events
                 ORDER BY observed_at DESC
                 LIMIT $1",
                &[&i64::from(limit)],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        rows.into_iter()
            .map(|row| DriftEventRow(row).try_into())
            .collect()
    }
}
