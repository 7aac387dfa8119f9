use async_trait::async_trait;
use tracing::debug;
use waypost_domain::{DomainError, DomainResult, IngestionBatch, IngestionLedgerRepository};

use crate::client::PostgresClient;
use crate::models::IngestionBatchRow;

#[derive(Clone)]
pub struct PostgresIngestionLedgerRepository {
    client: PostgresClient,
}

impl PostgresIngestionLedgerRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IngestionLedgerRepository for PostgresIngestionLedgerRepository {
    async fn record_batch(&self, batch: IngestionBatch) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        conn.execute(
            "INSERT INTO ingestion_batches
                 (batch_id, device_id, received_at, contract_version, contract_hash,
                  points_submitted, points_accepted, points_duplicate, points_quarantined,
                  min_ts, max_ts, unknown_metric_keys, type_mismatch_keys, processing_status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            &[
                &batch.batch_id,
                &batch.device_id,
                &batch.received_at,
                &(batch.contract_version as i32),
                &batch.contract_hash,
                &(batch.points_submitted as i32),
                &(batch.points_accepted as i32),
                &(batch.points_duplicate as i32),
                &(batch.points_quarantined as i32),
                &batch.min_ts,
                &batch.max_ts,
                &batch.unknown_metric_keys,
                &batch.type_mismatch_keys,
                &batch.processing_status.as_str(),
            ],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(batch_id = %batch.batch_id, "recorded ledger row");
        Ok(())
    }

    async fn list_batches(&self, limit: u32) -> DomainResult<Vec<IngestionBatch>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                "SELECT batch_id, device_id, received_at, contract_version, contract_hash,
                        points_submitted, points_accepted, points_duplicate, points_quarantined,
                        min_ts, max_ts, unknown_metric_keys, type_mismatch_keys, processing_status
                 FROM ingestion_batches
                 ORDER BY received_at DESC
                 LIMIT $1",
                &[&i64::from(limit)],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        rows.into_iter()
            .map(|row| IngestionBatchRow(row).try_into())
            .collect()
    }
}
