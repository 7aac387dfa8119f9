use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use waypost_domain::{DomainError, DriftEvent, DriftKind, IngestionBatch, ProcessingStatus};

/// Ledger row as selected by `list_batches`.
pub(crate) struct IngestionBatchRow(pub Row);

impl TryFrom<IngestionBatchRow> for IngestionBatch {
    type Error = DomainError;

    fn try_from(row: IngestionBatchRow) -> Result<Self, Self::Error> {
        let row = row.0;
        let contract_version: i32 = row.get(3);
        let points_submitted: i32 = row.get(5);
        let points_accepted: i32 = row.get(6);
        let points_duplicate: i32 = row.get(7);
        let points_quarantined: i32 = row.get(8);
        let status: String = row.get(13);

        Ok(IngestionBatch {
            batch_id: row.get(0),
            device_id: row.get(1),
            received_at: row.get(2),
            contract_version: contract_version as u32,
            contract_hash: row.get(4),
            points_submitted: points_submitted as u32,
            points_accepted: points_accepted as u32,
            points_duplicate: points_duplicate as u32,
            points_quarantined: points_quarantined as u32,
            min_ts: row.get::<_, Option<DateTime<Utc>>>(9),
            max_ts: row.get::<_, Option<DateTime<Utc>>>(10),
            unknown_metric_keys: row.get(11),
            type_mismatch_keys: row.get(12),
            processing_status: parse_status(&status)?,
        })
    }
}

fn parse_status(status: &str) -> Result<ProcessingStatus, DomainError> {
    match status {
        "completed" => Ok(ProcessingStatus::Completed),
        "completed_with_warnings" => Ok(ProcessingStatus::CompletedWithWarnings),
        other => Err(DomainError::RepositoryError(anyhow!(
            "unknown processing status in ledger: {other}"
        ))),
    }
}

pub(crate) struct DriftEventRow(pub Row);

impl TryFrom<DriftEventRow> for DriftEvent {
    type Error = DomainError;

    fn try_from(row: DriftEventRow) -> Result<Self, Self::Error> {
        let row = row.0;
        let kind: String = row.get(3);
        Ok(DriftEvent {
            batch_id: row.get(0),
            device_id: row.get(1),
            metric_key: row.get(2),
            kind: parse_kind(&kind)?,
            observed_at: row.get(4),
        })
    }
}

fn parse_kind(kind: &str) -> Result<DriftKind, DomainError> {
    match kind {
        "unknown_key" => Ok(DriftKind::UnknownKey),
        "type_mismatch" => Ok(DriftKind::TypeMismatch),
        other => Err(DomainError::RepositoryError(anyhow!(
            "unknown drift kind: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_as_str() {
        for status in [
            ProcessingStatus::Completed,
            ProcessingStatus::CompletedWithWarnings,
        ] {
            assert_eq!(parse_status(status.as_str()).unwrap(), status);
        }
        assert!(parse_status("exploded").is_err());
    }

    #[test]
    fn test_kind_round_trips_through_as_str() {
        for kind in [DriftKind::UnknownKey, DriftKind::TypeMismatch] {
            assert_eq!(parse_kind(kind.as_str()).unwrap(), kind);
        }
        assert!(parse_kind("renamed").is_err());
    }
}
