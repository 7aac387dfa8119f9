use std::collections::BTreeSet;
use std::sync::Arc;

use garde::Validate;
use tracing::{debug, instrument, warn};

use waypost_domain::wire::IngestPointDto;
use waypost_domain::{
    Clock, ContractValidator, DomainError, DomainResult, DriftEvent, DriftKind, DriftRepository,
    IngestSummary, IngestionBatch, IngestionLedgerRepository, MetricContract, ProcessingStatus,
    QuarantinedTelemetry, TelemetryPoint, TelemetryPointRepository, TypeMismatchPolicy,
    UnknownKeyPolicy,
};

/// One ingest call: a device identity plus its submitted points.
#[derive(Debug, Clone, Validate)]
pub struct IngestTelemetryInput {
    #[garde(length(min = 1, max = 128))]
    pub device_id: String,
    #[garde(skip)]
    pub points: Vec<IngestPointDto>,
}

/// Domain service behind `/v1/ingest`.
///
/// Flow:
/// 1. Validate input shape and the batch size ceiling
/// 2. Classify every point's metrics against the contract
/// 3. Insert points idempotently; conflicts count as duplicates
/// 4. Record drift side records and the ledger row
///
/// Point persistence is the only step allowed to fail the call. Ledger and
/// drift writes degrade to a warning so audit trouble never costs data.
pub struct IngestionService {
    points: Arc<dyn TelemetryPointRepository>,
    ledger: Arc<dyn IngestionLedgerRepository>,
    drift: Arc<dyn DriftRepository>,
    validator: ContractValidator,
    contract: MetricContract,
    clock: Arc<dyn Clock>,
    max_batch_points: usize,
}

impl IngestionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        points: Arc<dyn TelemetryPointRepository>,
        ledger: Arc<dyn IngestionLedgerRepository>,
        drift: Arc<dyn DriftRepository>,
        validator: ContractValidator,
        contract: MetricContract,
        clock: Arc<dyn Clock>,
        max_batch_points: usize,
    ) -> Self {
        Self {
            points,
            ledger,
            drift,
            validator,
            contract,
            clock,
            max_batch_points,
        }
    }

    #[instrument(skip(self, input), fields(device_id = %input.device_id, points = input.points.len()))]
    pub async fn ingest(&self, input: IngestTelemetryInput) -> DomainResult<IngestSummary> {
        waypost_domain::validate_input(&input)?;

        if input.points.len() > self.max_batch_points {
            return Err(DomainError::BatchTooLarge {
                submitted: input.points.len(),
                limit: self.max_batch_points,
            });
        }

        let batch_id = uuid::Uuid::new_v4();
        let received_at = self.clock.now();
        let submitted = input.points.len() as u32;

        let mut to_insert = Vec::with_capacity(input.points.len());
        let mut unknown_keys = BTreeSet::new();
        let mut mismatch_keys = BTreeSet::new();
        let mut drift_events = Vec::new();
        let mut quarantined = Vec::new();
        let mut min_ts = None;
        let mut max_ts = None;

        for point in &input.points {
            let outcome = self.validator.validate(&point.metrics, &self.contract);

            for key in &outcome.unknown_keys {
                if unknown_keys.insert(key.clone())
                    && self.validator.policy().unknown_keys == UnknownKeyPolicy::Flag
                {
                    drift_events.push(DriftEvent {
                        batch_id,
                        device_id: input.device_id.clone(),
                        metric_key: key.clone(),
                        kind: DriftKind::UnknownKey,
                        observed_at: received_at,
                    });
                }
            }

            for (key, value) in &outcome.mismatched {
                if mismatch_keys.insert(key.clone()) {
                    drift_events.push(DriftEvent {
                        batch_id,
                        device_id: input.device_id.clone(),
                        metric_key: key.clone(),
                        kind: DriftKind::TypeMismatch,
                        observed_at: received_at,
                    });
                }
                if self.validator.policy().type_mismatches == TypeMismatchPolicy::Quarantine {
                    quarantined.push(QuarantinedTelemetry {
                        batch_id,
                        device_id: input.device_id.clone(),
                        message_id: point.message_id.clone(),
                        metric_key: key.clone(),
                        value: value.clone(),
                        quarantined_at: received_at,
                    });
                }
            }

            min_ts = Some(min_ts.map_or(point.captured_at, |t: chrono::DateTime<chrono::Utc>| {
                t.min(point.captured_at)
            }));
            max_ts = Some(max_ts.map_or(point.captured_at, |t: chrono::DateTime<chrono::Utc>| {
                t.max(point.captured_at)
            }));

            // A point stripped down to an empty metric map is still a valid
            // liveness signal and is persisted.
            to_insert.push(TelemetryPoint {
                device_id: input.device_id.clone(),
                message_id: point.message_id.clone(),
                captured_at: point.captured_at,
                metrics: outcome.accepted,
                received_at,
            });
        }

        let insert = self.points.insert_points(to_insert).await?;
        let quarantined_count = quarantined.len() as u32;

        let mut status = ProcessingStatus::Completed;
        if let Err(err) = self.drift.record_drift_events(drift_events).await {
            warn!(error = %err, %batch_id, "failed to record drift events");
            status = ProcessingStatus::CompletedWithWarnings;
        }
        if let Err(err) = self.drift.record_quarantined(quarantined).await {
            warn!(error = %err, %batch_id, "failed to record quarantined values");
            status = ProcessingStatus::CompletedWithWarnings;
        }

        let ledger_row = IngestionBatch {
            batch_id,
            device_id: input.device_id.clone(),
            received_at,
            contract_version: self.contract.version,
            contract_hash: self.contract.content_hash(),
            points_submitted: submitted,
            points_accepted: insert.accepted,
            points_duplicate: insert.duplicates,
            points_quarantined: quarantined_count,
            min_ts,
            max_ts,
            unknown_metric_keys: unknown_keys.into_iter().collect(),
            type_mismatch_keys: mismatch_keys.into_iter().collect(),
            processing_status: status,
        };
        if let Err(err) = self.ledger.record_batch(ledger_row).await {
            warn!(error = %err, %batch_id, "failed to record ledger row");
        }

        debug!(
            %batch_id,
            accepted = insert.accepted,
            duplicates = insert.duplicates,
            quarantined = quarantined_count,
            "ingested batch"
        );

        Ok(IngestSummary {
            batch_id,
            accepted: insert.accepted,
            duplicates: insert.duplicates,
            quarantined: quarantined_count,
        })
    }
}
