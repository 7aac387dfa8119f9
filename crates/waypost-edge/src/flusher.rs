use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use waypost_domain::{
    Clock, CostCounterStore, DomainResult, FailureOutcome, Policy, ReadingQueue,
    TelemetryTransport, TransportError,
};

/// What one flush pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub delivered: u32,
    pub duplicates: u32,
    pub released: u32,
    pub dead_lettered: u32,
}

/// Drains the local queue toward the ingest endpoint, one bounded batch per
/// pass.
///
/// The queue is read and resolved in its own transactions on either side of
/// the network call; it is never held open across the send.
pub struct QueueFlusher {
    queue: Arc<dyn ReadingQueue>,
    transport: Arc<dyn TelemetryTransport>,
    costs: Arc<dyn CostCounterStore>,
    clock: Arc<dyn Clock>,
}

impl QueueFlusher {
    pub fn new(
        queue: Arc<dyn ReadingQueue>,
        transport: Arc<dyn TelemetryTransport>,
        costs: Arc<dyn CostCounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            transport,
            costs,
            clock,
        }
    }

    #[instrument(skip(self, policy))]
    pub async fn flush_once(&self, policy: &Policy) -> DomainResult<FlushReport> {
        let today = self.clock.now().date_naive();

        // Upload cap defers the flush; readings stay queued, nothing is lost.
        let spend = self.costs.spend_for(today)?;
        if spend.uploads >= policy.cost_caps.max_uploads_per_day {
            debug!(uploads = spend.uploads, "upload cap reached, deferring flush");
            return Ok(FlushReport::default());
        }

        let batch = self
            .queue
            .peek_batch(policy.max_batch_readings, policy.max_batch_bytes)?;
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }

        let message_ids: Vec<String> = batch.iter().map(|r| r.message_id.clone()).collect();
        let batch_bytes: usize = batch.iter().map(|r| r.encoded_size()).sum();

        match self.transport.send(&batch, policy).await {
            Ok(ack) => {
                // Duplicates are acceptance: the server already has them.
                self.queue.mark_delivered(&message_ids)?;
                self.costs.add_bytes(today, batch_bytes as u64)?;
                self.costs.add_upload(today)?;
                info!(
                    delivered = message_ids.len(),
                    duplicates = ack.duplicates,
                    bytes = batch_bytes,
                    "flushed batch"
                );
                Ok(FlushReport {
                    delivered: message_ids.len() as u32,
                    duplicates: ack.duplicates,
                    ..FlushReport::default()
                })
            }
            Err(TransportError::Retryable { message, .. }) => {
                // Transient: back in line, no attempt penalty, no data loss.
                debug!(%message, count = message_ids.len(), "transient failure, releasing batch");
                self.queue.release(&message_ids)?;
                Ok(FlushReport {
                    released: message_ids.len() as u32,
                    ..FlushReport::default()
                })
            }
            Err(TransportError::Fatal { message }) => {
                warn!(%message, count = message_ids.len(), "fatal batch rejection");
                let mut dead = 0u32;
                for id in &message_ids {
                    if self.queue.mark_failed(id, policy.max_delivery_attempts, &message)?
                        == FailureOutcome::DeadLetter
                    {
                        dead += 1;
                    }
                }
                Ok(FlushReport {
                    dead_lettered: dead,
                    ..FlushReport::default()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_domain::clock::MockClock;
    use waypost_domain::queue::{MockCostCounterStore, MockReadingQueue};
    use waypost_domain::transport::MockTelemetryTransport;
    use waypost_domain::{BufferedReading, IngestAck, MetricMap, ReadingStatus, SendReason};

    fn reading(id: &str) -> BufferedReading {
        BufferedReading {
            message_id: id.to_string(),
            device_id: "d1".to_string(),
            captured_at: chrono::Utc::now(),
            metrics: MetricMap::new(),
            reason: SendReason::Delta,
            enqueued_at: chrono::Utc::now(),
            attempt_count: 0,
            status: ReadingStatus::InFlight,
        }
    }

    fn idle_costs() -> MockCostCounterStore {
        let mut costs = MockCostCounterStore::new();
        costs
            .expect_spend_for()
            .returning(|_| Ok(waypost_domain::DailySpend::default()));
        costs
    }

    fn ticking_clock() -> MockClock {
        let mut clock = MockClock::new();
        clock.expect_now().returning(chrono::Utc::now);
        clock
    }

    fn ack(accepted: u32, duplicates: u32) -> IngestAck {
        IngestAck {
            batch_id: uuid::Uuid::new_v4(),
            accepted,
            duplicates,
            quarantined: 0,
        }
    }

    #[tokio::test]
    async fn test_successful_flush_marks_delivered_and_counts_bytes() {
        let mut queue = MockReadingQueue::new();
        queue
            .expect_peek_batch()
            .times(1)
            .return_once(|_, _| Ok(vec![reading("m1"), reading("m2")]));
        queue
            .expect_mark_delivered()
            .withf(|ids: &[String]| ids.len() == 2 && ids[0] == "m1" && ids[1] == "m2")
            .times(1)
            .return_once(|_| Ok(()));

        let mut transport = MockTelemetryTransport::new();
        transport
            .expect_send()
            .times(1)
            .return_once(|_, _| Ok(ack(2, 0)));

        let mut costs = MockCostCounterStore::new();
        costs
            .expect_spend_for()
            .returning(|_| Ok(waypost_domain::DailySpend::default()));
        costs
            .expect_add_bytes()
            .withf(|_, bytes| *bytes > 0)
            .times(1)
            .return_once(|_, _| Ok(()));
        costs.expect_add_upload().times(1).return_once(|_| Ok(()));

        let mut clock = MockClock::new();
        clock.expect_now().returning(chrono::Utc::now);

        let flusher = QueueFlusher::new(
            Arc::new(queue),
            Arc::new(transport),
            Arc::new(costs),
            Arc::new(clock),
        );
        let report = flusher
            .flush_once(&Policy::conservative_default())
            .await
            .unwrap();
        assert_eq!(report.delivered, 2);
    }

    #[tokio::test]
    async fn test_transient_failure_releases_without_penalty() {
        let mut queue = MockReadingQueue::new();
        queue
            .expect_peek_batch()
            .times(1)
            .return_once(|_, _| Ok(vec![reading("m1")]));
        queue
            .expect_release()
            .withf(|ids: &[String]| ids.len() == 1 && ids[0] == "m1")
            .times(1)
            .return_once(|_| Ok(()));

        let mut transport = MockTelemetryTransport::new();
        transport
            .expect_send()
            .times(1)
            .return_once(|_, _| Err(TransportError::retryable("503")));

        let flusher = QueueFlusher::new(
            Arc::new(queue),
            Arc::new(transport),
            Arc::new(idle_costs()),
            Arc::new(ticking_clock()),
        );
        let report = flusher
            .flush_once(&Policy::conservative_default())
            .await
            .unwrap();
        assert_eq!(report.released, 1);
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_fatal_failure_records_attempts() {
        let mut queue = MockReadingQueue::new();
        queue
            .expect_peek_batch()
            .times(1)
            .return_once(|_, _| Ok(vec![reading("m1")]));
        queue
            .expect_mark_failed()
            .withf(|id: &str, _, _| id == "m1")
            .times(1)
            .return_once(|_, _, _| Ok(FailureOutcome::DeadLetter));

        let mut transport = MockTelemetryTransport::new();
        transport
            .expect_send()
            .times(1)
            .return_once(|_, _| Err(TransportError::fatal("401")));

        let flusher = QueueFlusher::new(
            Arc::new(queue),
            Arc::new(transport),
            Arc::new(idle_costs()),
            Arc::new(ticking_clock()),
        );
        let report = flusher
            .flush_once(&Policy::conservative_default())
            .await
            .unwrap();
        assert_eq!(report.dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_empty_queue_is_a_no_op() {
        let mut queue = MockReadingQueue::new();
        queue
            .expect_peek_batch()
            .times(1)
            .return_once(|_, _| Ok(Vec::new()));

        let flusher = QueueFlusher::new(
            Arc::new(queue),
            Arc::new(MockTelemetryTransport::new()),
            Arc::new(idle_costs()),
            Arc::new(ticking_clock()),
        );
        let report = flusher
            .flush_once(&Policy::conservative_default())
            .await
            .unwrap();
        assert_eq!(report, FlushReport::default());
    }

    #[tokio::test]
    async fn test_flush_hands_live_policy_to_transport() {
        let mut policy = Policy::conservative_default();
        policy.backoff_min_ms = 250;
        policy.backoff_max_ms = 7_000;

        let mut queue = MockReadingQueue::new();
        queue
            .expect_peek_batch()
            .times(1)
            .return_once(|_, _| Ok(vec![reading("m1")]));
        queue.expect_mark_delivered().times(1).return_once(|_| Ok(()));

        // Retry spacing must follow the fetched policy, not the defaults in
        // force when the transport was built.
        let mut transport = MockTelemetryTransport::new();
        transport
            .expect_send()
            .withf(|_, policy: &Policy| {
                policy.backoff_min_ms == 250 && policy.backoff_max_ms == 7_000
            })
            .times(1)
            .return_once(|_, _| Ok(ack(1, 0)));

        let mut costs = idle_costs();
        costs.expect_add_bytes().returning(|_, _| Ok(()));
        costs.expect_add_upload().returning(|_| Ok(()));

        let flusher = QueueFlusher::new(
            Arc::new(queue),
            Arc::new(transport),
            Arc::new(costs),
            Arc::new(ticking_clock()),
        );
        let report = flusher.flush_once(&policy).await.unwrap();
        assert_eq!(report.delivered, 1);
    }

    /// Ingest endpoint stand-in: dedupes on message id the way the server's
    /// unique constraint does, and remembers everything it was sent.
    #[derive(Default)]
    struct RecordingServer {
        seen: std::sync::Mutex<std::collections::HashSet<String>>,
        sent: std::sync::Mutex<Vec<BufferedReading>>,
    }

    #[async_trait::async_trait]
    impl TelemetryTransport for RecordingServer {
        async fn send(
            &self,
            batch: &[BufferedReading],
            _policy: &Policy,
        ) -> Result<IngestAck, TransportError> {
            let mut seen = self.seen.lock().unwrap();
            self.sent.lock().unwrap().extend_from_slice(batch);
            let mut accepted = 0u32;
            let mut duplicates = 0u32;
            for reading in batch {
                if seen.insert(reading.message_id.clone()) {
                    accepted += 1;
                } else {
                    duplicates += 1;
                }
            }
            Ok(IngestAck {
                batch_id: uuid::Uuid::new_v4(),
                accepted,
                duplicates,
                quarantined: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_bounded_flush_then_full_replay_counts_duplicates() {
        use waypost_domain::queue::EnqueueReading;
        use waypost_domain::SystemClock;
        use waypost_queue::SqliteQueue;

        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(
            SqliteQueue::open(dir.path().join("queue.db"), 10 * 1024 * 1024).unwrap(),
        );
        for _ in 0..5 {
            queue
                .enqueue(EnqueueReading {
                    device_id: "d1".to_string(),
                    captured_at: chrono::Utc::now(),
                    metrics: MetricMap::new(),
                    reason: SendReason::Delta,
                })
                .unwrap();
        }

        let server = Arc::new(RecordingServer::default());
        let mut policy = Policy::conservative_default();
        policy.max_batch_readings = 3;

        let flusher = QueueFlusher::new(
            queue.clone(),
            server.clone(),
            queue.clone(),
            Arc::new(SystemClock),
        );

        // Five buffered offline drain in two bounded passes.
        let first = flusher.flush_once(&policy).await.unwrap();
        assert_eq!(first.delivered, 3);
        let second = flusher.flush_once(&policy).await.unwrap();
        assert_eq!(second.delivered, 2);

        // A device retrying the whole submission after a lost ack: every
        // point is already persisted, so all five come back as duplicates.
        let replayed: Vec<BufferedReading> = server.sent.lock().unwrap().clone();
        assert_eq!(replayed.len(), 5);
        let ack = server.send(&replayed, &policy).await.unwrap();
        assert_eq!(ack.accepted, 0);
        assert_eq!(ack.duplicates, 5);
    }

    #[tokio::test]
    async fn test_upload_cap_defers_flush_without_touching_queue() {
        let mut costs = MockCostCounterStore::new();
        costs.expect_spend_for().returning(|_| {
            Ok(waypost_domain::DailySpend {
                bytes_sent: 0,
                snapshots: 0,
                uploads: 12,
            })
        });

        let flusher = QueueFlusher::new(
            Arc::new(MockReadingQueue::new()),
            Arc::new(MockTelemetryTransport::new()),
            Arc::new(costs),
            Arc::new(ticking_clock()),
        );
        let report = flusher
            .flush_once(&Policy::conservative_default())
            .await
            .unwrap();
        assert_eq!(report, FlushReport::default());
    }
}
