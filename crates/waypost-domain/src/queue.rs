use crate::error::DomainResult;
use crate::reading::{BufferedReading, MetricMap, SendReason};

/// Derived queue health numbers, recomputed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueMetrics {
    pub disk_bytes: u64,
    pub row_count: u64,
    pub dead_letter_count: u64,
    /// Lifetime quota evictions; persisted so it survives restarts.
    pub evictions_total: u64,
}

/// Resolution of a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still under the attempt ceiling; stays queued for the next flush.
    Retry,
    /// Attempt ceiling reached; parked as dead letter, retained.
    DeadLetter,
}

/// Input for creating a reading; the queue assigns the message id.
#[derive(Debug, Clone)]
pub struct EnqueueReading {
    pub device_id: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub metrics: MetricMap,
    pub reason: SendReason,
}

/// The durable store-and-forward queue on the device.
///
/// Synchronous by design: the store is embedded and local, and callers must
/// never hold a queue transaction across a network await. Every mutation is
/// transactional; rows committed before an abrupt termination survive it.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ReadingQueue: Send + Sync {
    /// Append a reading, evicting oldest rows first if the write would push
    /// the store past its disk quota. Returns the generated message id.
    fn enqueue(&self, reading: EnqueueReading) -> DomainResult<String>;

    /// Pull up to `max_n` readings not exceeding `max_bytes` combined, and
    /// mark them in-flight in the same transaction.
    fn peek_batch(&self, max_n: usize, max_bytes: usize) -> DomainResult<Vec<BufferedReading>>;

    /// Delete readings the server confirmed it accepted (or already had).
    fn mark_delivered(&self, message_ids: &[String]) -> DomainResult<()>;

    /// Return in-flight readings to pending without an attempt penalty.
    /// Used after transient delivery errors, which must never count toward
    /// the dead-letter ceiling.
    fn release(&self, message_ids: &[String]) -> DomainResult<()>;

    /// Record a failed attempt; parks the reading as dead letter once the
    /// configured ceiling is reached.
    fn mark_failed(
        &self,
        message_id: &str,
        max_attempts: u32,
        error: &str,
    ) -> DomainResult<FailureOutcome>;

    fn metrics(&self) -> DomainResult<QueueMetrics>;
}

/// Durable per-UTC-day spend, read before each send decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DailySpend {
    pub bytes_sent: u64,
    pub snapshots: u32,
    pub uploads: u32,
}

/// Persisted daily cost counters. Keyed by UTC date so the day's spend
/// survives a restart and a new day starts from zero without an explicit
/// reset step.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait CostCounterStore: Send + Sync {
    fn spend_for(&self, day: chrono::NaiveDate) -> DomainResult<DailySpend>;

    fn add_bytes(&self, day: chrono::NaiveDate, bytes: u64) -> DomainResult<()>;

    fn add_snapshot(&self, day: chrono::NaiveDate) -> DomainResult<()>;

    fn add_upload(&self, day: chrono::NaiveDate) -> DomainResult<()>;
}
