use serde::{Deserialize, Serialize};

/// Metric key to scalar value map carried by readings and points.
pub type MetricMap = serde_json::Map<String, serde_json::Value>;

/// Delivery state of a buffered reading inside the local queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    /// Waiting for the next flush.
    Pending,
    /// Handed to the transport; reset to pending if the process dies mid-send.
    InFlight,
    /// Exhausted its delivery attempts; retained for inspection.
    DeadLetter,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Pending => "pending",
            ReadingStatus::InFlight => "in_flight",
            ReadingStatus::DeadLetter => "dead_letter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReadingStatus::Pending),
            "in_flight" => Some(ReadingStatus::InFlight),
            "dead_letter" => Some(ReadingStatus::DeadLetter),
            _ => None,
        }
    }
}

/// Why the reporter produced an outbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendReason {
    /// Full snapshot sent once per process lifetime.
    Startup,
    /// Full snapshot on an OK <-> WARN transition.
    StateChange,
    /// Full snapshot when the active alert set changed while staying WARN.
    AlertChange,
    /// Periodic full snapshot while a critical alert is active.
    AlertInterval,
    /// Minimal liveness payload after a silence window.
    Heartbeat,
    /// Only the metric keys that moved past their delta thresholds.
    Delta,
}

impl SendReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendReason::Startup => "startup",
            SendReason::StateChange => "state_change",
            SendReason::AlertChange => "alert_change",
            SendReason::AlertInterval => "alert_interval",
            SendReason::Heartbeat => "heartbeat",
            SendReason::Delta => "delta",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "startup" => Some(SendReason::Startup),
            "state_change" => Some(SendReason::StateChange),
            "alert_change" => Some(SendReason::AlertChange),
            "alert_interval" => Some(SendReason::AlertInterval),
            "heartbeat" => Some(SendReason::Heartbeat),
            "delta" => Some(SendReason::Delta),
            _ => None,
        }
    }

    /// Snapshot-shaped payloads carry the full metric set and count against
    /// the daily snapshot cap.
    pub fn is_snapshot(&self) -> bool {
        matches!(
            self,
            SendReason::Startup
                | SendReason::StateChange
                | SendReason::AlertChange
                | SendReason::AlertInterval
        )
    }
}

/// One sensor observation pending delivery.
///
/// Owned exclusively by the local queue: created at enqueue, mutated only
/// through queue transactions, removed on server-confirmed acceptance or
/// parked as dead letter.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedReading {
    /// Stable idempotency key, generated once and never regenerated on retry.
    pub message_id: String,
    pub device_id: String,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub metrics: MetricMap,
    pub reason: SendReason,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub attempt_count: u32,
    pub status: ReadingStatus,
}

impl BufferedReading {
    /// Approximate wire size of this reading, used for byte-bounded batching
    /// and cost-cap accounting.
    pub fn encoded_size(&self) -> usize {
        serde_json::to_vec(&self.metrics).map_or(0, |v| v.len())
            + self.message_id.len()
            + self.device_id.len()
            + 64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ReadingStatus::Pending,
            ReadingStatus::InFlight,
            ReadingStatus::DeadLetter,
        ] {
            assert_eq!(ReadingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReadingStatus::parse("bogus"), None);
    }

    #[test]
    fn test_snapshot_reasons() {
        assert!(SendReason::Startup.is_snapshot());
        assert!(SendReason::AlertChange.is_snapshot());
        assert!(!SendReason::Heartbeat.is_snapshot());
        assert!(!SendReason::Delta.is_snapshot());
    }
}
