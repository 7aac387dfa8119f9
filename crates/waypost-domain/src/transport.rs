use std::time::Duration;

use async_trait::async_trait;

use crate::policy::Policy;
use crate::reading::BufferedReading;

/// Server acknowledgment for one delivered batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestAck {
    pub batch_id: uuid::Uuid,
    pub accepted: u32,
    pub duplicates: u32,
    pub quarantined: u32,
}

/// Delivery failure taxonomy.
///
/// Retryable errors are absorbed by backoff and never surfaced as data
/// loss. Fatal errors mean the batch must not be retried as-is; the caller
/// records the attempt and the attempt ceiling routes poison readings to
/// dead letter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("retryable delivery error: {message}")]
    Retryable {
        message: String,
        /// Server-supplied retry hint (e.g. Retry-After). Honored verbatim,
        /// overriding backoff math.
        retry_after: Option<Duration>,
    },

    #[error("fatal batch error: {message}")]
    Fatal { message: String },
}

impl TransportError {
    pub fn retryable(message: impl Into<String>) -> Self {
        TransportError::Retryable {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        TransportError::Fatal {
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal { .. })
    }
}

/// Authenticated delivery of reading batches to the ingest endpoint.
///
/// The caller passes the live policy so retry spacing always follows the
/// currently fetched backoff bounds, not whatever was in force at startup.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TelemetryTransport: Send + Sync {
    async fn send(
        &self,
        batch: &[BufferedReading],
        policy: &Policy,
    ) -> Result<IngestAck, TransportError>;
}
