//! Reqwest-backed ingest transport. Owns transport details only: request
//! serialization, status mapping, backoff, and the server retry hint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use waypost_domain::wire::{IngestPointDto, IngestRequestDto, IngestResponseDto};
use waypost_domain::{BufferedReading, IngestAck, Policy, TelemetryTransport, TransportError};

use crate::backoff::BackoffPolicy;

/// HTTP transport client for one device identity.
pub struct HttpTransport {
    client: Client,
    ingest_url: Url,
    device_id: String,
    device_token: String,
    /// In-call retry budget for retryable failures; the durable queue takes
    /// over once it is spent.
    max_attempts: u32,
}

impl HttpTransport {
    pub fn new(
        ingest_url: Url,
        device_id: String,
        device_token: String,
        max_attempts: u32,
        request_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            ingest_url,
            device_id,
            device_token,
            max_attempts: max_attempts.max(1),
        })
    }

    async fn send_once(&self, batch: &[BufferedReading]) -> Result<IngestAck, TransportError> {
        let request = IngestRequestDto {
            device_id: self.device_id.clone(),
            points: batch
                .iter()
                .map(|reading| IngestPointDto {
                    message_id: reading.message_id.clone(),
                    captured_at: reading.captured_at,
                    metrics: reading.metrics.clone(),
                })
                .collect(),
        };

        let response = self
            .client
            .post(self.ingest_url.clone())
            .bearer_auth(&self.device_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::retryable(format!("network error: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let body: IngestResponseDto = response
                .json()
                .await
                .map_err(|e| TransportError::retryable(format!("decoding ack: {e}")))?;
            return Ok(IngestAck {
                batch_id: body.batch_id,
                accepted: body.accepted,
                duplicates: body.duplicates,
                quarantined: body.quarantined,
            });
        }

        let retry_after = parse_retry_after(&response);
        match status {
            StatusCode::TOO_MANY_REQUESTS => Err(TransportError::Retryable {
                message: "rate limited".to_string(),
                retry_after,
            }),
            s if s.is_server_error() => Err(TransportError::Retryable {
                message: format!("server error {s}"),
                retry_after,
            }),
            StatusCode::REQUEST_TIMEOUT => Err(TransportError::Retryable {
                message: "request timeout".to_string(),
                retry_after,
            }),
            // Auth rejection, malformed payload, oversized batch: retrying
            // the same bytes cannot succeed.
            s => Err(TransportError::fatal(format!("rejected with {s}"))),
        }
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl TelemetryTransport for HttpTransport {
    async fn send(
        &self,
        batch: &[BufferedReading],
        policy: &Policy,
    ) -> Result<IngestAck, TransportError> {
        // Bounds come from the live policy so a refresh takes effect on the
        // very next retry.
        let backoff = BackoffPolicy::new(policy.backoff_min_ms, policy.backoff_max_ms);
        let mut attempt = 0u32;
        loop {
            match self.send_once(batch).await {
                Ok(ack) => {
                    debug!(
                        accepted = ack.accepted,
                        duplicates = ack.duplicates,
                        "batch acknowledged"
                    );
                    return Ok(ack);
                }
                Err(err @ TransportError::Fatal { .. }) => return Err(err),
                Err(TransportError::Retryable {
                    message,
                    retry_after,
                }) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(TransportError::Retryable {
                            message,
                            retry_after,
                        });
                    }
                    // A server-supplied hint wins over local backoff math.
                    let delay = retry_after.unwrap_or_else(|| backoff.delay(attempt - 1));
                    warn!(%message, attempt, delay_ms = delay.as_millis() as u64, "retrying send");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
