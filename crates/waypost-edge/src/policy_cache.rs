use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waypost_domain::wire::PolicyResponseDto;
use waypost_domain::{DomainError, DomainResult, Policy};

/// Result of one revalidation round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyFetch {
    /// Token still valid; rearm the refresh timer from the server window.
    NotModified { refresh_after: Duration },
    Updated {
        policy: Policy,
        token: String,
        refresh_after: Duration,
    },
}

/// Where policies come from. The HTTP implementation talks to the policy
/// endpoint; tests substitute a mock.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn fetch(&self, token: Option<String>) -> DomainResult<PolicyFetch>;
}

struct CacheState {
    policy: Arc<Policy>,
    token: Option<String>,
}

/// Last-known-good policy behind an atomically swapped handle.
///
/// `get` never touches the network: it returns the cached policy, or the
/// hardcoded conservative default if nothing was ever fetched. Refresh
/// replaces the whole value; a reader can never observe a half-updated
/// policy.
pub struct PolicyCache {
    state: RwLock<CacheState>,
    source: Arc<dyn PolicySource>,
    fallback_refresh: Duration,
}

impl PolicyCache {
    pub fn new(source: Arc<dyn PolicySource>, fallback_refresh: Duration) -> Self {
        Self {
            state: RwLock::new(CacheState {
                policy: Arc::new(Policy::conservative_default()),
                token: None,
            }),
            source,
            fallback_refresh,
        }
    }

    pub fn get(&self) -> Arc<Policy> {
        self.state
            .read()
            .map(|state| state.policy.clone())
            .unwrap_or_else(|_| Arc::new(Policy::conservative_default()))
    }

    /// One revalidation round trip. Returns how long to wait before the
    /// next one; fetch failures keep the last-known-good policy.
    pub async fn refresh_once(&self) -> DomainResult<Duration> {
        let token = self
            .state
            .read()
            .map(|state| state.token.clone())
            .unwrap_or(None);

        match self.source.fetch(token).await? {
            PolicyFetch::NotModified { refresh_after } => {
                debug!(refresh_after_s = refresh_after.as_secs(), "policy unchanged");
                Ok(refresh_after.max(Duration::from_secs(1)))
            }
            PolicyFetch::Updated {
                policy,
                token,
                refresh_after,
            } => {
                info!(version = policy.version, %token, "policy updated");
                if let Ok(mut state) = self.state.write() {
                    *state = CacheState {
                        policy: Arc::new(policy),
                        token: Some(token),
                    };
                }
                Ok(refresh_after.max(Duration::from_secs(1)))
            }
        }
    }

    /// Periodic refresh worker. A failed fetch falls back to the configured
    /// interval instead of looping tightly.
    pub async fn run(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        loop {
            let wait = match self.refresh_once().await {
                Ok(wait) => wait,
                Err(err) => {
                    warn!(error = %err, "policy refresh failed, keeping last-known-good");
                    self.fallback_refresh
                }
            };
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("policy refresh stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// HTTP implementation of [`PolicySource`] with conditional revalidation:
/// the cache token rides in `If-None-Match` and an unchanged policy costs a
/// 304, not a payload.
pub struct HttpPolicySource {
    client: Client,
    policy_url: Url,
    device_token: String,
    default_refresh: Duration,
}

impl HttpPolicySource {
    pub fn new(
        policy_url: Url,
        device_token: String,
        request_timeout: Duration,
        default_refresh: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            policy_url,
            device_token,
            default_refresh,
        })
    }

    fn freshness_window(response: &reqwest::Response, fallback: Duration) -> Duration {
        response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split(',')
                    .filter_map(|d| d.trim().strip_prefix("max-age="))
                    .next()
                    .and_then(|secs| secs.parse::<u64>().ok())
            })
            .map(Duration::from_secs)
            .unwrap_or(fallback)
    }
}

#[async_trait]
impl PolicySource for HttpPolicySource {
    async fn fetch(&self, token: Option<String>) -> DomainResult<PolicyFetch> {
        let mut request = self
            .client
            .get(self.policy_url.clone())
            .bearer_auth(&self.device_token);
        if let Some(token) = &token {
            request = request.header(reqwest::header::IF_NONE_MATCH, format!("\"{token}\""));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DomainError::PolicyFetch(format!("network error: {e}")))?;

        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(PolicyFetch::NotModified {
                refresh_after: Self::freshness_window(&response, self.default_refresh),
            }),
            status if status.is_success() => {
                let refresh_after = Self::freshness_window(&response, self.default_refresh);
                let body: PolicyResponseDto = response
                    .json()
                    .await
                    .map_err(|e| DomainError::PolicyFetch(format!("decoding policy: {e}")))?;
                Ok(PolicyFetch::Updated {
                    policy: body.policy,
                    token: body.token,
                    refresh_after: Duration::from_secs(body.refresh_after_s).max(refresh_after),
                })
            }
            status => Err(DomainError::PolicyFetch(format!(
                "policy endpoint returned {status}"
            ))),
        }
    }
}
