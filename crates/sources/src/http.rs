//! Permit-gated HTTP plumbing shared by all source workers
//!
//! Every outbound request holds exactly one permit from the rate-limit
//! manager and reports its outcome: transport errors, timeouts and 5xx/429
//! responses count as failures toward the circuit breaker; expected 4xx
//! responses count as successes (the upstream is healthy, the request was
//! not servable). Transient failures are retried within a small per-request
//! budget with jittered backoff.

use crate::limiter::RateLimitManager;
use paperscout_common::errors::{AppError, Result};
use paperscout_common::metrics::record_source_request;
use paperscout_common::models::DiscoverySource;
use rand::Rng;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_CAP: Duration = Duration::from_secs(2);

/// HTTP client bound to one discovery source
pub struct SourceHttp {
    client: reqwest::Client,
    limiter: Arc<RateLimitManager>,
    source: DiscoverySource,
    /// How long one request may wait for a permit
    permit_timeout: Duration,
    /// Attempt budget for transient failures
    max_attempts: u32,
}

impl SourceHttp {
    pub fn new(
        source: DiscoverySource,
        limiter: Arc<RateLimitManager>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(format!("paperscout/{}", paperscout_common::VERSION))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            limiter,
            source,
            permit_timeout: request_timeout,
            max_attempts: 3,
        })
    }

    pub fn source(&self) -> DiscoverySource {
        self.source
    }

    /// GET `url` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&'static str, String)],
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.execute(cancel, || {
            let mut request = self.client.get(url).query(query);
            for (name, value) in headers {
                request = request.header(*name, value);
            }
            request
        })
        .await
    }

    /// POST a JSON body to `url` and decode the JSON response
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        headers: &[(&'static str, String)],
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.execute(cancel, || {
            let mut request = self.client.post(url).json(body);
            for (name, value) in headers {
                request = request.header(*name, value);
            }
            request
        })
        .await
    }

    async fn execute<T, F>(&self, cancel: &CancellationToken, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_err: Option<AppError> = None;

        for attempt in 0..self.max_attempts {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            if attempt > 0 {
                let delay = retry_delay(attempt);
                debug!(source = %self.source, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            match self.attempt(cancel, &build).await {
                Ok(value) => return Ok(value),
                Err(err) if retryable(&err) => {
                    warn!(source = %self.source, attempt, error = %err, "transient request failure");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or_else(|| AppError::SourceTransport {
            source: self.source,
            message: "request failed with no recorded error".to_string(),
        }))
    }

    async fn attempt<T, F>(&self, cancel: &CancellationToken, build: &F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        // One permit per outbound request, reported exactly once. Dropping
        // the permit on the cancellation path reports a failure.
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            acquired = self.limiter.acquire(self.source, self.permit_timeout) => acquired?,
        };
        let start = Instant::now();

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                drop(permit);
                return Err(AppError::Cancelled);
            }
            result = build().send() => result,
        };

        let elapsed = start.elapsed().as_secs_f64();
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                permit.failure();
                record_source_request(self.source.as_str(), elapsed, false);
                return Err(if err.is_timeout() {
                    AppError::SourceTransport {
                        source: self.source,
                        message: "request timed out".to_string(),
                    }
                } else {
                    AppError::SourceTransport {
                        source: self.source,
                        message: err.to_string(),
                    }
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            permit.success();
            record_source_request(self.source.as_str(), elapsed, true);
            let body = response.text().await.map_err(|e| AppError::SourceTransport {
                source: self.source,
                message: format!("failed reading body: {}", e),
            })?;
            // A well-formed HTTP exchange with an undecodable body is a
            // protocol error, not a transport one; it is not retried.
            serde_json::from_str(&body).map_err(|e| AppError::SourceProtocol {
                source: self.source,
                message: format!("schema mismatch: {}", e),
            })
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            permit.failure();
            record_source_request(self.source.as_str(), elapsed, false);
            Err(AppError::SourceRateLimited {
                source: self.source,
            })
        } else if status.is_server_error() {
            permit.failure();
            record_source_request(self.source.as_str(), elapsed, false);
            Err(AppError::SourceTransport {
                source: self.source,
                message: format!("upstream returned {}", status),
            })
        } else {
            // Expected business-level 4xx: upstream is healthy
            permit.success();
            record_source_request(self.source.as_str(), elapsed, false);
            Err(AppError::SourceProtocol {
                source: self.source,
                message: format!("upstream returned {}", status),
            })
        }
    }
}

fn retryable(err: &AppError) -> bool {
    matches!(
        err,
        AppError::SourceTransport { .. } | AppError::SourceRateLimited { .. }
    )
}

fn retry_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE.as_millis() as u64 * 2u64.saturating_pow(attempt - 1);
    let capped = base.min(RETRY_CAP.as_millis() as u64);
    // +/- 25% jitter
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_is_bounded() {
        for attempt in 1..6 {
            let delay = retry_delay(attempt);
            assert!(delay >= Duration::from_millis(187));
            assert!(delay <= Duration::from_millis(2_500));
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(retryable(&AppError::SourceTransport {
            source: DiscoverySource::Crossref,
            message: "reset".into(),
        }));
        assert!(retryable(&AppError::SourceRateLimited {
            source: DiscoverySource::Crossref,
        }));
        assert!(!retryable(&AppError::SourceProtocol {
            source: DiscoverySource::Crossref,
            message: "404".into(),
        }));
        assert!(!retryable(&AppError::SourceCircuitOpen {
            source: DiscoverySource::Crossref,
        }));
        assert!(!retryable(&AppError::Cancelled));
    }
}
