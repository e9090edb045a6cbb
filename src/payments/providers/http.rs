//! Shared outbound HTTP plumbing for gateway adapters
//!
//! Both adapters send a single request and read a JSON body back. What they
//! share is the transport policy: a bounded timeout, and retries with
//! exponential backoff on rate limiting, 5xx answers and transport errors.

use crate::error::{AppError, AppErrorKind, ExternalError};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::{error, warn};

/// Retry policy for gateway calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2_u32.saturating_pow(attempt))
    }
}

/// Final answer from a gateway after retries are exhausted or not needed
#[derive(Debug, Clone)]
pub struct GatewayReply {
    pub status: StatusCode,
    pub body: String,
}

impl GatewayReply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// HTTP client bound to one gateway
#[derive(Debug, Clone)]
pub struct GatewayHttp {
    client: Client,
    provider: &'static str,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl GatewayHttp {
    pub fn new(provider: &'static str, timeout_secs: u64, retry: RetryPolicy) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                AppError::configuration(format!("failed to build {} HTTP client: {}", provider, e))
            })?;

        Ok(Self {
            client,
            provider,
            timeout_secs,
            retry,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send the request, retrying where resubmission is safe.
    ///
    /// Any non-retryable answer, including 4xx, is handed back to the caller
    /// to interpret; only exhausted retries become errors here.
    pub async fn send(&self, request: RequestBuilder) -> Result<GatewayReply, AppError> {
        let mut last_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.retry.max_retries {
            let req = request.try_clone().ok_or_else(|| {
                AppError::provider(self.provider, "Failed to clone request", false)
            })?;
            let can_retry = attempt < self.retry.max_retries;

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok());
                    let body = response.text().await.unwrap_or_default();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if can_retry {
                            self.backoff(attempt, "Rate limited").await;
                            continue;
                        }
                        return Err(AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                            service: self.provider.to_string(),
                            retry_after,
                        })));
                    }

                    if status.is_server_error() && can_retry {
                        warn!(provider = self.provider, status = %status, "Gateway server error");
                        self.backoff(attempt, "Server error").await;
                        continue;
                    }

                    return Ok(GatewayReply { status, body });
                }
                Err(e) => {
                    if can_retry {
                        warn!(provider = self.provider, error = %e, "Gateway request error");
                        last_error = Some(e);
                        self.backoff(attempt, "Request error").await;
                        continue;
                    }
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if e.is_timeout() => {
                error!(provider = self.provider, "Gateway timed out");
                Err(AppError::new(AppErrorKind::External(ExternalError::Timeout {
                    service: self.provider.to_string(),
                    seconds: self.timeout_secs,
                })))
            }
            last_error => {
                let message = format!(
                    "Request failed after {} retries: {}",
                    self.retry.max_retries,
                    last_error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "Unknown error".to_string())
                );
                error!(provider = self.provider, "{}", message);
                Err(AppError::provider(self.provider, message, true))
            }
        }
    }

    async fn backoff(&self, attempt: u32, reason: &str) {
        let delay = self.retry.delay_for(attempt);
        warn!(
            provider = self.provider,
            "{}, retrying after {:?} (attempt {})",
            reason,
            delay,
            attempt + 1
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy {
            max_retries: 64,
            base_delay: Duration::from_secs(1),
        };
        assert!(policy.delay_for(63) >= policy.delay_for(10));
    }
}
