//! Single-retry rate-limit policy for per-recipient platform calls.
//!
//! A forbidden response is terminal (`DmClosed`). A rate-limit response waits
//! for the platform-advised duration and retries the same call exactly once;
//! whatever the retry returns is final. Every other failure is `Failed`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::dispatch_platform::PlatformError;

pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Classified result of one wrapped call.
pub enum CallOutcome<T> {
    Success(T),
    SuccessAfterRetry(T),
    DmClosed { detail: String },
    Failed { reason: String },
}

impl<T> CallOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_) | Self::SuccessAfterRetry(_))
    }

    pub fn retried(&self) -> bool {
        matches!(self, Self::SuccessAfterRetry(_))
    }
}

#[async_trait]
/// Notified once, before the backoff sleep starts.
pub trait BackoffObserver: Send {
    async fn on_backoff(&mut self, operation: &str, wait: Duration);
}

/// Observer that ignores backoff notices.
pub struct SilentBackoff;

#[async_trait]
impl BackoffObserver for SilentBackoff {
    async fn on_backoff(&mut self, _operation: &str, _wait: Duration) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub default_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_wait: DEFAULT_RATE_LIMIT_WAIT,
        }
    }
}

impl RetryPolicy {
    pub fn new(default_wait: Duration) -> Self {
        Self { default_wait }
    }

    /// Wait applied for a rate-limit response; absent advice uses the default.
    pub fn backoff_for(&self, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or(self.default_wait)
    }

    /// Runs `call`, retrying it at most once after a rate-limit backoff.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        observer: &mut dyn BackoffObserver,
        mut call: F,
    ) -> CallOutcome<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, PlatformError>> + Send,
        T: Send,
    {
        match call().await {
            Ok(value) => CallOutcome::Success(value),
            Err(PlatformError::Forbidden { detail }) => CallOutcome::DmClosed { detail },
            Err(PlatformError::RateLimited { retry_after }) => {
                let wait = self.backoff_for(retry_after);
                observer.on_backoff(operation, wait).await;
                tokio::time::sleep(wait).await;
                match call().await {
                    Ok(value) => CallOutcome::SuccessAfterRetry(value),
                    Err(PlatformError::RateLimited { .. }) => CallOutcome::Failed {
                        reason: "rate limited again after retry".to_string(),
                    },
                    Err(error) => CallOutcome::Failed {
                        reason: format!("{} after retry", error.reason_code()),
                    },
                }
            }
            Err(error) => CallOutcome::Failed {
                reason: error.reason_code(),
            },
        }
    }
}
