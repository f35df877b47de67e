/// Polling utilities for waiting on conditions at a fixed interval
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::convergence::WaitError;

/// Configuration for polling operations
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub interval: Duration,
    /// Overall bound; `None` polls until the condition resolves
    pub timeout: Option<Duration>,
    pub description: String,
}

impl PollingConfig {
    /// Create an unbounded polling configuration
    pub fn new(interval: Duration, description: impl Into<String>) -> Self {
        Self {
            interval,
            timeout: None,
            description: description.into(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Poll until condition is met, fails, times out, or is cancelled
    ///
    /// The condition function should return:
    /// - Ok(Some(T)) when condition is met (returns T)
    /// - Ok(None) when condition is not yet met (continues polling)
    /// - Err(e) when an error occurs (stops polling and returns error)
    pub async fn poll<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        condition: F,
    ) -> Result<T, WaitError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>, WaitError>>,
    {
        info!("{}...", self.description);

        let start = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled {
                    target: self.description.clone(),
                });
            }

            if let Some(value) = condition().await? {
                info!("✓ {}", self.description);
                return Ok(value);
            }

            if let Some(timeout) = self.timeout {
                if start.elapsed() + self.interval > timeout {
                    return Err(WaitError::DeadlineExceeded {
                        target: self.description.clone(),
                        timeout,
                    });
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(WaitError::Cancelled {
                        target: self.description.clone(),
                    });
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Poll until condition returns Ok(true)
    ///
    /// Simplified version for boolean conditions
    pub async fn poll_until<F, Fut>(
        &self,
        cancel: &CancellationToken,
        condition: F,
    ) -> Result<(), WaitError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<bool, WaitError>>,
    {
        self.poll(cancel, || async {
            match condition().await {
                Ok(true) => Ok(Some(())),
                Ok(false) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }
}
