//! Retry around whole conversations
//!
//! Every attempt runs a fresh machine. Only connectivity-class failures
//! are retried; a registry rejection would only be rejected again.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: Duration::from_secs(config.retry_delay_secs),
        }
    }
}

impl RetryPolicy {
    /// Policy that runs every operation exactly once
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Run `attempt` until it succeeds, fails for good or retries run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        operation, e, retries, self.max_retries, self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
