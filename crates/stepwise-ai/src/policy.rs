//! The policy capability and its retrying wrapper

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{Message, PolicyRequest, Result};

/// A decision-making capability backed by a language model.
///
/// One call, one AI message back. Whether the message carries tool calls or
/// only text is how callers tell a "tool call" response from a plain one.
#[async_trait]
pub trait Policy: Send + Sync {
    async fn invoke(&self, request: PolicyRequest) -> Result<Message>;
}

/// Shared handle to a policy
pub type SharedPolicy = Arc<dyn Policy>;

#[async_trait]
impl<P: Policy + ?Sized> Policy for Arc<P> {
    async fn invoke(&self, request: PolicyRequest) -> Result<Message> {
        (**self).invoke(request).await
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// String fallback for errors whose variant lost the original classification
fn is_retryable_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        return true;
    }
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection") {
        return true;
    }
    if ["500", "502", "503", "504"].iter().any(|code| lower.contains(code)) {
        return true;
    }
    lower.contains("overloaded")
}

/// Wraps a policy with exponential-backoff retries on transient failures.
///
/// This is the only retry layer; the agent engine itself never retries.
pub struct RetryingPolicy<P> {
    inner: P,
    config: RetryConfig,
}

impl<P: Policy> RetryingPolicy<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            config: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl<P: Policy> Policy for RetryingPolicy<P> {
    async fn invoke(&self, request: PolicyRequest) -> Result<Message> {
        let mut attempt = 0u32;
        loop {
            match self.inner.invoke(request.clone()).await {
                Ok(message) => return Ok(message),
                Err(e) => {
                    let error_msg = e.to_string();
                    let retryable = e.is_retryable() || is_retryable_error(&error_msg);
                    if attempt < self.config.max_retries && retryable {
                        let delay = self.config.delay_for_attempt(attempt);
                        tracing::warn!(
                            "Policy call failed (attempt {}/{}): {}. Retrying in {:?}...",
                            attempt + 1,
                            self.config.max_retries + 1,
                            error_msg,
                            delay
                        );
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}
