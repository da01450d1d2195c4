use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use weft_core::config::RetryConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::{AgentInvoker, FunctionExecutor, ToolInvoker};
use weft_core::types::{AgentRequest, AgentResponse, FunctionResponse, ToolInstance};

/// Wraps a collaborator and retries transient failures with backoff.
pub struct Retrying<C> {
    inner: C,
    config: RetryConfig,
}

impl<C> Retrying<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

pub(crate) fn is_retryable(e: &WeftError) -> bool {
    match e {
        WeftError::Http(msg) | WeftError::AgentInvocation(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_retries = config.max_retries;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && attempt < max_retries => {
                let backoff = calculate_backoff(attempt, config);
                warn!(
                    attempt = attempt + 1,
                    max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying {} request",
                    what
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

impl<C: AgentInvoker> AgentInvoker for Retrying<C> {
    fn invoke(&self, request: AgentRequest) -> BoxFuture<'_, Result<AgentResponse>> {
        Box::pin(async move {
            with_retry(&self.config, "agent", || {
                AgentInvoker::invoke(&self.inner, request.clone())
            })
            .await
        })
    }
}

impl<C: FunctionExecutor> FunctionExecutor for Retrying<C> {
    fn execute(
        &self,
        config: serde_json::Value,
        input: String,
    ) -> BoxFuture<'_, Result<FunctionResponse>> {
        Box::pin(async move {
            with_retry(&self.config, "function", || {
                self.inner.execute(config.clone(), input.clone())
            })
            .await
        })
    }
}

impl<C: ToolInvoker> ToolInvoker for Retrying<C> {
    fn invoke(&self, tool: ToolInstance, input: String) -> BoxFuture<'_, Result<FunctionResponse>> {
        Box::pin(async move {
            with_retry(&self.config, "tool", || {
                ToolInvoker::invoke(&self.inner, tool.clone(), input.clone())
            })
            .await
        })
    }
}
