use std::sync::Arc;
use std::time::Duration;

use exponential_backoff::Backoff;
use rpc_core::{Caller, Payload, RpcCall, RpcContext, RpcError};

use crate::chain::ClientMiddleware;

/// Retry options. `max_attempts = 1` (the default) means the middleware is
/// present in the chain but performs no retries — per-call retry can
/// still be activated via [`RpcContext::with_retry_attempts`].
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(250),
        }
    }
}

/// Drives a retry loop around the rest of the chain. The default filter is
/// `RpcError::is_retryable_by_default`, which already excludes context
/// errors (canceled/deadline-exceeded are never retried per §7).
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

struct Wrapped {
    config: RetryConfig,
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        let max_attempts = ctx.retry_attempts().unwrap_or(self.config.max_attempts).max(1);
        let backoff = Backoff::new(max_attempts, self.config.initial_backoff, Some(self.config.max_backoff));

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = self.next.call(ctx, call.clone()).await;
            match &result {
                Ok(_) => return result,
                Err(err) if attempt < max_attempts && err.is_retryable_by_default() => {
                    if let Some(delay) = backoff.next(attempt) {
                        tokio::time::sleep(delay).await;
                    }
                    tracing::debug!(method = %call.method, attempt, "retrying rpc call");
                    continue;
                }
                Err(_) => return result,
            }
        }
    }
}

impl ClientMiddleware for Retry {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped {
            config: self.config.clone(),
            next,
        })
    }
}
