use std::sync::Arc;
use std::time::Duration;

use rpc_core::{header, Caller, Payload, RpcCall, RpcContext, RpcError};
use tokio::time::Instant;

use crate::chain::ServerMiddleware;

/// If the inbound `Deadline-Budget` header is present and parses to a
/// whole number of milliseconds >= 1, attaches a deadline to the context
/// (§4.5 step 1). A missing or malformed header leaves the context
/// deadline-free.
pub struct ExtractDeadlineBudget;

struct Wrapped {
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        if let Some(ms) = ctx.headers().get(header::DEADLINE_BUDGET).and_then(|v| v.parse::<u64>().ok()) {
            if ms >= 1 {
                ctx.set_deadline(Instant::now() + Duration::from_millis(ms));
            }
        }
        self.next.call(ctx, call).await
    }
}

impl ServerMiddleware for ExtractDeadlineBudget {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped { next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Capture;

    #[async_trait::async_trait]
    impl Caller for Capture {
        async fn call(&self, ctx: &mut RpcContext, _call: RpcCall) -> Result<Payload, RpcError> {
            Ok(Payload::from(ctx.time_remaining().is_some().to_string()))
        }
    }

    #[tokio::test]
    async fn attaches_deadline_from_valid_header() {
        let chain = ExtractDeadlineBudget.wrap(Arc::new(Capture));
        let mut ctx = RpcContext::new();
        ctx.headers_mut().set(header::DEADLINE_BUDGET, "50");
        let out = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await.unwrap();
        assert_eq!(out, Payload::from_static(b"true"));
    }

    #[tokio::test]
    async fn malformed_header_leaves_context_deadline_free() {
        let chain = ExtractDeadlineBudget.wrap(Arc::new(Capture));
        let mut ctx = RpcContext::new();
        ctx.headers_mut().set(header::DEADLINE_BUDGET, "not-a-number");
        let out = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await.unwrap();
        assert_eq!(out, Payload::from_static(b"false"));
    }

    #[tokio::test]
    async fn zero_budget_is_ignored() {
        let chain = ExtractDeadlineBudget.wrap(Arc::new(Capture));
        let mut ctx = RpcContext::new();
        ctx.headers_mut().set(header::DEADLINE_BUDGET, "0");
        let out = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await.unwrap();
        assert_eq!(out, Payload::from_static(b"false"));
    }
}
