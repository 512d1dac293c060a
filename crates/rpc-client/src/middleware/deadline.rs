use std::sync::Arc;
use std::time::Duration;

use rpc_core::{header, Caller, Payload, RpcCall, RpcContext, RpcError};

use crate::chain::ClientMiddleware;

/// If the context carries a deadline, serializes the remaining time as the
/// `Deadline-Budget` header (decimal milliseconds, rounded up, minimum 1 —
/// preserved verbatim from the reference framework per §9). If the
/// deadline has already passed, short-circuits with
/// [`RpcError::DeadlineExceeded`] without invoking the wire.
pub struct SetDeadlineBudget;

struct Wrapped {
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        if let Some(remaining) = ctx.time_remaining() {
            if ctx.is_deadline_exceeded() {
                return Err(RpcError::DeadlineExceeded);
            }
            let ms = round_up_to_whole_ms(remaining);
            ctx.headers_mut().set(header::DEADLINE_BUDGET, ms.to_string());
            ctx.headers_mut().mark_forward(header::DEADLINE_BUDGET);
        }
        self.next.call(ctx, call).await
    }
}

/// Round `d` up to the next whole millisecond, minimum 1.
fn round_up_to_whole_ms(d: Duration) -> u64 {
    let whole_ms = d.as_millis() as u64;
    let has_remainder = d.subsec_nanos() % 1_000_000 != 0;
    (whole_ms + if has_remainder { 1 } else { 0 }).max(1)
}

impl ClientMiddleware for SetDeadlineBudget {
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
            Ok(Payload::from(ctx.headers().get(header::DEADLINE_BUDGET).unwrap_or("").to_string()))
        }
    }

    #[tokio::test]
    async fn sets_header_from_remaining_deadline() {
        let chain = SetDeadlineBudget.wrap(Arc::new(Capture));
        let mut ctx = RpcContext::new().with_timeout(Duration::from_millis(50));
        let out = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await.unwrap();
        let ms: u64 = String::from_utf8(out.to_vec()).unwrap().parse().unwrap();
        assert!((49..=51).contains(&ms));
    }

    #[tokio::test]
    async fn passed_deadline_short_circuits() {
        let chain = SetDeadlineBudget.wrap(Arc::new(Capture));
        let mut ctx = RpcContext::new().with_timeout(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(2)).await;
        let result = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await;
        assert!(matches!(result, Err(RpcError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn no_deadline_leaves_header_unset() {
        let chain = SetDeadlineBudget.wrap(Arc::new(Capture));
        let mut ctx = RpcContext::new();
        let out = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await.unwrap();
        assert_eq!(out, Payload::new());
    }
}
