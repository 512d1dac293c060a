use std::sync::Arc;

use rpc_core::{Caller, Payload, RpcCall, RpcContext, RpcError};

use crate::chain::ServerMiddleware;

/// If the context is canceled by the time the handler returns, forces the
/// result to `Err(RpcError::Canceled)` regardless of what the handler
/// actually produced (§4.5 step 4). The connection-handling loop
/// recognizes this sentinel and abandons the request — closing the
/// connection instead of writing back a serialization of the cancel.
pub struct AbandonCanceledRequests;

struct Wrapped {
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        let result = self.next.call(ctx, call).await;
        if ctx.is_canceled() {
            return Err(RpcError::Canceled);
        }
        result
    }
}

impl ServerMiddleware for AbandonCanceledRequests {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped { next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait::async_trait]
    impl Caller for Slow {
        async fn call(&self, ctx: &mut RpcContext, _call: RpcCall) -> Result<Payload, RpcError> {
            ctx.cancel();
            Ok(Payload::from_static(b"too late"))
        }
    }

    struct Echo;

    #[async_trait::async_trait]
    impl Caller for Echo {
        async fn call(&self, _ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
            Ok(call.args)
        }
    }

    #[tokio::test]
    async fn canceled_context_overrides_success() {
        let chain = AbandonCanceledRequests.wrap(Arc::new(Slow));
        let mut ctx = RpcContext::new();
        let result = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await;
        assert!(matches!(result, Err(RpcError::Canceled)));
    }

    #[tokio::test]
    async fn uncanceled_context_passes_through() {
        let chain = AbandonCanceledRequests.wrap(Arc::new(Echo));
        let mut ctx = RpcContext::new();
        let result = chain.call(&mut ctx, RpcCall::new("M", Payload::from_static(b"ok"))).await;
        assert_eq!(result.unwrap(), Payload::from_static(b"ok"));
    }
}
