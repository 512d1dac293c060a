use std::sync::Arc;

use rpc_core::{header, Caller, Payload, RpcCall, RpcContext, RpcError};

use crate::chain::ClientMiddleware;

/// Serializes the context's [`EdgeContext`](rpc_core::EdgeContext), if any,
/// into the `Edge-Request` header and marks it for forwarding; clears the
/// header otherwise. Running this twice with the same edge context yields
/// the identical header value both times (§8 idempotency property).
pub struct ForwardEdgeRequestContext;

struct Wrapped {
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        match ctx.edge_context().cloned() {
            Some(ec) => {
                ctx.headers_mut().set(header::EDGE_REQUEST, ec.to_header_value());
                ctx.headers_mut().mark_forward(header::EDGE_REQUEST);
            }
            None => {
                ctx.headers_mut().remove(header::EDGE_REQUEST);
            }
        }
        self.next.call(ctx, call).await
    }
}

impl ClientMiddleware for ForwardEdgeRequestContext {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped { next })
    }
}
