use std::sync::Arc;

use rpc_core::{header, Caller, EdgeContext, Payload, RpcCall, RpcContext, RpcError};

use crate::chain::ServerMiddleware;

/// Decoder for the `Edge-Request` header's wire value into an
/// [`EdgeContext`]. Defaults to [`EdgeContext::from_header_value`]
/// (base64 of the opaque token); an embedder using a different encoding
/// supplies its own.
pub type EdgeContextDecoder = Arc<dyn Fn(&str) -> Result<EdgeContext, rpc_core::EdgeContextError> + Send + Sync>;

/// If the inbound `Edge-Request` header is present, decodes it and
/// attaches the result to the context (§4.5 step 3). A decode failure is
/// logged and the request proceeds without an edge context, rather than
/// failing the call outright.
pub struct InjectEdgeContext {
    decode: EdgeContextDecoder,
}

impl InjectEdgeContext {
    pub fn new(decode: EdgeContextDecoder) -> Self {
        Self { decode }
    }
}

impl Default for InjectEdgeContext {
    fn default() -> Self {
        Self::new(Arc::new(|value| EdgeContext::from_header_value(value)))
    }
}

struct Wrapped {
    decode: EdgeContextDecoder,
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        if let Some(raw) = ctx.headers().get(header::EDGE_REQUEST).map(str::to_string) {
            match (self.decode)(&raw) {
                Ok(ec) => ctx.set_edge_context(ec),
                Err(err) => tracing::warn!(error = %err, "failed to decode inbound edge-request header"),
            }
        }
        self.next.call(ctx, call).await
    }
}

impl ServerMiddleware for InjectEdgeContext {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped {
            decode: self.decode.clone(),
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Capture;

    #[async_trait::async_trait]
    impl Caller for Capture {
        async fn call(&self, ctx: &mut RpcContext, _call: RpcCall) -> Result<Payload, RpcError> {
            Ok(Payload::from(ctx.edge_context().is_some().to_string()))
        }
    }

    #[tokio::test]
    async fn decodes_present_header() {
        let chain = InjectEdgeContext::default().wrap(Arc::new(Capture));
        let mut ctx = RpcContext::new();
        let ec = EdgeContext::new(b"caller".to_vec()).unwrap();
        ctx.headers_mut().set(header::EDGE_REQUEST, ec.to_header_value());
        let out = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await.unwrap();
        assert_eq!(out, Payload::from_static(b"true"));
    }

    #[tokio::test]
    async fn absent_header_proceeds_without_edge_context() {
        let chain = InjectEdgeContext::default().wrap(Arc::new(Capture));
        let mut ctx = RpcContext::new();
        let out = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await.unwrap();
        assert_eq!(out, Payload::from_static(b"false"));
    }

    #[tokio::test]
    async fn malformed_header_is_logged_and_ignored() {
        let chain = InjectEdgeContext::default().wrap(Arc::new(Capture));
        let mut ctx = RpcContext::new();
        ctx.headers_mut().set(header::EDGE_REQUEST, "not-valid-base64!!");
        let out = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await.unwrap();
        assert_eq!(out, Payload::from_static(b"false"));
    }
}
