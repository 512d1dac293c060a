use std::sync::Arc;

use rpc_core::{header, Caller, Payload, RpcCall, RpcContext, RpcError, Span};
use rpc_errors::Suppressor;
use tracing::Instrument;
use uuid::Uuid;

use crate::chain::ServerMiddleware;

/// Starts a span named after the method. The inbound trace/span/parent/
/// flags/sampled headers, when present, describe the *parent* span; this
/// middleware derives a fresh child span id from them rather than reusing
/// the inbound span id as its own (§4.5 step 2). A request that arrives
/// without trace headers gets a fresh root span rather than no span at
/// all, so every request is traceable regardless of caller.
pub struct InjectServerSpan {
    suppressor: Suppressor,
}

impl InjectServerSpan {
    pub fn new(suppressor: Suppressor) -> Self {
        Self { suppressor }
    }
}

impl Default for InjectServerSpan {
    fn default() -> Self {
        Self::new(Suppressor::none())
    }
}

struct Wrapped {
    suppressor: Suppressor,
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        let span = Span::from_headers(ctx.headers())
            .map(|parent| parent.child(new_id()))
            .unwrap_or_else(|| Span::root(new_id(), new_id()));
        ctx.set_span(span.clone());

        let peer_service = ctx.headers().get(header::USER_AGENT).map(str::to_string);

        let tracing_span = tracing::info_span!(
            "rpc.server.call",
            method = %call.method,
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            sampled = span.sampled,
            peer_service = peer_service.as_deref().unwrap_or(""),
            error = tracing::field::Empty,
        );

        async move {
            let result = self.next.call(ctx, call).await;
            if let Err(err) = &result {
                if !self.suppressor.should_suppress(err) {
                    tracing::Span::current().record("error", true);
                    tracing::warn!(error = %err, "rpc server call failed");
                }
            }
            result
        }
        .instrument(tracing_span)
        .await
    }
}

impl ServerMiddleware for InjectServerSpan {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped {
            suppressor: self.suppressor.clone(),
            next,
        })
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}
