use std::sync::Arc;

use rpc_core::{Caller, Payload, RpcCall, RpcContext, RpcError, Span};
use rpc_errors::Suppressor;
use tracing::Instrument;
use uuid::Uuid;

use crate::chain::ClientMiddleware;

/// Starts (or continues) a trace span around a call. Used twice in the
/// default chain (§4.6): once outside `Retry`/the breaker, labeling the
/// whole retry group, and once inside, labeling a single attempt.
///
/// The wire-level [`Span`] (trace/span/parent ids) is distinct from the
/// `tracing::Span` created here: the former rides the wire in headers, the
/// latter is this process's local instrumentation handle wrapping it.
pub struct MonitorClient {
    label: String,
    suppressor: Suppressor,
}

impl MonitorClient {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            suppressor: Suppressor::none(),
        }
    }

    pub fn with_suppressor(mut self, suppressor: Suppressor) -> Self {
        self.suppressor = suppressor;
        self
    }
}

struct Wrapped {
    label: String,
    suppressor: Suppressor,
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        let span = match ctx.span() {
            Some(parent) => parent.child(new_id()),
            None => Span::root(new_id(), new_id()),
        };
        ctx.set_span(span.clone());
        span.write_headers(ctx.headers_mut());

        let tracing_span = tracing::info_span!(
            "rpc.client.call",
            slug = %self.label,
            method = %call.method,
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            sampled = span.sampled,
            error = tracing::field::Empty,
        );

        async move {
            let result = self.next.call(ctx, call).await;
            if let Err(err) = &result {
                if !self.suppressor.should_suppress(err) {
                    tracing::Span::current().record("error", true);
                    tracing::warn!(error = %err, "rpc call failed");
                }
            }
            result
        }
        .instrument(tracing_span)
        .await
    }
}

impl ClientMiddleware for MonitorClient {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped {
            label: self.label.clone(),
            suppressor: self.suppressor.clone(),
            next,
        })
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait::async_trait]
    impl Caller for Echo {
        async fn call(&self, _ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
            Ok(call.args)
        }
    }

    #[tokio::test]
    async fn assigns_root_span_when_none_present() {
        let chain = MonitorClient::new("svc.Method").wrap(Arc::new(Echo));
        let mut ctx = RpcContext::new();
        chain.call(&mut ctx, RpcCall::new("Method", Payload::new())).await.unwrap();
        assert!(ctx.span().is_some());
    }

    #[tokio::test]
    async fn child_span_shares_trace_id() {
        let chain = MonitorClient::new("svc.Method").wrap(Arc::new(Echo));
        let mut ctx = RpcContext::new();
        ctx.set_span(Span::root("t1", "s1"));
        chain.call(&mut ctx, RpcCall::new("Method", Payload::new())).await.unwrap();
        assert_eq!(ctx.span().unwrap().trace_id, "t1");
        assert_eq!(ctx.span().unwrap().parent_id.as_deref(), Some("s1"));
    }
}
