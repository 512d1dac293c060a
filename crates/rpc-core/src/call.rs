use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::edge_context::EdgeContext;
use crate::error::RpcError;
use crate::headers::RpcHeaders;
use crate::span::Span;

/// Request/response bodies, already encoded by the (out-of-scope) wire
/// codec. This crate never looks inside them.
pub type Payload = Bytes;

/// A single RPC: method name, opaque args, and the context it runs under.
/// `result` is filled in by whatever implements [`Caller`].
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub method: String,
    pub args: Payload,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, args: Payload) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

/// Everything that rides alongside a call: headers (with their
/// write-forward list), an optional deadline, cancellation, the current
/// span, and an optional edge context.
///
/// A server-side context derived from an inbound request, and a
/// client-side context derived from it for an outbound call, are both
/// `RpcContext` — [`RpcContext::child`] is how one becomes the other.
#[derive(Clone, Debug, Default)]
pub struct RpcContext {
    headers: RpcHeaders,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
    span: Option<Span>,
    edge_context: Option<EdgeContext>,
    retry_attempts: Option<u32>,
}

impl RpcContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> &RpcHeaders {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut RpcHeaders {
        &mut self.headers
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// In-place counterpart to [`RpcContext::with_deadline`], for
    /// middleware that only has `&mut self` (e.g. extracting a deadline
    /// from an inbound header after the context already exists).
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Time remaining until the deadline, or `None` if there is no
    /// deadline. A deadline already in the past yields `Some(Duration::ZERO)`.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Per-call override for the client retry middleware's attempt count.
    /// `None` means "use the middleware's configured default" (which is 1
    /// attempt, i.e. no retries, unless the pool was built with explicit
    /// retry options).
    pub fn retry_attempts(&self) -> Option<u32> {
        self.retry_attempts
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    pub fn set_span(&mut self, span: Span) {
        self.span = Some(span);
    }

    pub fn edge_context(&self) -> Option<&EdgeContext> {
        self.edge_context.as_ref()
    }

    pub fn set_edge_context(&mut self, edge_context: EdgeContext) {
        self.edge_context = Some(edge_context);
    }

    /// Derive the context for an outbound call made from within this one:
    /// only the write-forward headers survive, the deadline and span/edge
    /// context are carried over unchanged, and cancellation is linked to
    /// the parent (canceling the parent cancels the child; the reverse is
    /// not true).
    pub fn child(&self) -> Self {
        Self {
            headers: self.headers.to_forward(),
            deadline: self.deadline,
            cancellation: self.cancellation.child_token(),
            span: self.span.clone(),
            edge_context: self.edge_context.clone(),
            retry_attempts: self.retry_attempts,
        }
    }
}

/// The call surface every middleware layer and the pool's "pooled call"
/// ultimately wrap: something that can execute one RPC and return its
/// result or a typed error.
#[async_trait::async_trait]
pub trait Caller: Send + Sync {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError>;
}

/// Blanket impl so a plain async closure can stand in for a [`Caller`] in
/// tests and small examples.
#[async_trait::async_trait]
impl<F, Fut> Caller for F
where
    F: Fn(&mut RpcContext, RpcCall) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Payload, RpcError>> + Send,
{
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        (self)(ctx, call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::header;

    #[test]
    fn child_carries_only_forwarded_headers() {
        let mut ctx = RpcContext::new();
        ctx.headers_mut().set(header::TRACE, "1");
        ctx.headers_mut().set(header::USER_AGENT, "svc");
        ctx.headers_mut().mark_forward(header::TRACE);

        let child = ctx.child();
        assert_eq!(child.headers().get(header::TRACE), Some("1"));
        assert_eq!(child.headers().get(header::USER_AGENT), None);
    }

    #[test]
    fn child_cancellation_follows_parent() {
        let ctx = RpcContext::new();
        let child = ctx.child();
        ctx.cancel();
        assert!(child.is_canceled());
    }

    #[tokio::test]
    async fn closure_satisfies_caller() {
        let caller: &dyn Caller = &|_ctx: &mut RpcContext, call: RpcCall| async move {
            Ok(Bytes::from(format!("ok:{}", call.method)))
        };
        let mut ctx = RpcContext::new();
        let result = caller.call(&mut ctx, RpcCall::new("Echo", Bytes::new())).await.unwrap();
        assert_eq!(result, Bytes::from_static(b"ok:Echo"));
    }
}
