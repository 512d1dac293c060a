use rpc_core::{Payload, RpcContext, RpcError};

/// One accepted connection's framing: decodes inbound requests and
/// encodes outbound responses. The actual wire codec (THeader + compact,
/// per §1) is out of scope here; an embedder implements this trait over
/// whatever socket/codec it actually speaks.
#[async_trait::async_trait]
pub trait RequestTransport: Send {
    /// Read the next framed request, or `None` at a clean EOF.
    async fn read_request(&mut self) -> std::io::Result<Option<(RpcContext, String, Payload)>>;

    /// Write a response back for the request most recently returned by
    /// `read_request`. Never called for an abandoned request (§4.5 step
    /// 4).
    async fn write_response(&mut self, result: Result<Payload, RpcError>) -> std::io::Result<()>;
}

/// Accepts connections and hands back a transport for each one. An
/// embedder typically wraps a `tokio::net::TcpListener`.
#[async_trait::async_trait]
pub trait Listener: Send + Sync {
    type Transport: RequestTransport + 'static;

    async fn accept(&self) -> std::io::Result<Self::Transport>;
}
