use rpc_core::RpcError;

/// Opens new wire-level connections. Implementations typically dial a
/// socket and perform whatever handshake the transport requires; the
/// factory itself is cheap to clone/share (it is held behind an `Arc` by
/// both [`crate::TtlConnection`] and [`crate::ConnectionPool`]).
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Connection: Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Connection, RpcError>;
}

/// Blanket impl so a plain async closure can serve as a factory in tests
/// and small examples, mirroring the reference framework's factory-closure
/// convention.
#[async_trait::async_trait]
impl<F, Fut, C> ConnectionFactory for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<C, RpcError>> + Send,
    C: Send + Sync + 'static,
{
    type Connection = C;

    async fn connect(&self) -> Result<C, RpcError> {
        (self)().await
    }
}
