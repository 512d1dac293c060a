use std::sync::Arc;

use rpc_core::{Caller, Payload, PoolErrorKind, RpcCall, RpcContext, RpcError};
use rpc_errors::Suppressor;
use rpc_pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolError, PoolState};

use crate::chain::{self, ClientMiddleware};
use crate::middleware::{
    BaseplateErrorWrapper, FailureRatioBreaker, FailureRatioBreakerConfig, ForwardEdgeRequestContext, MonitorClient,
    PrometheusClientMiddleware, Retry, RetryConfig, SetDeadlineBudget,
};

/// Presents a single `Caller` surface on top of a [`ConnectionPool`]: get a
/// connection, run one call on it, decide whether the connection survives
/// based on the error, and always release it back. This is the innermost
/// link the configured middleware chain wraps (§4.4).
struct PooledCall<F: ConnectionFactory> {
    pool: Arc<ConnectionPool<F>>,
}

#[async_trait::async_trait]
impl<F: ConnectionFactory> Caller for PooledCall<F> {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        let conn = self.pool.get().await.map_err(pool_error_to_rpc_error)?;
        let result = conn.call(ctx, call).await;
        if matches!(&result, Err(e) if e.is_fatal_for_connection()) {
            conn.close().await;
        }
        self.pool.release(conn).await;
        result
    }
}

fn pool_error_to_rpc_error(err: PoolError) -> RpcError {
    let kind = match &err {
        PoolError::Exhausted => PoolErrorKind::Exhausted,
        PoolError::Closed => PoolErrorKind::Closed,
        PoolError::Configuration(_) => PoolErrorKind::Configuration,
        PoolError::InitialConnect(_) | PoolError::Connect(_) => PoolErrorKind::Connect,
    };
    RpcError::Pool {
        kind,
        source: Box::new(err),
    }
}

/// A [`ConnectionPool`] plus an ordered client middleware chain, exposing a
/// single `Caller` surface to application code (§4.4).
pub struct ClientPool<F: ConnectionFactory> {
    pool: Arc<ConnectionPool<F>>,
    caller: Arc<dyn Caller>,
}

impl<F: ConnectionFactory> ClientPool<F> {
    /// Build a pool wrapped by an explicit, already-ordered middleware
    /// list. `middlewares[0]` is outermost.
    pub async fn new(
        factory: Arc<F>,
        pool_config: PoolConfig,
        middlewares: Vec<Arc<dyn ClientMiddleware>>,
    ) -> Result<Self, PoolError> {
        let pool = ConnectionPool::new(factory, pool_config).await?;
        let innermost: Arc<dyn Caller> = Arc::new(PooledCall { pool: pool.clone() });
        let caller = chain::compose(&middlewares, innermost);
        Ok(Self { pool, caller })
    }

    /// Assemble the §4.6 default chain in its documented order:
    /// `ForwardEdgeRequestContext`, an outer `MonitorClient` spanning all
    /// retry attempts, `Retry`, an optional `FailureRatioBreaker`, an inner
    /// `MonitorClient` for a single attempt, `BaseplateErrorWrapper`,
    /// `SetDeadlineBudget`, `PrometheusClientMiddleware` — so callers get
    /// the framework's documented behavior without hand-assembling it.
    pub async fn with_defaults(
        factory: Arc<F>,
        pool_config: PoolConfig,
        options: ClientDefaultsOptions,
    ) -> Result<Self, PoolError> {
        let slug = pool_config.slug.clone();
        let mut middlewares: Vec<Arc<dyn ClientMiddleware>> = vec![
            Arc::new(ForwardEdgeRequestContext),
            Arc::new(MonitorClient::new(format!("{slug}-with-retry")).with_suppressor(options.suppressor.clone())),
            Arc::new(Retry::new(options.retry)),
        ];

        if let Some(breaker_config) = options.breaker {
            middlewares.push(FailureRatioBreaker::new(slug.clone(), breaker_config));
        }

        middlewares.push(Arc::new(MonitorClient::new(slug.clone()).with_suppressor(options.suppressor)));
        middlewares.push(Arc::new(BaseplateErrorWrapper::new(options.client_name.clone())));
        middlewares.push(Arc::new(SetDeadlineBudget));
        middlewares.push(Arc::new(PrometheusClientMiddleware::new(slug, options.client_name)));

        Self::new(factory, pool_config, middlewares).await
    }

    pub fn caller(&self) -> Arc<dyn Caller> {
        self.caller.clone()
    }

    pub async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        self.caller.call(ctx, call).await
    }

    pub fn state(&self) -> PoolState {
        self.pool.state()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Options for [`ClientPool::with_defaults`]. `breaker` is `None` by
/// default since the breaker is documented as optional (§4.6 step 4).
pub struct ClientDefaultsOptions {
    pub client_name: String,
    pub retry: RetryConfig,
    pub breaker: Option<FailureRatioBreakerConfig>,
    pub suppressor: Suppressor,
}

impl ClientDefaultsOptions {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            retry: RetryConfig::default(),
            breaker: None,
            suppressor: Suppressor::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(mut self, breaker: FailureRatioBreakerConfig) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_suppressor(mut self, suppressor: Suppressor) -> Self {
        self.suppressor = suppressor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_pool::{PooledConnection, TtlConnectionConfig};

    struct Fake;

    #[async_trait::async_trait]
    impl PooledConnection for Fake {
        async fn call(&self, _ctx: &mut RpcContext, _call: RpcCall) -> Result<Payload, RpcError> {
            Ok(Payload::from_static(b"ok"))
        }

        async fn close(&mut self) {}
    }

    fn factory() -> impl ConnectionFactory<Connection = Fake> {
        || async { Ok(Fake) }
    }

    fn pool_config(slug: &str) -> PoolConfig {
        PoolConfig {
            slug: slug.to_string(),
            required_initial: 0,
            initial: 0,
            min: 0,
            max: 2,
            background_task_interval: None,
            connection: TtlConnectionConfig { ttl: None, jitter: 0.0 },
        }
    }

    #[tokio::test]
    async fn pooled_call_roundtrips() {
        let client = ClientPool::new(Arc::new(factory()), pool_config("t1"), Vec::new()).await.unwrap();
        let mut ctx = RpcContext::new();
        let out = client.call(&mut ctx, RpcCall::new("M", Payload::new())).await.unwrap();
        assert_eq!(out, Payload::from_static(b"ok"));
    }

    #[tokio::test]
    async fn exhausted_pool_surfaces_as_rpc_error_pool_variant() {
        let pool = ConnectionPool::new(Arc::new(factory()), {
            let mut cfg = pool_config("t2");
            cfg.max = 1;
            cfg
        })
        .await
        .unwrap();
        let held = pool.get().await.unwrap();
        let err = pool.get().await.unwrap_err();
        let rpc_err = pool_error_to_rpc_error(err);
        assert!(rpc_err.is_pool_exhausted());
        pool.release(held).await;
    }

    #[tokio::test]
    async fn with_defaults_builds_a_working_chain() {
        let client = ClientPool::with_defaults(
            Arc::new(factory()),
            pool_config("t3"),
            ClientDefaultsOptions::new("my-client"),
        )
        .await
        .unwrap();

        let mut ctx = RpcContext::new();
        let out = client.call(&mut ctx, RpcCall::new("M", Payload::new())).await.unwrap();
        assert_eq!(out, Payload::from_static(b"ok"));
    }
}
