use std::sync::Arc;
use std::time::Duration;

use exponential_backoff::Backoff;
use rand::Rng;
use rpc_core::{Payload, RpcCall, RpcContext, RpcError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::factory::ConnectionFactory;

/// A live wire-level endpoint managed by a [`TtlConnection`]: something
/// that can execute a call, report whether it is still usable without a
/// round trip, and be closed idempotently.
#[async_trait::async_trait]
pub trait PooledConnection: Send + Sync + 'static {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError>;

    /// Best-effort, synchronous liveness check. Returning `true` here is
    /// always safe; it only affects how eagerly [`TtlConnection::is_open`]
    /// treats the wire as dead without waiting for a failed call.
    fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&mut self);
}

/// Maximum refresh attempts per TTL expiry, per the framework's documented
/// backoff policy.
const MAX_REFRESH_ATTEMPTS: u32 = 10;
const REFRESH_INITIAL_DELAY: Duration = Duration::from_millis(100);
const REFRESH_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TtlConnectionConfig {
    /// `None` (or a non-positive duration at the config boundary) disables
    /// expiry entirely: the connection is only replaced when a call on it
    /// fails fatally.
    #[serde(default, with = "humantime_serde::option")]
    pub ttl: Option<Duration>,
    /// Symmetric jitter fraction applied to `ttl`, e.g. `0.1` for +-10%.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for TtlConnectionConfig {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(300)),
            jitter: 0.1,
        }
    }
}

struct State<C> {
    conn: C,
    closed: bool,
    expires_at: Option<Instant>,
}

/// One wire-level client plus a lifetime timer and self-refresh loop.
///
/// The connection proactively replaces itself shortly before `ttl`
/// elapses, without ever dropping a call that is already in flight: the
/// new connection is dialed off to the side, and only swapped into `state`
/// (closing the old wire afterward) once it is ready.
pub struct TtlConnection<F: ConnectionFactory> {
    state: Arc<Mutex<State<F::Connection>>>,
    factory: Arc<F>,
    config: TtlConnectionConfig,
    client_label: String,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl<F: ConnectionFactory> TtlConnection<F> {
    pub async fn open(
        factory: Arc<F>,
        config: TtlConnectionConfig,
        client_label: impl Into<String>,
    ) -> Result<Arc<Self>, RpcError> {
        let client_label = client_label.into();
        let conn = factory.connect().await?;
        let expires_at = config.ttl.map(|ttl| Instant::now() + jittered(ttl, config.jitter));

        let this = Arc::new(Self {
            state: Arc::new(Mutex::new(State {
                conn,
                closed: false,
                expires_at,
            })),
            factory,
            config,
            client_label,
            refresh_task: Mutex::new(None),
        });

        if let Some(expires_at) = expires_at {
            this.clone().spawn_refresh_task(expires_at);
        }

        Ok(this)
    }

    pub async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(RpcError::Network(
                format!("connection {} is closed", self.client_label).into(),
            ));
        }
        state.conn.call(ctx, call).await
    }

    /// False if the wire is closed or its expiration has passed. In the
    /// latter case the wire is closed as a side effect, so a subsequent
    /// `call` observes a closed connection rather than a stale one.
    pub async fn is_open(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.closed {
            return false;
        }
        if matches!(state.expires_at, Some(at) if Instant::now() >= at) {
            state.conn.close().await;
            state.closed = true;
            return false;
        }
        state.conn.is_healthy()
    }

    /// Idempotent: marks the connection closed, cancels any in-flight
    /// refresh, and closes the wire.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        state.conn.close().await;
        drop(state);

        if let Some(handle) = self.refresh_task.lock().await.take() {
            handle.abort();
        }
    }

    fn spawn_refresh_task(self: Arc<Self>, expires_at: Instant) {
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            self.refresh().await;
        });
        // Best-effort bookkeeping: if a previous refresh task is still
        // registered (should not happen under normal operation) let it be
        // dropped rather than aborted, since a refresh already installed a
        // fresh timer for its own successor.
        if let Ok(mut slot) = self.refresh_task.try_lock() {
            *slot = Some(handle);
        }
    }

    async fn refresh(self: Arc<Self>) {
        let backoff = Backoff::new(MAX_REFRESH_ATTEMPTS, REFRESH_INITIAL_DELAY, Some(REFRESH_MAX_DELAY));
        let mut attempts: u32 = 0;
        let mut last_err: Option<RpcError> = None;

        let new_conn = loop {
            attempts += 1;
            match self.factory.connect().await {
                Ok(conn) => break Some(conn),
                Err(err) => {
                    let retryable = err.is_network_error() || err.is_retryable_by_default();
                    last_err = Some(err);
                    if !retryable || attempts >= MAX_REFRESH_ATTEMPTS {
                        break None;
                    }
                    match backoff.next(attempts) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => break None,
                    }
                }
            }
        };

        metrics::histogram!("ttlclient_refresh_attempts", "client" => self.client_label.clone())
            .record(attempts as f64);

        let Some(new_conn) = new_conn else {
            tracing::warn!(client = %self.client_label, attempts, error = ?last_err, "ttl connection refresh failed terminally");
            metrics::counter!("ttlclient_replace_total", "client" => self.client_label.clone(), "success" => "false")
                .increment(1);
            // Leave the connection as-is: the next call observes it as
            // closed via a network error once its TTL is re-checked, and
            // the pool replaces it like any other dead connection.
            return;
        };

        let mut new_conn = new_conn;
        let mut state = self.state.lock().await;
        if state.closed {
            // Closed while we were dialing: drop the freshly opened wire
            // instead of installing it.
            new_conn.close().await;
            return;
        }

        let next_expiry = self
            .config
            .ttl
            .map(|ttl| Instant::now() + jittered(ttl, self.config.jitter));

        let mut old_conn = std::mem::replace(&mut state.conn, new_conn);
        state.expires_at = next_expiry;
        drop(state);

        old_conn.close().await;

        metrics::counter!("ttlclient_replace_total", "client" => self.client_label.clone(), "success" => "true")
            .increment(1);

        if let Some(next_expiry) = next_expiry {
            self.spawn_refresh_task(next_expiry);
        }
    }
}

/// Apply a symmetric jitter fraction to `ttl`: the result lies in
/// `[ttl * (1 - jitter), ttl * (1 + jitter)]`.
fn jittered(ttl: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return ttl;
    }
    let offset = rand::thread_rng().gen_range(-jitter..=jitter);
    ttl.mul_f64((1.0 + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fake {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl PooledConnection for Fake {
        async fn call(&self, _ctx: &mut RpcContext, _call: RpcCall) -> Result<Payload, RpcError> {
            Ok(Payload::new())
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn factory(closed: Arc<AtomicUsize>) -> impl ConnectionFactory<Connection = Fake> {
        move || {
            let closed = closed.clone();
            async move { Ok(Fake { closed }) }
        }
    }

    #[tokio::test]
    async fn ttl_expiry_closes_connection_lazily() {
        let closed = Arc::new(AtomicUsize::new(0));
        let config = TtlConnectionConfig {
            ttl: Some(Duration::from_millis(1)),
            jitter: 0.0,
        };
        let conn = TtlConnection::open(Arc::new(factory(closed.clone())), config, "test").await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        // The background refresh races with this check; either the
        // connection was already refreshed (closed.load() >= 1) or
        // is_open observes expiry itself and closes it.
        let open = conn.is_open().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!open || closed.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn disabled_ttl_stays_open() {
        let closed = Arc::new(AtomicUsize::new(0));
        let config = TtlConnectionConfig { ttl: None, jitter: 0.0 };
        let conn = TtlConnection::open(Arc::new(factory(closed)), config, "test").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(conn.is_open().await);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let closed = Arc::new(AtomicUsize::new(0));
        let config = TtlConnectionConfig::default();
        let conn = TtlConnection::open(Arc::new(factory(closed.clone())), config, "test").await.unwrap();

        conn.close().await;
        conn.close().await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!conn.is_open().await);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let ttl = Duration::from_secs(10);
        for _ in 0..200 {
            let j = jittered(ttl, 0.1);
            assert!(j >= ttl.mul_f64(0.9));
            assert!(j <= ttl.mul_f64(1.1));
        }
    }
}
