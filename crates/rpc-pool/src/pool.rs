use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rpc_core::RpcError;
use rpc_errors::BatchError;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::factory::ConnectionFactory;
use crate::ttl_connection::{TtlConnection, TtlConnectionConfig};

/// Configuration for a [`ConnectionPool`]. Validated at construction:
/// `initial <= max`, `min <= max`, `required_initial <= initial`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PoolConfig {
    pub slug: String,
    /// Connections that must succeed synchronously or construction fails.
    #[serde(default)]
    pub required_initial: usize,
    /// Total connections opened eagerly at construction (`required_initial`
    /// of which must succeed; the rest are best-effort).
    #[serde(default)]
    pub initial: usize,
    /// Floor the background task tries to keep the pool topped up to.
    #[serde(default)]
    pub min: usize,
    /// Hard ceiling on live connections.
    pub max: usize,
    /// How often the background top-up task runs. `None`/zero disables it
    /// even if `min > 0`.
    #[serde(default, with = "humantime_serde::option")]
    pub background_task_interval: Option<Duration>,
    #[serde(default)]
    pub connection: TtlConnectionConfig,
}

impl PoolConfig {
    fn validate(&self) -> Result<(), PoolError> {
        if self.initial > self.max {
            return Err(PoolError::Configuration(format!(
                "initial ({}) exceeds max ({})",
                self.initial, self.max
            )));
        }
        if self.min > self.max {
            return Err(PoolError::Configuration(format!(
                "min ({}) exceeds max ({})",
                self.min, self.max
            )));
        }
        if self.required_initial > self.initial {
            return Err(PoolError::Configuration(format!(
                "required_initial ({}) exceeds initial ({})",
                self.required_initial, self.initial
            )));
        }
        if self.slug.is_empty() {
            return Err(PoolError::Configuration("pool slug must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool configuration error: {0}")]
    Configuration(String),
    #[error("connection pool is exhausted")]
    Exhausted,
    #[error("connection pool is closed")]
    Closed,
    #[error("failed to open required initial connections")]
    InitialConnect(#[source] rpc_errors::BoxError),
    #[error("failed to open a new connection")]
    Connect(#[source] rpc_errors::BoxError),
}

impl PoolError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::Exhausted)
    }
}

/// A snapshot of pool occupancy, mirroring the `bb8::State` introspection
/// idiom for operational dashboards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolState {
    pub connections: usize,
    pub idle_connections: usize,
}

struct Inner<F: ConnectionFactory> {
    factory: Arc<F>,
    config: PoolConfig,
    idle_tx: mpsc::Sender<Arc<TtlConnection<F>>>,
    idle_rx: Mutex<mpsc::Receiver<Arc<TtlConnection<F>>>>,
    allocated: AtomicUsize,
    closed: std::sync::atomic::AtomicBool,
}

/// A bounded, channel-backed pool of [`TtlConnection`]s. `get`/`release`
/// are non-blocking with respect to the channel itself; `get` may still
/// suspend on the factory when allocating a brand new connection under
/// the `max` cap.
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<Inner<F>>,
    background_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Open `required_initial` connections synchronously (failing
    /// construction if any fails), then `initial - required_initial` more
    /// best-effort, logging each failure. Starts the background top-up
    /// task if `min > 0` and `background_task_interval` is set.
    pub async fn new(factory: Arc<F>, config: PoolConfig) -> Result<Arc<Self>, PoolError> {
        config.validate()?;

        let (idle_tx, idle_rx) = mpsc::channel(config.max.max(1));
        let inner = Arc::new(Inner {
            factory,
            config: config.clone(),
            idle_tx,
            idle_rx: Mutex::new(idle_rx),
            allocated: AtomicUsize::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        });

        let mut required_batch = BatchError::with_tag("failed to open required initial connections");
        for _ in 0..config.required_initial {
            match inner.open_one().await {
                Ok(conn) => inner.enqueue(conn).await,
                Err(err) => required_batch.add(Some(Box::new(err) as rpc_errors::BoxError)),
            }
        }
        if let Some(err) = required_batch.compile() {
            return Err(PoolError::InitialConnect(err));
        }

        for _ in config.required_initial..config.initial {
            match inner.open_one().await {
                Ok(conn) => inner.enqueue(conn).await,
                Err(err) => {
                    tracing::warn!(pool = %inner.config.slug, error = %err, "best-effort initial connection failed");
                }
            }
        }

        let this = Arc::new(Self {
            inner,
            background_task: Mutex::new(None),
        });

        if config.min > 0 {
            if let Some(interval) = config.background_task_interval {
                if interval > Duration::ZERO {
                    this.clone().spawn_background_task(interval);
                }
            }
        }

        Ok(this)
    }

    /// Non-blocking dequeue; allocates a fresh connection via the factory
    /// if the idle channel is empty and the pool has not reached `max`.
    /// Returns [`PoolError::Exhausted`] if `allocated == max`. The
    /// empty-check and the allocation itself are atomic with respect to
    /// `allocated` (via [`Inner::open_one`]'s compare-and-swap reservation),
    /// so concurrent `get`s racing the same free slot never both allocate.
    pub async fn get(&self) -> Result<Arc<TtlConnection<F>>, PoolError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let mut rx = self.inner.idle_rx.lock().await;
        match rx.try_recv() {
            Ok(conn) => {
                drop(rx);
                metrics::counter!("thrift_client_pool_gets", "pool" => self.inner.config.slug.clone()).increment(1);
                Ok(conn)
            }
            Err(mpsc::error::TryRecvError::Empty) => {
                drop(rx);
                match self.inner.open_one().await {
                    Ok(conn) => {
                        metrics::counter!("thrift_client_pool_gets", "pool" => self.inner.config.slug.clone()).increment(1);
                        Ok(conn)
                    }
                    Err(PoolError::Exhausted) => {
                        metrics::counter!("thrift_client_pool_exhausted", "pool" => self.inner.config.slug.clone()).increment(1);
                        Err(PoolError::Exhausted)
                    }
                    Err(err) => Err(err),
                }
            }
            Err(mpsc::error::TryRecvError::Disconnected) => Err(PoolError::Closed),
        }
    }

    /// Return a connection obtained from [`ConnectionPool::get`]. Open
    /// connections are re-enqueued; closed ones are discarded and the
    /// allocated count is decremented.
    pub async fn release(&self, conn: Arc<TtlConnection<F>>) {
        if self.inner.closed.load(Ordering::SeqCst) {
            conn.close().await;
            self.inner.allocated.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        if conn.is_open().await {
            if self.inner.idle_tx.send(conn).await.is_err() {
                // Receiver dropped concurrently with close(); the
                // connection is simply leaked from the pool's perspective,
                // matching a programmer-error release after close.
                self.inner.allocated.fetch_sub(1, Ordering::SeqCst);
            }
        } else {
            self.inner.allocated.fetch_sub(1, Ordering::SeqCst);
            metrics::counter!("thrift_client_pool_closed_connections", "pool" => self.inner.config.slug.clone()).increment(1);
        }
    }

    /// Drain and close every idle connection, then reject further `get`
    /// calls with [`PoolError::Closed`].
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.background_task.lock().await.take() {
            handle.abort();
        }

        let mut rx = self.inner.idle_rx.lock().await;
        rx.close();
        while let Ok(conn) = rx.try_recv() {
            conn.close().await;
            self.inner.allocated.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn slug(&self) -> &str {
        &self.inner.config.slug
    }

    /// Snapshot of current occupancy. `idle_connections` is a point-in-time
    /// read of the channel length and may be stale by the time it is
    /// observed.
    pub fn state(&self) -> PoolState {
        PoolState {
            connections: self.inner.allocated.load(Ordering::SeqCst),
            idle_connections: self.inner.idle_tx.max_capacity() - self.inner.idle_tx.capacity(),
        }
    }

    fn spawn_background_task(self: Arc<Self>, interval: Duration) {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if self.inner.closed.load(Ordering::SeqCst) {
                    return;
                }
                while self.inner.allocated.load(Ordering::SeqCst) < self.inner.config.min
                    && !self.inner.closed.load(Ordering::SeqCst)
                {
                    match self.inner.open_one().await {
                        Ok(conn) => self.inner.enqueue(conn).await,
                        Err(err) => {
                            tracing::warn!(pool = %self.inner.config.slug, error = %err, "background top-up failed");
                            break;
                        }
                    }
                }
            }
        });
        // Stash the handle; a concurrent `new` can't race this because the
        // task is only spawned once, right after construction.
        if let Ok(mut slot) = self.background_task.try_lock() {
            *slot = Some(handle);
        }
    }
}

impl<F: ConnectionFactory> Inner<F> {
    /// Atomically reserve a slot against `max` via compare-and-swap:
    /// returns `true` only if `allocated` was below `max` and has now been
    /// incremented. This is what makes the exhaustion check in `get` and
    /// the increment itself a single atomic step instead of two, so two
    /// concurrent callers can never both observe a free slot and both
    /// allocate past `max`.
    fn try_reserve(&self) -> bool {
        self.allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.config.max).then_some(n + 1))
            .is_ok()
    }

    /// Reserve a slot, then dial. If the dial fails the reservation is
    /// released so a failed attempt never holds onto capacity.
    async fn open_one(&self) -> Result<Arc<TtlConnection<F>>, PoolError> {
        if !self.try_reserve() {
            return Err(PoolError::Exhausted);
        }
        match TtlConnection::open(self.factory.clone(), self.config.connection.clone(), self.config.slug.clone()).await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                self.allocated.fetch_sub(1, Ordering::SeqCst);
                Err(PoolError::Connect(Box::new(err)))
            }
        }
    }

    async fn enqueue(&self, conn: Arc<TtlConnection<F>>) {
        if self.idle_tx.send(conn).await.is_err() {
            tracing::warn!(pool = %self.config.slug, "failed to enqueue newly opened connection; pool already closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ttl_connection::PooledConnection;
    use rpc_core::{Payload, RpcCall, RpcContext};
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    struct Fake;

    #[async_trait::async_trait]
    impl PooledConnection for Fake {
        async fn call(&self, _ctx: &mut RpcContext, _call: RpcCall) -> Result<Payload, RpcError> {
            Ok(Payload::new())
        }

        async fn close(&mut self) {}
    }

    fn factory() -> impl ConnectionFactory<Connection = Fake> {
        || async { Ok(Fake) }
    }

    fn config(slug: &str, max: usize) -> PoolConfig {
        PoolConfig {
            slug: slug.to_string(),
            required_initial: 0,
            initial: 0,
            min: 0,
            max,
            background_task_interval: None,
            connection: TtlConnectionConfig { ttl: None, jitter: 0.0 },
        }
    }

    #[tokio::test]
    async fn concurrent_gets_never_exceed_max() {
        // §8 scenario #4: max=2, three concurrent calls -> exactly one
        // returns pool-exhaustion, the other two succeed. A factory with a
        // small delay widens the race window between the empty-check and
        // the allocation so a non-atomic reservation would actually be
        // observed to over-allocate.
        let slow_factory = || async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<Fake, RpcError>(Fake)
        };
        let pool = ConnectionPool::new(Arc::new(slow_factory), config("t-concurrent", 2)).await.unwrap();

        let (a, b, c) = tokio::join!(pool.get(), pool.get(), pool.get());
        let results = [a, b, c];
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        let exhausted_count = results.iter().filter(|r| matches!(r, Err(e) if e.is_exhausted())).count();

        assert_eq!(ok_count, 2);
        assert_eq!(exhausted_count, 1);
        assert_eq!(pool.state().connections, 2);
    }

    #[tokio::test]
    async fn get_exhausts_at_max() {
        let pool = ConnectionPool::new(Arc::new(factory()), config("t1", 2)).await.unwrap();
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        let err = pool.get().await.unwrap_err();
        assert!(err.is_exhausted());
        pool.release(a).await;
        pool.release(b).await;
    }

    #[tokio::test]
    async fn released_connection_is_reused() {
        let pool = ConnectionPool::new(Arc::new(factory()), config("t2", 1)).await.unwrap();
        let a = pool.get().await.unwrap();
        pool.release(a).await;
        assert_eq!(pool.state().connections, 1);
        let _b = pool.get().await.unwrap();
    }

    #[tokio::test]
    async fn closed_pool_rejects_get() {
        let pool = ConnectionPool::new(Arc::new(factory()), config("t3", 1)).await.unwrap();
        pool.close().await;
        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::Closed));
    }

    #[tokio::test]
    async fn required_initial_failure_fails_construction() {
        let counter = Arc::new(StdAtomicUsize::new(0));
        let counter2 = counter.clone();
        let factory = move || {
            let counter = counter2.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<Fake, _>(RpcError::Network("boom".into()))
            }
        };
        let mut cfg = config("t4", 2);
        cfg.required_initial = 1;
        cfg.initial = 1;
        let err = ConnectionPool::new(Arc::new(factory), cfg).await.unwrap_err();
        assert!(matches!(err, PoolError::InitialConnect(_)));
    }

    #[tokio::test]
    async fn validation_rejects_bad_config() {
        let mut cfg = config("t5", 2);
        cfg.initial = 3;
        let err = ConnectionPool::new(Arc::new(factory()), cfg).await.unwrap_err();
        assert!(matches!(err, PoolError::Configuration(_)));
    }

    #[tokio::test]
    async fn background_task_tops_up_to_min() {
        let mut cfg = config("t6", 4);
        cfg.min = 2;
        cfg.background_task_interval = Some(Duration::from_millis(5));
        let pool = ConnectionPool::new(Arc::new(factory()), cfg).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(pool.state().connections >= 2);
    }
}
