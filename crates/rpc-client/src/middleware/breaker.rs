use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rpc_core::{Caller, Payload, RpcCall, RpcContext, RpcError};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::chain::ClientMiddleware;

#[derive(Clone, Debug)]
pub struct FailureRatioBreakerConfig {
    /// Minimum number of requests in the current window before the
    /// failure ratio is even considered (§4.8: `should_trip` requires
    /// both this *and* the ratio threshold).
    pub min_requests: u64,
    /// Failure ratio (0.0-1.0) at or above which the breaker trips open.
    pub threshold: f64,
    /// How long the breaker stays open before allowing a single trial
    /// request through (half-open).
    pub open_duration: Duration,
    /// How often counts are reset while closed, bounding the window the
    /// ratio is computed over.
    pub window: Duration,
    /// How often the state gauge is republished by the background task.
    pub publish_interval: Duration,
}

impl Default for FailureRatioBreakerConfig {
    fn default() -> Self {
        Self {
            min_requests: 10,
            threshold: 0.5,
            open_duration: Duration::from_secs(5),
            window: Duration::from_secs(60),
            publish_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

#[derive(Default)]
struct Counts {
    requests: u64,
    failures: u64,
}

impl Counts {
    fn should_trip(&self, min_requests: u64, threshold: f64) -> bool {
        self.requests >= min_requests && (self.failures as f64 / self.requests as f64) >= threshold
    }
}

struct Inner {
    slug: String,
    config: FailureRatioBreakerConfig,
    state: AtomicU8,
    counts: Mutex<Counts>,
    opened_at: Mutex<Option<Instant>>,
    window_started_at: Mutex<Instant>,
    trial_in_flight: std::sync::atomic::AtomicBool,
}

/// A client middleware that short-circuits calls once the trailing window
/// shows both at least `min_requests` and a failure ratio at or above
/// `threshold`, per §4.8.
pub struct FailureRatioBreaker {
    inner: Arc<Inner>,
}

#[derive(Debug, thiserror::Error)]
#[error("circuit breaker open for {slug}")]
pub struct BreakerOpenError {
    pub slug: String,
}

impl FailureRatioBreaker {
    pub fn new(slug: impl Into<String>, config: FailureRatioBreakerConfig) -> Arc<Self> {
        let this = Arc::new(Self {
            inner: Arc::new(Inner {
                slug: slug.into(),
                config,
                state: AtomicU8::new(BreakerState::Closed as u8),
                counts: Mutex::new(Counts::default()),
                opened_at: Mutex::new(None),
                window_started_at: Mutex::new(Instant::now()),
                trial_in_flight: std::sync::atomic::AtomicBool::new(false),
            }),
        });
        this.clone().spawn_gauge_publisher();
        this
    }

    fn spawn_gauge_publisher(self: Arc<Self>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.publish_interval);
            loop {
                ticker.tick().await;
                let closed = inner.state.load(Ordering::SeqCst) == BreakerState::Closed as u8;
                metrics::gauge!("thrift_client_breaker_closed", "pool" => inner.slug.clone())
                    .set(if closed { 1.0 } else { 0.0 });
            }
        });
    }

    fn state(&self) -> BreakerState {
        match self.inner.state.load(Ordering::SeqCst) {
            0 => BreakerState::Closed,
            1 => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }

    fn set_state(&self, state: BreakerState) {
        let prev = self.inner.state.swap(state as u8, Ordering::SeqCst);
        if prev != state as u8 {
            tracing::info!(pool = %self.inner.slug, from = prev, to = state as u8, "circuit breaker transition");
        }
    }

    async fn before_call(&self) -> Result<(), BreakerOpenError> {
        match self.state() {
            BreakerState::Closed => {
                let mut window_started = self.inner.window_started_at.lock().await;
                if window_started.elapsed() >= self.inner.config.window {
                    *self.inner.counts.lock().await = Counts::default();
                    *window_started = Instant::now();
                }
                Ok(())
            }
            BreakerState::Open => {
                let opened_at = *self.inner.opened_at.lock().await;
                let elapsed = opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= self.inner.config.open_duration {
                    if !self.inner.trial_in_flight.swap(true, Ordering::SeqCst) {
                        self.set_state(BreakerState::HalfOpen);
                        return Ok(());
                    }
                }
                Err(BreakerOpenError { slug: self.inner.slug.clone() })
            }
            BreakerState::HalfOpen => {
                if !self.inner.trial_in_flight.swap(true, Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err(BreakerOpenError { slug: self.inner.slug.clone() })
                }
            }
        }
    }

    async fn after_call(&self, success: bool) {
        match self.state() {
            BreakerState::HalfOpen => {
                self.inner.trial_in_flight.store(false, Ordering::SeqCst);
                if success {
                    *self.inner.counts.lock().await = Counts::default();
                    *self.inner.window_started_at.lock().await = Instant::now();
                    self.set_state(BreakerState::Closed);
                } else {
                    *self.inner.opened_at.lock().await = Some(Instant::now());
                    self.set_state(BreakerState::Open);
                }
            }
            BreakerState::Closed => {
                let mut counts = self.inner.counts.lock().await;
                counts.requests += 1;
                if !success {
                    counts.failures += 1;
                }
                if counts.should_trip(self.inner.config.min_requests, self.inner.config.threshold) {
                    drop(counts);
                    *self.inner.opened_at.lock().await = Some(Instant::now());
                    self.set_state(BreakerState::Open);
                }
            }
            BreakerState::Open => {}
        }
    }
}

struct Wrapped {
    breaker: Arc<FailureRatioBreaker>,
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        if let Err(open) = self.breaker.before_call().await {
            return Err(RpcError::Network(Box::new(open)));
        }
        let result = self.next.call(ctx, call).await;
        let success = !matches!(&result, Err(e) if e.is_fatal_for_connection());
        self.breaker.after_call(success).await;
        result
    }
}

impl ClientMiddleware for Arc<FailureRatioBreaker> {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped {
            breaker: self.clone(),
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;
    #[async_trait::async_trait]
    impl Caller for AlwaysFails {
        async fn call(&self, _ctx: &mut RpcContext, _call: RpcCall) -> Result<Payload, RpcError> {
            Err(RpcError::Network("down".into()))
        }
    }

    struct AlwaysOk;
    #[async_trait::async_trait]
    impl Caller for AlwaysOk {
        async fn call(&self, _ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
            Ok(call.args)
        }
    }

    #[tokio::test]
    async fn trips_open_after_threshold_failures() {
        let breaker = FailureRatioBreaker::new(
            "svc",
            FailureRatioBreakerConfig {
                min_requests: 2,
                threshold: 0.5,
                open_duration: Duration::from_secs(60),
                window: Duration::from_secs(60),
                publish_interval: Duration::from_secs(60),
            },
        );
        let chain = ClientMiddleware::wrap(&breaker, Arc::new(AlwaysFails));
        let mut ctx = RpcContext::new();

        for _ in 0..2 {
            let _ = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await;
        }

        let err = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await.unwrap_err();
        assert!(matches!(err, RpcError::Network(_)));
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn half_open_trial_success_closes_breaker() {
        let breaker = FailureRatioBreaker::new(
            "svc2",
            FailureRatioBreakerConfig {
                min_requests: 1,
                threshold: 0.1,
                open_duration: Duration::from_millis(5),
                window: Duration::from_secs(60),
                publish_interval: Duration::from_secs(60),
            },
        );
        let fail_chain = ClientMiddleware::wrap(&breaker, Arc::new(AlwaysFails));
        let mut ctx = RpcContext::new();
        let _ = fail_chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(10)).await;

        let ok_chain = ClientMiddleware::wrap(&breaker, Arc::new(AlwaysOk));
        let result = ok_chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
