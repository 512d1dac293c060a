use std::sync::Arc;

use rpc_core::{Caller, RpcCall, RpcContext, RpcError};
use rpc_errors::Suppressor;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::chain::{self, ServerMiddleware};
use crate::middleware::{
    AbandonCanceledRequests, EdgeContextDecoder, ExtractDeadlineBudget, InjectEdgeContext, InjectServerSpan,
    PrometheusServerMiddleware, RecoverPanic, ReportPayloadSizeMetrics,
};
use crate::transport::{Listener, RequestTransport};

/// Configuration for a [`ServerRuntime`], populated programmatically or
/// via `clap` per §10.3.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ServerConfig {
    /// Caps concurrently accepted connections. A new connection attempt
    /// past this limit waits for one to close.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Sample rate for `ReportPayloadSizeMetrics`, `0.0..=1.0`.
    #[serde(default = "default_payload_metrics_sample_rate")]
    pub payload_metrics_sample_rate: f64,
}

fn default_max_connections() -> usize {
    1024
}

fn default_payload_metrics_sample_rate() -> f64 {
    1.0
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            payload_metrics_sample_rate: default_payload_metrics_sample_rate(),
        }
    }
}

/// Accepts connections from a [`Listener`], dispatching each request to a
/// processor wrapped by an ordered server middleware chain (§4.5). Each
/// accepted connection is handled on its own task; within a connection,
/// each request is further dispatched to its own task so requests on the
/// same connection don't serialize behind each other's handler.
pub struct ServerRuntime<L: Listener> {
    listener: L,
    caller: Arc<dyn Caller>,
    config: ServerConfig,
    connection_permits: Arc<Semaphore>,
    cancellation: CancellationToken,
}

impl<L: Listener> ServerRuntime<L> {
    /// Build a runtime wrapping `processor` with an explicit,
    /// already-ordered middleware list. `middlewares[0]` is outermost.
    pub fn new(
        listener: L,
        processor: Arc<dyn Caller>,
        middlewares: Vec<Arc<dyn ServerMiddleware>>,
        config: ServerConfig,
    ) -> Self {
        let caller = chain::compose(&middlewares, processor);
        Self {
            listener,
            caller,
            connection_permits: Arc::new(Semaphore::new(config.max_connections)),
            config,
            cancellation: CancellationToken::new(),
        }
    }

    /// Assemble the §4.5 default middleware stack in its documented
    /// order: `ExtractDeadlineBudget`, `InjectServerSpan`,
    /// `InjectEdgeContext`, `AbandonCanceledRequests`,
    /// `ReportPayloadSizeMetrics`, `PrometheusServerMiddleware`,
    /// `RecoverPanic`.
    pub fn with_defaults(
        listener: L,
        processor: Arc<dyn Caller>,
        options: ServerDefaultsOptions,
        config: ServerConfig,
    ) -> Self {
        let middlewares: Vec<Arc<dyn ServerMiddleware>> = vec![
            Arc::new(ExtractDeadlineBudget),
            Arc::new(InjectServerSpan::new(options.suppressor)),
            Arc::new(InjectEdgeContext::new(options.edge_context_decoder)),
            Arc::new(AbandonCanceledRequests),
            Arc::new(ReportPayloadSizeMetrics::new(config.payload_metrics_sample_rate)),
            Arc::new(PrometheusServerMiddleware),
            Arc::new(RecoverPanic),
        ];
        Self::new(listener, processor, middlewares, config)
    }

    /// A child of the runtime's own cancellation token: cancel it to stop
    /// [`ServerRuntime::run`] after the current accept attempt.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept connections until canceled. Each connection runs on its own
    /// task, gated by `config.max_connections` concurrently held permits.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let transport = match accepted {
                        Ok(transport) => transport,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to accept connection");
                            continue;
                        }
                    };

                    let permit = self.connection_permits.clone().acquire_owned().await;
                    let Ok(permit) = permit else { continue };

                    let caller = self.caller.clone();
                    let connection_cancellation = self.cancellation.child_token();
                    tokio::spawn(async move {
                        let _permit = permit;
                        handle_connection(caller, transport, connection_cancellation).await;
                    });
                }
                _ = self.cancellation.cancelled() => {
                    tracing::info!("server runtime shutting down");
                    return;
                }
            }
        }
    }
}

/// Per-connection request loop: reads framed requests serially (as the
/// wire forces) but dispatches each to its own task so slow handlers
/// don't hold up reading the next request. Responses are written back
/// through a shared, mutex-guarded handle to the same transport, since
/// writes must still be serialized onto the one connection.
async fn handle_connection<T: RequestTransport + 'static>(caller: Arc<dyn Caller>, transport: T, cancellation: CancellationToken) {
    let transport = Arc::new(Mutex::new(transport));

    loop {
        if cancellation.is_cancelled() {
            return;
        }

        let next = transport.lock().await.read_request().await;
        let (mut ctx, method, args) = match next {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(error = %err, "error reading request; closing connection");
                return;
            }
        };

        let caller = caller.clone();
        let transport = transport.clone();
        tokio::spawn(async move {
            let call = RpcCall::new(method, args);
            let result = caller.call(&mut ctx, call).await;

            if matches!(result, Err(RpcError::Canceled)) {
                tracing::debug!("abandoning canceled request");
                return;
            }

            if let Err(err) = transport.lock().await.write_response(result).await {
                tracing::warn!(error = %err, "error writing response");
            }
        });
    }
}

/// Options for [`ServerRuntime::with_defaults`].
pub struct ServerDefaultsOptions {
    pub suppressor: Suppressor,
    pub edge_context_decoder: EdgeContextDecoder,
}

impl ServerDefaultsOptions {
    pub fn new(edge_context_decoder: EdgeContextDecoder) -> Self {
        Self {
            suppressor: Suppressor::none(),
            edge_context_decoder,
        }
    }

    pub fn with_suppressor(mut self, suppressor: Suppressor) -> Self {
        self.suppressor = suppressor;
        self
    }
}
