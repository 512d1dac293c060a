use std::sync::Arc;
use std::time::Instant;

use rpc_core::{Caller, Payload, RpcCall, RpcContext, RpcError};

use crate::chain::ClientMiddleware;

/// Counters/histograms symmetric to `PrometheusServerMiddleware`, labeled
/// additionally with the remote-service slug and this client's name (§4.6
/// step 8, metric names per §6).
pub struct PrometheusClientMiddleware {
    slug: String,
    client_name: String,
}

impl PrometheusClientMiddleware {
    pub fn new(slug: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            client_name: client_name.into(),
        }
    }
}

struct Wrapped {
    slug: String,
    client_name: String,
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        let method = call.method.clone();
        let gauge = metrics::gauge!(
            "thrift_client_active_requests",
            "method" => method.clone(),
            "slug" => self.slug.clone(),
            "client_name" => self.client_name.clone(),
        );
        gauge.increment(1.0);
        let start = Instant::now();

        let result = self.next.call(ctx, call).await;

        gauge.decrement(1.0);
        let success = result.is_ok();
        let (exception_type, baseplate_status, baseplate_status_code) = classify(&result);

        metrics::histogram!(
            "thrift_client_latency_seconds",
            "method" => method.clone(),
            "success" => success.to_string(),
            "slug" => self.slug.clone(),
            "client_name" => self.client_name.clone(),
        )
        .record(start.elapsed().as_secs_f64());

        metrics::counter!(
            "thrift_client_requests_total",
            "method" => method,
            "success" => success.to_string(),
            "exception_type" => exception_type,
            "baseplate_status" => baseplate_status,
            "baseplate_status_code" => baseplate_status_code,
            "slug" => self.slug.clone(),
            "client_name" => self.client_name.clone(),
        )
        .increment(1);

        result
    }
}

fn classify(result: &Result<Payload, RpcError>) -> (&'static str, String, String) {
    match result {
        Ok(_) => ("none", String::new(), String::new()),
        Err(RpcError::Idl(idl)) => (
            "idl",
            idl.code.map(|c| c.to_string()).unwrap_or_default(),
            idl.code.map(|c| c.to_string()).unwrap_or_default(),
        ),
        Err(RpcError::Network(_)) => ("network", String::new(), String::new()),
        Err(RpcError::Canceled) => ("canceled", String::new(), String::new()),
        Err(RpcError::DeadlineExceeded) => ("deadline_exceeded", String::new(), String::new()),
        Err(RpcError::Protocol(_)) => ("protocol", String::new(), String::new()),
        Err(RpcError::Application(_)) => ("application", String::new(), String::new()),
        Err(RpcError::Transport(_)) => ("transport", String::new(), String::new()),
        Err(RpcError::Pool { .. }) => ("pool", String::new(), String::new()),
    }
}

impl ClientMiddleware for PrometheusClientMiddleware {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped {
            slug: self.slug.clone(),
            client_name: self.client_name.clone(),
            next,
        })
    }
}
