use std::sync::Arc;
use std::time::Instant;

use rpc_core::{Caller, Payload, RpcCall, RpcContext, RpcError};

use crate::chain::ServerMiddleware;

/// Observes an active-request gauge, a request-count counter, and a
/// latency histogram, labeled by method, success, exception-type,
/// baseplate-status, and baseplate-status-code (§4.5 step 6).
pub struct PrometheusServerMiddleware;

struct Wrapped {
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        let method = call.method.clone();
        let gauge = metrics::gauge!("thrift_server_active_requests", "method" => method.clone());
        gauge.increment(1.0);
        let start = Instant::now();

        let result = self.next.call(ctx, call).await;

        gauge.decrement(1.0);
        let success = result.is_ok();
        let (exception_type, baseplate_status) = classify(&result);

        metrics::histogram!(
            "thrift_server_latency_seconds",
            "method" => method.clone(),
            "success" => success.to_string(),
        )
        .record(start.elapsed().as_secs_f64());

        metrics::counter!(
            "thrift_server_requests_total",
            "method" => method,
            "success" => success.to_string(),
            "exception_type" => exception_type,
            "baseplate_status" => baseplate_status.clone(),
            "baseplate_status_code" => baseplate_status,
        )
        .increment(1);

        result
    }
}

fn classify(result: &Result<Payload, RpcError>) -> (&'static str, String) {
    match result {
        Ok(_) => ("none", String::new()),
        Err(RpcError::Idl(idl)) => ("idl", idl.code.map(|c| c.to_string()).unwrap_or_default()),
        Err(RpcError::Network(_)) => ("network", String::new()),
        Err(RpcError::Canceled) => ("canceled", String::new()),
        Err(RpcError::DeadlineExceeded) => ("deadline_exceeded", String::new()),
        Err(RpcError::Protocol(_)) => ("protocol", String::new()),
        Err(RpcError::Application(_)) => ("application", String::new()),
        Err(RpcError::Transport(_)) => ("transport", String::new()),
        Err(RpcError::Pool { .. }) => ("pool", String::new()),
    }
}

impl ServerMiddleware for PrometheusServerMiddleware {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped { next })
    }
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
    async fn records_without_panicking() {
        let chain = PrometheusServerMiddleware.wrap(Arc::new(Echo));
        let mut ctx = RpcContext::new();
        let result = chain.call(&mut ctx, RpcCall::new("M", Payload::new())).await;
        assert!(result.is_ok());
    }

    #[test]
    fn emitted_metric_names_satisfy_the_naming_contract() {
        rpc_core::validate_metric_name("thrift_server_active_requests", &["method"]).unwrap();
        rpc_core::validate_metric_name("thrift_server_latency_seconds", &["method", "success"]).unwrap();
        rpc_core::validate_metric_name(
            "thrift_server_requests_total",
            &[
                "method",
                "success",
                "exception_type",
                "baseplate_status",
                "baseplate_status_code",
            ],
        )
        .unwrap();
    }
}
