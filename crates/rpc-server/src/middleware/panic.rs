use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use rpc_core::{Caller, Payload, RpcCall, RpcContext, RpcError};

use crate::chain::ServerMiddleware;

/// Catches a panic unwinding out of the wrapped handler, logs it with the
/// endpoint name, increments a panic counter, and returns a protocol-level
/// error instead of letting the panic propagate into the connection's
/// task (§4.5 step 7). Should be outermost among the handler-adjacent
/// middlewares so nothing downstream of it is skipped on panic.
pub struct RecoverPanic;

struct Wrapped {
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        let method = call.method.clone();
        match AssertUnwindSafe(self.next.call(ctx, call)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                tracing::error!(method = %method, panic = %message, "rpc handler panicked");
                metrics::counter!("thrift_server_panics_total", "method" => method.clone()).increment(1);
                Err(RpcError::Protocol(format!("{method} panicked: {message}")))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl ServerMiddleware for RecoverPanic {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped { next })
    }
}
