use std::sync::Arc;

use rpc_core::{Caller, IdlError, Payload, RpcCall, RpcContext, RpcError};

use crate::chain::ClientMiddleware;

/// Rewrites an IDL-defined error's message to include the client name and
/// method, for friendlier logs. Unlike the reference framework's
/// duck-typed `error` interface, `RpcError::Idl` is already a closed,
/// matchable variant here, so no extra indirection layer is needed to
/// preserve identity-based matching upstream (`matches!(e,
/// RpcError::Idl(_))` and the `code`/`retryable` fields survive
/// unchanged) — see `DESIGN.md`.
pub struct BaseplateErrorWrapper {
    client_name: String,
}

impl BaseplateErrorWrapper {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

struct Wrapped {
    client_name: String,
    next: Arc<dyn Caller>,
}

#[async_trait::async_trait]
impl Caller for Wrapped {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        let method = call.method.clone();
        match self.next.call(ctx, call).await {
            Err(RpcError::Idl(idl)) => Err(RpcError::Idl(IdlError {
                message: Some(format!(
                    "{} calling {}: {}",
                    self.client_name,
                    method,
                    idl.message.as_deref().unwrap_or("idl error")
                )),
                ..idl
            })),
            other => other,
        }
    }
}

impl ClientMiddleware for BaseplateErrorWrapper {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
        Arc::new(Wrapped {
            client_name: self.client_name.clone(),
            next,
        })
    }
}
