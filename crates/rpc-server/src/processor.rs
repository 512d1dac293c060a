use std::collections::HashMap;
use std::sync::Arc;

use rpc_core::{Caller, Payload, RpcCall, RpcContext, RpcError};

/// A dispatch table from method name to handler: the "processor" the
/// middleware chain ultimately wraps (§4.5). Unknown methods fail with
/// `RpcError::Application`, mirroring an unrecognized-method
/// `TApplicationException` on the wire.
#[derive(Default)]
pub struct MethodDispatcher {
    handlers: HashMap<String, Arc<dyn Caller>>,
}

impl MethodDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, method: impl Into<String>, handler: Arc<dyn Caller>) -> Self {
        self.handlers.insert(method.into(), handler);
        self
    }
}

#[async_trait::async_trait]
impl Caller for MethodDispatcher {
    async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
        match self.handlers.get(&call.method) {
            Some(handler) => handler.call(ctx, call).await,
            None => Err(RpcError::Application(format!("unknown method {}", call.method))),
        }
    }
}
