use std::sync::Arc;

use rpc_core::Caller;

/// One layer of the inbound middleware stack. Mirrors
/// `rpc_client::ClientMiddleware` in shape: a processor middleware wraps
/// the next `Caller` in the chain (here, the thing that ultimately
/// dispatches to a handler) and returns a new one.
pub trait ServerMiddleware: Send + Sync {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller>;
}

/// Compose `middlewares` around `processor` in declared order:
/// `middlewares[0]` is outermost, so it sees the request first and the
/// response last (§4.5).
pub fn compose(middlewares: &[Arc<dyn ServerMiddleware>], processor: Arc<dyn Caller>) -> Arc<dyn Caller> {
    middlewares.iter().rev().fold(processor, |next, mw| mw.wrap(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_core::{Payload, RpcCall, RpcContext, RpcError};
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait::async_trait]
    impl Caller for Recording {
        async fn call(&self, _ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
            self.log.lock().unwrap().push(self.name);
            Ok(call.args)
        }
    }

    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    struct TaggedCaller {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        next: Arc<dyn Caller>,
    }

    #[async_trait::async_trait]
    impl Caller for TaggedCaller {
        async fn call(&self, ctx: &mut RpcContext, call: RpcCall) -> Result<Payload, RpcError> {
            self.log.lock().unwrap().push(self.name);
            self.next.call(ctx, call).await
        }
    }

    impl ServerMiddleware for Tag {
        fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller> {
            Arc::new(TaggedCaller {
                name: self.name,
                log: self.log.clone(),
                next,
            })
        }
    }

    #[tokio::test]
    async fn composes_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let processor: Arc<dyn Caller> = Arc::new(Recording { name: "processor", log: log.clone() });
        let middlewares: Vec<Arc<dyn ServerMiddleware>> = vec![
            Arc::new(Tag { name: "a", log: log.clone() }),
            Arc::new(Tag { name: "b", log: log.clone() }),
        ];
        let chain = compose(&middlewares, processor);

        let mut ctx = RpcContext::new();
        chain.call(&mut ctx, RpcCall::new("M", Default::default())).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "processor"]);
    }
}
