use std::sync::Arc;

use rpc_core::Caller;

/// One layer of the outbound middleware stack. A middleware wraps the
/// next `Caller` in the chain and returns a new one; composing a list of
/// middlewares nests them so the first middleware in the list runs
/// outermost (sees the request first, the response last).
pub trait ClientMiddleware: Send + Sync {
    fn wrap(&self, next: Arc<dyn Caller>) -> Arc<dyn Caller>;
}

/// Compose `middlewares` around `innermost` (typically the pool's pooled
/// call) in declared order: `middlewares[0]` is outermost.
pub fn compose(middlewares: &[Arc<dyn ClientMiddleware>], innermost: Arc<dyn Caller>) -> Arc<dyn Caller> {
    middlewares.iter().rev().fold(innermost, |next, mw| mw.wrap(next))
}
