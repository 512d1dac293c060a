pub mod breaker;
pub mod deadline;
pub mod edge_context;
pub mod error_wrap;
pub mod fault_injector;
pub mod metrics;
pub mod retry;
pub mod span;

pub use breaker::{BreakerOpenError, FailureRatioBreaker, FailureRatioBreakerConfig};
pub use deadline::SetDeadlineBudget;
pub use edge_context::ForwardEdgeRequestContext;
pub use error_wrap::BaseplateErrorWrapper;
pub use fault_injector::FaultInjector;
pub use metrics::PrometheusClientMiddleware;
pub use retry::{Retry, RetryConfig};
pub use span::MonitorClient;
