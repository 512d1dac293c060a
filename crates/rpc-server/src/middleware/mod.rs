pub mod abandon;
pub mod deadline;
pub mod edge_context;
pub mod metrics;
pub mod panic;
pub mod payload_metrics;
pub mod span;

pub use abandon::AbandonCanceledRequests;
pub use deadline::ExtractDeadlineBudget;
pub use edge_context::{EdgeContextDecoder, InjectEdgeContext};
pub use metrics::PrometheusServerMiddleware;
pub use panic::RecoverPanic;
pub use payload_metrics::ReportPayloadSizeMetrics;
pub use span::InjectServerSpan;
