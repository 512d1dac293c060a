//! Server-side middleware stack (§4.5) and [`ServerRuntime`]: accepts
//! connections, dispatches each request to a processor wrapped by an
//! ordered middleware chain.

pub mod chain;
pub mod logging;
pub mod middleware;
pub mod processor;
pub mod runtime;
pub mod transport;

pub use chain::{compose, ServerMiddleware};
pub use logging::{install_tracing, LogFormat};
pub use processor::MethodDispatcher;
pub use runtime::{ServerConfig, ServerDefaultsOptions, ServerRuntime};
pub use transport::{Listener, RequestTransport};
