//! Wire-contract data model shared by the connection pool and the
//! middleware stack: [`RpcHeaders`], [`Span`], [`EdgeContext`], the
//! [`RpcContext`]/[`Caller`] call surface, and the [`RpcError`] taxonomy.
//!
//! The Thrift wire codec itself (binary/compact/header transports) is out
//! of scope here: this crate treats request/response payloads as opaque
//! bytes and headers as a string map, and says nothing about how either is
//! framed on the wire.

pub mod call;
pub mod edge_context;
pub mod error;
pub mod headers;
pub mod metrics_validation;
pub mod span;

pub use call::{Caller, Payload, RpcCall, RpcContext};
pub use edge_context::{EdgeContext, EdgeContextError};
pub use error::{IdlError, PoolErrorKind, RpcError};
pub use headers::{header, RpcHeaders};
pub use metrics_validation::{validate_metric_name, MetricNameError};
pub use span::Span;
