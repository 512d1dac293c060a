//! Client-side middleware stack (§4.6) and [`ClientPool`] (§4.4): the
//! single `Caller` surface application code calls through, wrapping a
//! `rpc_pool::ConnectionPool` with an ordered chain of middleware.

pub mod chain;
pub mod client_pool;
pub mod middleware;

pub use chain::{compose, ClientMiddleware};
pub use client_pool::{ClientDefaultsOptions, ClientPool};
