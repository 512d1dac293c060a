//! Error-aggregation primitives shared by the connection pool and the
//! middleware stack: a flattening [`BatchError`], a composable
//! [`Suppressor`] for span-error classification, and a [`BatchCloser`] that
//! closes many resources and folds their failures into one error.
//!
//! `BatchError` is not `Sync` by design (see the crate-level concurrency
//! notes on the runtime crates): confine one to a single task, or guard it
//! yourself.

mod batch;
mod closer;
mod suppressor;

pub use batch::{batch_size, BatchError, BoxError};
pub use closer::{BatchCloser, Closer};
pub use suppressor::Suppressor;
