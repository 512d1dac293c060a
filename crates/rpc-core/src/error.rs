use std::collections::HashMap;
use std::fmt;

use rpc_errors::{BoxError, Suppressor};

/// Retryable status codes assumed by default when an [`IdlError`] does not
/// carry an explicit `retryable` flag.
pub const CODE_TOO_EARLY: i32 = 425;
pub const CODE_TOO_MANY_REQUESTS: i32 = 429;
pub const CODE_SERVICE_UNAVAILABLE: i32 = 503;

/// The IDL "error" envelope: a business-level failure defined in the
/// service's schema, as opposed to a transport/protocol failure.
#[derive(Debug, Clone, Default)]
pub struct IdlError {
    pub message: Option<String>,
    pub code: Option<i32>,
    pub retryable: Option<bool>,
    pub details: Option<HashMap<String, String>>,
}

impl IdlError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            code: Some(code),
            retryable: None,
            details: None,
        }
    }

    /// Effective retryability: the explicit flag if set, otherwise the
    /// framework's default codes.
    pub fn is_retryable(&self) -> bool {
        if let Some(flag) = self.retryable {
            return flag;
        }
        self.code
            .map(|c| matches!(c, CODE_TOO_EARLY | CODE_TOO_MANY_REQUESTS | CODE_SERVICE_UNAVAILABLE))
            .unwrap_or(false)
    }

    /// True for the span-error-suppression default: codes outside
    /// `[500, 600)` are business-level and suppressed from span error
    /// tagging.
    pub fn is_suppressed_by_default(&self) -> bool {
        !self.code.map(|c| (500..600).contains(&c)).unwrap_or(false)
    }
}

impl fmt::Display for IdlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(msg)) => write!(f, "idl error {code}: {msg}"),
            (Some(code), None) => write!(f, "idl error {code}"),
            (None, Some(msg)) => write!(f, "idl error: {msg}"),
            (None, None) => write!(f, "idl error"),
        }
    }
}

impl std::error::Error for IdlError {}

/// The error taxonomy that the pool and middleware stack reason about by
/// *kind*, not by concrete type: which errors are fatal for a connection,
/// which are retried by default, which are context errors translated into
/// "abandon" on the server side, and which are business-level and kept out
/// of span-error reporting.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("network error")]
    Network(#[source] BoxError),

    #[error("context canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("application error: {0}")]
    Application(String),

    #[error("transport error")]
    Transport(#[source] BoxError),

    #[error(transparent)]
    Idl(#[from] IdlError),

    /// A pool-level failure. Carries just enough of a kind tag for callers
    /// to branch on exhaustion specifically (per §7's "pool-exhaustion"
    /// taxonomy entry) without this crate depending on `rpc-pool` for its
    /// concrete `PoolError` type; the original is still reachable as the
    /// source.
    #[error("connection pool error: {kind:?}")]
    Pool {
        kind: PoolErrorKind,
        #[source]
        source: BoxError,
    },
}

/// Coarse classification of a pool-level failure, mirrored from
/// `rpc-pool::PoolError` by whatever constructs [`RpcError::Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    Exhausted,
    Closed,
    Connect,
    Configuration,
}

impl RpcError {
    /// Fatal-for-connection per §4.4: network, context, protocol,
    /// application, and transport errors close the connection before it is
    /// released back to the pool. IDL-defined errors never do.
    pub fn is_fatal_for_connection(&self) -> bool {
        !matches!(self, RpcError::Idl(_))
    }

    pub fn is_context_error(&self) -> bool {
        matches!(self, RpcError::Canceled | RpcError::DeadlineExceeded)
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self, RpcError::Network(_))
    }

    /// True for the pool-exhaustion taxonomy entry specifically (as
    /// opposed to a closed or misconfigured pool), so callers can branch
    /// on it per §7 without downcasting.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(
            self,
            RpcError::Pool {
                kind: PoolErrorKind::Exhausted,
                ..
            }
        )
    }

    /// Default retry eligibility: retryable-error (network, or an IDL
    /// error whose code/flag says so) plus context errors are excluded
    /// (retrying a canceled/expired call is never eligible by default).
    pub fn is_retryable_by_default(&self) -> bool {
        match self {
            RpcError::Network(_) => true,
            RpcError::Idl(idl) => idl.is_retryable(),
            _ => false,
        }
    }

    /// Whether this error should mark a tracing span as failed, given
    /// `suppressor`. IDL errors are consulted through the suppressor; every
    /// other kind always reports.
    pub fn should_report_on_span(&self, suppressor: &Suppressor) -> bool {
        !suppressor.should_suppress(self)
    }
}

/// The framework's default [`Suppressor`]: IDL-defined errors whose code is
/// outside `[500, 600)` are business-level and suppressed from span-error
/// tagging; everything else is reported.
pub fn default_suppressor() -> Suppressor {
    Suppressor::new(|err| {
        err.downcast_ref::<RpcError>()
            .map(|e| match e {
                RpcError::Idl(idl) => idl.is_suppressed_by_default(),
                _ => false,
            })
            .unwrap_or(false)
    })
}
