use std::error::Error as StdError;
use std::sync::Arc;

use crate::BoxError;

/// A composable predicate deciding whether a failure should be hidden from
/// span/error-taxonomy reporting while still being returned to the caller.
///
/// The default value, `Suppressor::none()`, suppresses nothing. Pass one
/// into `InjectServerSpan`/`MonitorClient` to control which errors mark a
/// span as failed.
#[derive(Clone)]
pub struct Suppressor(Option<Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>>);

impl Suppressor {
    /// Suppresses nothing: every error is reported.
    pub fn none() -> Self {
        Self(None)
    }

    /// Suppresses everything: `wrap` always returns `None`.
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Build a suppressor from a predicate.
    pub fn new(pred: impl Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static) -> Self {
        Self(Some(Arc::new(pred)))
    }

    /// True if `err` should be treated as non-error for span-reporting
    /// purposes.
    pub fn should_suppress(&self, err: &(dyn StdError + 'static)) -> bool {
        match &self.0 {
            Some(pred) => pred(err),
            None => false,
        }
    }

    /// Returns `None` if `err` is `Some` and should be suppressed,
    /// otherwise returns `err` unchanged.
    pub fn wrap(&self, err: Option<BoxError>) -> Option<BoxError> {
        match err {
            Some(e) if self.should_suppress(e.as_ref()) => None,
            other => other,
        }
    }

    /// Combine suppressors with logical OR: the result suppresses an error
    /// iff any of `suppressors` would.
    pub fn or(suppressors: impl IntoIterator<Item = Suppressor>) -> Suppressor {
        let suppressors: Vec<Suppressor> = suppressors.into_iter().collect();
        Suppressor::new(move |err| suppressors.iter().any(|s| s.should_suppress(err)))
    }
}

impl Default for Suppressor {
    fn default() -> Self {
        Self::none()
    }
}
