use std::error::Error as StdError;
use std::fmt;

/// A boxed, type-erased error. The currency type every leaf error in this
/// crate family is converted to before it can be batched.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// An ordered, flattening collection of errors that itself implements
/// [`std::error::Error`].
///
/// Adding a [`BatchError`] to another never nests it: [`BatchError::add`]
/// splices the incoming batch's children in place, so walking a batch for
/// identity or type matches never has to recurse through artificial
/// wrapper layers, and a batch can never contain itself.
#[derive(Default)]
pub struct BatchError {
    tag: Option<String>,
    errors: Vec<BoxError>,
}

impl BatchError {
    /// An empty batch, ready to accumulate errors.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty batch whose `Display` message is prefixed with `tag`
    /// instead of the default `"batch error"`.
    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            errors: Vec::new(),
        }
    }

    /// Add one error to the batch. `None` is a no-op. If `err` is itself a
    /// `BatchError`, its children are spliced in flat rather than nested.
    pub fn add(&mut self, err: impl Into<Option<BoxError>>) {
        let Some(err) = err.into() else { return };
        match err.downcast::<BatchError>() {
            Ok(nested) => self.errors.extend(nested.errors),
            Err(err) => self.errors.push(err),
        }
    }

    /// Add every error yielded by `errs`, in order. `None` entries are
    /// skipped.
    pub fn add_all<I, E>(&mut self, errs: I)
    where
        I: IntoIterator<Item = E>,
        E: Into<Option<BoxError>>,
    {
        for err in errs {
            self.add(err);
        }
    }

    /// Add `err` (if any) wrapped so its message reads `"prefix: inner"`,
    /// while its source chain (and any identity/type match against the
    /// original error) is preserved.
    pub fn add_prefix(&mut self, prefix: impl Into<String>, err: impl Into<Option<BoxError>>) {
        let Some(err) = err.into() else { return };
        self.add(Some(Box::new(Prefixed {
            prefix: prefix.into(),
            inner: err,
        }) as BoxError));
    }

    /// Remove every error from the batch.
    pub fn clear(&mut self) {
        self.errors.clear();
    }

    /// Number of leaf errors currently in the batch.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True if the batch holds no errors.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// A read-only view of the batch's children, in insertion order.
    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }

    /// Collapse the batch: `None` if empty, the sole child (moved out,
    /// unwrapped) if there is exactly one, otherwise the batch itself
    /// boxed as a single error.
    pub fn compile(mut self) -> Option<BoxError> {
        match self.errors.len() {
            0 => None,
            1 => Some(self.errors.pop().expect("len() == 1")),
            _ => Some(Box::new(self)),
        }
    }

    /// True if `pred` matches this batch's message, any child's message,
    /// or anything in a child's source chain — recursing through nested
    /// batches rather than treating them as opaque leaves.
    pub fn matches(&self, pred: &dyn Fn(&(dyn StdError + 'static)) -> bool) -> bool {
        self.errors.iter().any(|e| Self::matches_one(e.as_ref(), pred))
    }

    fn matches_one(err: &(dyn StdError + 'static), pred: &dyn Fn(&(dyn StdError + 'static)) -> bool) -> bool {
        if pred(err) {
            return true;
        }
        if let Some(batch) = err.downcast_ref::<BatchError>() {
            return batch.matches(pred);
        }
        let mut cursor = err.source();
        while let Some(s) = cursor {
            if pred(s) {
                return true;
            }
            cursor = s.source();
        }
        false
    }

    /// Find the first child (recursing through nested batches and source
    /// chains) whose concrete type is `T`.
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.errors.iter().find_map(|e| Self::downcast_one::<T>(e.as_ref()))
    }

    fn downcast_one<T: StdError + 'static>(err: &(dyn StdError + 'static)) -> Option<&T> {
        if let Some(found) = err.downcast_ref::<T>() {
            return Some(found);
        }
        if let Some(batch) = err.downcast_ref::<BatchError>() {
            return batch.downcast_ref::<T>();
        }
        let mut cursor = err.source();
        while let Some(s) = cursor {
            if let Some(found) = s.downcast_ref::<T>() {
                return Some(found);
            }
            cursor = s.source();
        }
        None
    }
}

impl fmt::Debug for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchError")
            .field("tag", &self.tag)
            .field("len", &self.errors.len())
            .finish()
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag.as_deref().unwrap_or("batch error");
        write!(f, "{tag}: total {} error(s) in this batch: ", self.errors.len())?;
        for e in &self.errors {
            write!(f, "{e}; ")?;
        }
        Ok(())
    }
}

impl StdError for BatchError {}

/// One error annotated with a short prefix, e.g. `"closing pool: connection
/// reset"`. The original error remains reachable via [`std::error::Error::source`],
/// so identity/type matching through a [`BatchError`] still finds it.
#[derive(Debug)]
struct Prefixed {
    prefix: String,
    inner: BoxError,
}

impl fmt::Display for Prefixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.prefix, self.inner)
    }
}

impl StdError for Prefixed {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Recursively count the non-nil leaf errors reachable from `err`: one for
/// every child that is not itself a [`BatchError`], plus the flattened
/// count of every nested batch. `err` itself need not be the batch: a
/// wrapper whose `source()` chain eventually reaches one is walked too, so
/// `batch_size` sees through a `fmt.Errorf`/`anyhow::Context`-style wrap
/// the same way it sees through the batch's own nesting.
pub fn batch_size(err: &(dyn StdError + 'static)) -> usize {
    if let Some(batch) = err.downcast_ref::<BatchError>() {
        return batch.errors().iter().map(|e| batch_size(e.as_ref())).sum();
    }
    match err.source() {
        Some(source) => batch_size(source),
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn boxed<E: StdError + Send + Sync + 'static>(e: E) -> BoxError {
        Box::new(e)
    }

    #[test]
    fn add_nil_is_noop() {
        let mut b = BatchError::new();
        b.add(None);
        assert_eq!(b.len(), 0);
        assert!(b.is_empty());
    }

    #[test]
    fn add_flattens_nested_batch() {
        let mut inner = BatchError::new();
        inner.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "a"))));
        inner.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "b"))));
        assert_eq!(inner.len(), 2);

        let mut outer = BatchError::new();
        outer.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "zero"))));
        let inner_err: BoxError = Box::new(inner);
        outer.add(Some(inner_err));

        assert_eq!(outer.len(), 3);
    }

    #[test]
    fn compile_empty_is_none() {
        assert!(BatchError::new().compile().is_none());
    }

    #[test]
    fn compile_single_returns_element() {
        let mut b = BatchError::new();
        b.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "solo"))));
        let compiled = b.compile().unwrap();
        assert_eq!(compiled.to_string(), "solo");
        assert!(compiled.downcast_ref::<BatchError>().is_none());
    }

    #[test]
    fn compile_multi_is_batch() {
        let mut b = BatchError::new();
        b.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "a"))));
        b.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "b"))));
        let compiled = b.compile().unwrap();
        assert!(compiled.downcast_ref::<BatchError>().is_some());
    }

    #[test]
    fn batch_size_counts_flattened_leaves() {
        let mut inner = BatchError::new();
        inner.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "a"))));
        inner.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "b"))));
        inner.add(None);

        let wrapped: BoxError = Box::new(inner);
        assert_eq!(batch_size(wrapped.as_ref()), 2);
    }

    /// A single-level wrapper whose `source()` points at the batch, standing
    /// in for a `fmt.Errorf("%w", batch)`-style wrap.
    #[derive(Debug)]
    struct Wrap(BoxError);

    impl fmt::Display for Wrap {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped: {}", self.0)
        }
    }

    impl StdError for Wrap {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(self.0.as_ref())
        }
    }

    #[test]
    fn batch_size_walks_through_a_wrapping_error() {
        let mut inner = BatchError::new();
        inner.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "a"))));
        inner.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "b"))));
        inner.add(None);

        let wrapped = Wrap(Box::new(inner));
        assert_eq!(batch_size(&wrapped), 2);
    }

    #[test]
    fn matches_walks_nested_and_prefixed() {
        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        let mut b = BatchError::new();
        b.add_prefix("x", Some(boxed(eof)));

        assert!(b.matches(&|e| e
            .downcast_ref::<io::Error>()
            .map(|e| e.kind() == io::ErrorKind::UnexpectedEof)
            .unwrap_or(false)));
    }

    #[test]
    fn display_matches_documented_form() {
        let mut b = BatchError::new();
        b.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "a"))));
        b.add(Some(boxed(io::Error::new(io::ErrorKind::Other, "b"))));
        let msg = b.to_string();
        assert!(msg.starts_with("batch error: total 2 error(s) in this batch: "));
        assert!(msg.contains("a;"));
        assert!(msg.contains("b;"));
    }
}
