use crate::{BatchError, BoxError};

/// Anything that owns a resource which must be released asynchronously,
/// such as a pool connection or a listener socket.
#[async_trait::async_trait]
pub trait Closer: Send {
    async fn close(&mut self) -> Result<(), BoxError>;
}

/// Collects closers and closes every one of them, folding any failures
/// into a single [`BatchError`] instead of stopping at the first error.
#[derive(Default)]
pub struct BatchCloser {
    closers: Vec<Box<dyn Closer>>,
}

impl BatchCloser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closer. Order is preserved; closers run in the order
    /// they were added.
    pub fn add(&mut self, closer: Box<dyn Closer>) {
        self.closers.push(closer);
    }

    /// How many closers are currently registered.
    pub fn len(&self) -> usize {
        self.closers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closers.is_empty()
    }

    /// Close every registered closer, continuing past failures. Returns
    /// `Ok(())` if every close succeeded, otherwise a compiled
    /// [`BatchError`] (a single error if only one closer failed).
    pub async fn close_all(mut self) -> Result<(), BoxError> {
        let mut batch = BatchError::with_tag("errors closing resources");
        for mut closer in self.closers.drain(..) {
            if let Err(err) = closer.close().await {
                batch.add(Some(err));
            }
        }
        match batch.compile() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
