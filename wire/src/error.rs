// src/error.rs

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur when building a pool or a ring buffer from configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
  /// A pool or ring buffer was configured with a capacity of zero.
  #[error("capacity cannot be zero")]
  ZeroCapacity,
}

/// The failure outcome carried by a [`RecyclableFuture`](crate::future::RecyclableFuture).
///
/// Cloning is cheap: the underlying error is shared behind an `Arc`.
#[derive(Debug, Error, Clone)]
pub enum FutureError {
  /// The operation was failed explicitly by its completer.
  #[error("operation failed: {0}")]
  Failed(Arc<dyn StdError + Send + Sync + 'static>),
  /// Every completer handle was dropped without completing the future.
  #[error("operation abandoned: all completers dropped")]
  Abandoned,
}

impl FutureError {
  /// Wraps any error as a [`FutureError::Failed`].
  pub fn failed<E>(error: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    FutureError::Failed(Arc::new(error))
  }

  /// Returns `true` for [`FutureError::Abandoned`].
  pub fn is_abandoned(&self) -> bool {
    matches!(self, FutureError::Abandoned)
  }
}

/// Returned when a future is completed more than once, or through a handle
/// whose lease has already been recycled.
///
/// The rejected outcome is handed back untouched.
#[derive(Error)]
#[error("future already completed")]
pub struct DoubleCompletion<T>(pub(crate) Result<T, FutureError>);

impl<T> DoubleCompletion<T> {
  /// Consumes the error, returning the outcome that was rejected.
  #[inline]
  pub fn into_inner(self) -> Result<T, FutureError> {
    self.0
  }
}

impl<T> fmt::Debug for DoubleCompletion<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.0 {
      Ok(_) => write!(f, "DoubleCompletion(Ok(..))"),
      Err(e) => write!(f, "DoubleCompletion(Err({:?}))", e),
    }
  }
}

/// Outcome of a signal wait that did not end with the signal being consumed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
  /// The cancellation future resolved before the signal was delivered.
  #[error("wait was cancelled")]
  Cancelled,
}

/// Returned by ring buffer writes once the reader has been dropped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("ring buffer reader closed after {written} bytes of this write were committed")]
pub struct RingClosed {
  /// Bytes of the current write that were committed before the close was observed.
  pub written: usize,
}

/// Error returned by `read_timeout` on a synchronous ring reader.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReadTimeoutError {
  /// The timeout elapsed before any byte became available.
  #[error("read operation timed out")]
  Timeout,
}

impl From<RingClosed> for std::io::Error {
  fn from(err: RingClosed) -> Self {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, err)
  }
}
