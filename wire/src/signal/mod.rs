// src/signal/mod.rs

//! Auto-reset signals.
//!
//! Each [`set`](AutoResetSignal::set) releases at most one waiter. With nobody
//! waiting, it leaves a single banked signal for the next caller; further sets
//! while one is already banked change nothing.
//!
//! Three strategies share that contract:
//!
//! | type            | state                                   | release order     |
//! |-----------------|-----------------------------------------|-------------------|
//! | [`QueueSignal`] | FIFO of waiters + banked flag, mutex    | strict FIFO       |
//! | [`SpinSignal`]  | two `u32` counters in one atomic word   | not fair, barging |
//! | [`SlimSignal`]  | signaled bit + waiter count in one word | best effort       |
//!
//! `set` never blocks on a waiter. Dropping a pending wait withdraws it; if the
//! wait had already been handed the signal, the signal is passed on rather than
//! lost.

mod queue;
mod slim;
mod spin;
mod waiter;

pub use queue::{QueueSignal, QueueWait};
pub use slim::{SlimSignal, SlimWait, WaitKey};
pub use spin::{SpinSignal, SpinWait};

use crate::error::WaitError;

use futures_util::future::{self, Either};

use std::future::Future;
use std::pin::pin;

/// The shared contract of the auto-reset signals in this module.
pub trait AutoResetSignal: Send + Sync {
  /// Future returned by [`wait_async`](Self::wait_async).
  type Wait<'a>: Future<Output = ()> + Send + 'a
  where
    Self: 'a;

  /// Releases one waiter, or banks the signal if nobody is waiting.
  fn set(&self);

  /// Consumes a banked signal without waiting.
  fn try_wait(&self) -> bool;

  /// Waits until the signal is delivered to this caller.
  ///
  /// Dropping the returned future before it resolves withdraws the waiter.
  fn wait_async(&self) -> Self::Wait<'_>;
}

/// Waits on `signal` until it is delivered or `cancel` resolves.
///
/// If both are ready at once, the signal wins. When `cancel` wins, the wait is
/// withdrawn before this returns and any signal it had been handed goes to the
/// next waiter.
///
/// ```
/// # futures_util::FutureExt::now_or_never(async {
/// use fibre_wire::signal::{wait_or_cancel, AutoResetSignal, QueueSignal};
/// use fibre_wire::WaitError;
///
/// let signal = QueueSignal::new();
/// let res = wait_or_cancel(&signal, async {}).await;
/// assert_eq!(res, Err(WaitError::Cancelled));
///
/// signal.set();
/// assert_eq!(wait_or_cancel(&signal, async {}).await, Ok(()));
/// # });
/// ```
pub async fn wait_or_cancel<S, C>(signal: &S, cancel: C) -> Result<(), WaitError>
where
  S: AutoResetSignal + ?Sized,
  C: Future,
{
  let wait = pin!(signal.wait_async());
  let cancel = pin!(cancel);
  match future::select(wait, cancel).await {
    Either::Left(((), _)) => Ok(()),
    // The pinned wait is dropped, and so withdrawn, when this frame ends.
    Either::Right(_) => Err(WaitError::Cancelled),
  }
}
