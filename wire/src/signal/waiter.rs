// src/signal/waiter.rs

use futures_util::task::AtomicWaker;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::Waker;
use std::thread::{self, Thread};

const PENDING: u8 = 0;
const NOTIFIED: u8 = 1;
const CANCELLED: u8 = 2;

/// A queued waiter: either a parked thread or a task waker.
pub(crate) struct WaitNode {
  state: AtomicU8,
  waker: AtomicWaker,
  thread: Option<Thread>,
}

impl WaitNode {
  pub(crate) fn new_async(waker: &Waker) -> Arc<Self> {
    let node = WaitNode {
      state: AtomicU8::new(PENDING),
      waker: AtomicWaker::new(),
      thread: None,
    };
    node.waker.register(waker);
    Arc::new(node)
  }

  pub(crate) fn new_sync() -> Arc<Self> {
    Arc::new(WaitNode {
      state: AtomicU8::new(PENDING),
      waker: AtomicWaker::new(),
      thread: Some(thread::current()),
    })
  }

  /// PENDING -> NOTIFIED. Returns `false` if the waiter already left.
  #[inline]
  pub(crate) fn notify(&self) -> bool {
    self
      .state
      .compare_exchange(PENDING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  /// PENDING -> CANCELLED. Returns `false` if a notification got there first.
  #[inline]
  pub(crate) fn cancel(&self) -> bool {
    self
      .state
      .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  /// NOTIFIED -> PENDING, for a woken waiter that lost its permit to a barger.
  #[inline]
  pub(crate) fn rearm(&self) {
    let _ = self
      .state
      .compare_exchange(NOTIFIED, PENDING, Ordering::AcqRel, Ordering::Acquire);
  }

  #[inline]
  pub(crate) fn is_notified(&self) -> bool {
    self.state.load(Ordering::Acquire) == NOTIFIED
  }

  #[inline]
  pub(crate) fn register(&self, waker: &Waker) {
    self.waker.register(waker);
  }

  pub(crate) fn wake(&self) {
    match &self.thread {
      Some(thread) => thread.unpark(),
      None => self.waker.wake(),
    }
  }
}

impl fmt::Debug for WaitNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match self.state.load(Ordering::Relaxed) {
      PENDING => "pending",
      NOTIFIED => "notified",
      _ => "cancelled",
    };
    f.debug_struct("WaitNode")
      .field("state", &state)
      .field("sync", &self.thread.is_some())
      .finish()
  }
}
