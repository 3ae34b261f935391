// src/signal/queue.rs

//! A FIFO auto-reset signal for both blocking and async waiters.
//!
//! Waiters line up in a single queue behind a `parking_lot::Mutex`, the same
//! arrangement as a capacity gate: threads and tasks share one order, and each
//! `set` hands the signal to the oldest waiter still pending.

use super::waiter::WaitNode;
use super::AutoResetSignal;
use crate::observe::{NoopObserver, Observer};

use parking_lot::Mutex;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct QueueState {
  banked: bool,
  waiters: VecDeque<Arc<WaitNode>>,
}

/// An auto-reset signal that releases waiters in strict arrival order.
pub struct QueueSignal {
  state: Mutex<QueueState>,
  observer: Arc<dyn Observer>,
}

impl fmt::Debug for QueueSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("QueueSignal")
      .field("banked", &state.banked)
      .field("waiters", &state.waiters.len())
      .finish()
  }
}

impl Default for QueueSignal {
  fn default() -> Self {
    Self::new()
  }
}

impl QueueSignal {
  /// Creates an unsignaled signal.
  pub fn new() -> Self {
    Self::with_observer(Arc::new(NoopObserver))
  }

  /// Creates an unsignaled signal that reports cancelled waits to `observer`.
  pub fn with_observer(observer: Arc<dyn Observer>) -> Self {
    QueueSignal {
      state: Mutex::new(QueueState::default()),
      observer,
    }
  }

  /// Hands the signal to the oldest pending waiter, or banks it.
  pub fn set(&self) {
    let mut state = self.state.lock();
    while let Some(node) = state.waiters.pop_front() {
      if node.notify() {
        drop(state);
        node.wake();
        return;
      }
    }
    state.banked = true;
  }

  /// Consumes a banked signal without waiting.
  pub fn try_wait(&self) -> bool {
    std::mem::take(&mut self.state.lock().banked)
  }

  /// Waits for the signal.
  pub fn wait_async(&self) -> QueueWait<'_> {
    QueueWait {
      signal: self,
      stage: Stage::Init,
    }
  }

  /// Blocks the current thread until the signal is delivered.
  pub fn wait(&self) {
    let delivered = self.wait_deadline(None);
    debug_assert!(delivered);
  }

  /// Blocks the current thread until the signal is delivered or `timeout`
  /// elapses. Returns `true` if the signal was consumed.
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    self.wait_deadline(Some(Instant::now() + timeout))
  }

  /// Number of queued waiters. Only a hint under concurrency.
  pub fn waiters(&self) -> usize {
    self.state.lock().waiters.len()
  }

  fn wait_deadline(&self, deadline: Option<Instant>) -> bool {
    let node = match self.enqueue(WaitNode::new_sync) {
      Some(node) => node,
      None => return true,
    };
    loop {
      if node.is_notified() {
        return true;
      }
      match deadline {
        None => thread::park(),
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            return !self.withdraw(&node);
          }
          thread::park_timeout(deadline - now);
        }
      }
    }
  }

  /// Takes the banked signal, or queues a node made by `make`.
  fn enqueue(&self, make: impl FnOnce() -> Arc<WaitNode>) -> Option<Arc<WaitNode>> {
    let mut state = self.state.lock();
    if std::mem::take(&mut state.banked) {
      return None;
    }
    let node = make();
    state.waiters.push_back(Arc::clone(&node));
    Some(node)
  }

  /// Removes a pending waiter. Returns `false` if it had already been notified,
  /// in which case it owns the signal.
  fn withdraw(&self, node: &Arc<WaitNode>) -> bool {
    if node.cancel() {
      let mut state = self.state.lock();
      if let Some(pos) = state.waiters.iter().position(|n| Arc::ptr_eq(n, node)) {
        state.waiters.remove(pos);
      }
      drop(state);
      self.observer.wait_cancelled();
      true
    } else {
      false
    }
  }
}

impl AutoResetSignal for QueueSignal {
  type Wait<'a> = QueueWait<'a>;

  fn set(&self) {
    QueueSignal::set(self)
  }

  fn try_wait(&self) -> bool {
    QueueSignal::try_wait(self)
  }

  fn wait_async(&self) -> QueueWait<'_> {
    QueueSignal::wait_async(self)
  }
}

enum Stage {
  Init,
  Queued(Arc<WaitNode>),
  Done,
}

/// Future returned by [`QueueSignal::wait_async`].
#[must_use = "futures do nothing unless you .await or poll them"]
pub struct QueueWait<'a> {
  signal: &'a QueueSignal,
  stage: Stage,
}

impl fmt::Debug for QueueWait<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let stage = match &self.stage {
      Stage::Init => "init",
      Stage::Queued(_) => "queued",
      Stage::Done => "done",
    };
    f.debug_struct("QueueWait").field("stage", &stage).finish()
  }
}

impl Future for QueueWait<'_> {
  type Output = ();

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
    let this = self.get_mut();
    match &this.stage {
      Stage::Init => match this.signal.enqueue(|| WaitNode::new_async(cx.waker())) {
        None => {
          this.stage = Stage::Done;
          Poll::Ready(())
        }
        Some(node) => {
          this.stage = Stage::Queued(node);
          Poll::Pending
        }
      },
      Stage::Queued(node) => {
        if !node.is_notified() {
          node.register(cx.waker());
          if !node.is_notified() {
            return Poll::Pending;
          }
        }
        this.stage = Stage::Done;
        Poll::Ready(())
      }
      Stage::Done => Poll::Ready(()),
    }
  }
}

impl Drop for QueueWait<'_> {
  fn drop(&mut self) {
    if let Stage::Queued(node) = &self.stage {
      if !self.signal.withdraw(node) {
        // Notified but never observed: pass the signal on.
        self.signal.set();
      }
    }
  }
}
