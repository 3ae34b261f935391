// src/signal/spin.rs

//! A counter-based auto-reset signal with a spinning fast path.
//!
//! The state is one `AtomicU64` holding two `u32` counters that always move
//! together in a single compare-and-swap:
//!
//! ```text
//!  63            32 31             0
//! +----------------+----------------+
//! | queued waiters |    permits     |
//! +----------------+----------------+
//! ```
//!
//! A wait first spins trying to turn a permit into a release. Only if that fails
//! does it take the queue lock and enqueue. `set` mints a permit whenever queued
//! waiters outnumber permits (or banks one when nobody waits) and wakes one queued
//! waiter that has not been woken yet.
//!
//! # Fairness
//!
//! None. A permit minted for a queued waiter can be taken by a caller that never
//! queued; the woken waiter then simply goes back to waiting. No `set` is lost:
//! every permit releases exactly one caller, just not necessarily the oldest.
//! Use [`QueueSignal`](super::QueueSignal) when arrival order matters.

use super::waiter::WaitNode;
use super::AutoResetSignal;
use crate::observe::{NoopObserver, Observer};

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::Mutex;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

const PERMIT_ONE: u64 = 1;
const WAITER_ONE: u64 = 1 << 32;
const SPIN_ROUNDS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Counters(u64);

impl Counters {
  #[inline]
  fn permits(self) -> u32 {
    self.0 as u32
  }

  #[inline]
  fn waiters(self) -> u32 {
    (self.0 >> 32) as u32
  }

  #[inline]
  fn pack(permits: u32, waiters: u32) -> Self {
    Counters(((waiters as u64) << 32) | permits as u64)
  }
}

/// An auto-reset signal tuned for the uncontended case. Not FIFO; see the
/// [module documentation](self).
pub struct SpinSignal {
  counters: CachePadded<AtomicU64>,
  // Every queued node; `waiters` in `counters` mirrors its length and only
  // changes while this lock is held.
  queue: Mutex<VecDeque<Arc<WaitNode>>>,
  observer: Arc<dyn Observer>,
}

impl fmt::Debug for SpinSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let c = self.load();
    f.debug_struct("SpinSignal")
      .field("permits", &c.permits())
      .field("waiters", &c.waiters())
      .finish()
  }
}

impl Default for SpinSignal {
  fn default() -> Self {
    Self::new()
  }
}

impl SpinSignal {
  /// Creates an unsignaled signal.
  pub fn new() -> Self {
    Self::with_observer(Arc::new(NoopObserver))
  }

  /// Creates an unsignaled signal that reports cancelled waits to `observer`.
  pub fn with_observer(observer: Arc<dyn Observer>) -> Self {
    SpinSignal {
      counters: CachePadded::new(AtomicU64::new(0)),
      queue: Mutex::new(VecDeque::new()),
      observer,
    }
  }

  #[inline]
  fn load(&self) -> Counters {
    Counters(self.counters.load(Ordering::Acquire))
  }

  #[inline]
  fn cas(&self, current: Counters, next: Counters) -> Result<(), Counters> {
    self
      .counters
      .compare_exchange_weak(current.0, next.0, Ordering::AcqRel, Ordering::Acquire)
      .map(|_| ())
      .map_err(Counters)
  }

  /// Mints a permit if waiters outnumber permits, or banks one if nobody waits.
  pub fn set(&self) {
    let mut current = self.load();
    // Lock-free path: nobody queued.
    while current.waiters() == 0 {
      if current.permits() > 0 {
        return;
      }
      match self.cas(current, Counters::pack(1, 0)) {
        Ok(()) => return,
        Err(actual) => current = actual,
      }
    }

    let queue = self.queue.lock();
    let mut current = self.load();
    loop {
      // Waiters only change under the lock, so `current.waiters()` is stable here.
      if current.permits() > current.waiters() {
        return;
      }
      match self.cas(current, Counters::pack(current.permits() + 1, current.waiters())) {
        Ok(()) => break,
        Err(actual) => current = actual,
      }
    }
    if let Some(node) = queue.iter().find(|n| n.notify()) {
      node.wake();
    }
  }

  /// Takes a permit if one is available, regardless of who is queued.
  pub fn try_wait(&self) -> bool {
    let mut current = self.load();
    while current.permits() > 0 {
      match self.cas(current, Counters(current.0 - PERMIT_ONE)) {
        Ok(()) => return true,
        Err(actual) => current = actual,
      }
    }
    false
  }

  /// Waits for the signal.
  pub fn wait_async(&self) -> SpinWait<'_> {
    SpinWait {
      signal: self,
      node: None,
      done: false,
    }
  }

  /// Spins briefly on the permit counter.
  fn spin_acquire(&self) -> bool {
    let backoff = Backoff::new();
    for _ in 0..SPIN_ROUNDS {
      if self.try_wait() {
        return true;
      }
      backoff.spin();
    }
    false
  }

  /// Takes a permit, or joins the queue with a node made by `make`.
  fn acquire_or_enqueue(&self, make: impl FnOnce() -> Arc<WaitNode>) -> Option<Arc<WaitNode>> {
    let mut queue = self.queue.lock();
    let mut current = self.load();
    loop {
      let next = if current.permits() > 0 {
        Counters(current.0 - PERMIT_ONE)
      } else {
        Counters(current.0 + WAITER_ONE)
      };
      match self.cas(current, next) {
        Ok(()) if current.permits() > 0 => return None,
        Ok(()) => break,
        Err(actual) => current = actual,
      }
    }
    let node = make();
    queue.push_back(Arc::clone(&node));
    Some(node)
  }

  /// A woken waiter claims a permit and leaves the queue in one step. Returns
  /// `false` (and re-arms the node) if a barger got the permit first.
  fn acquire_queued(&self, node: &Arc<WaitNode>) -> bool {
    let mut queue = self.queue.lock();
    let mut current = self.load();
    while current.permits() > 0 {
      match self.cas(current, Counters(current.0 - PERMIT_ONE - WAITER_ONE)) {
        Ok(()) => {
          if let Some(pos) = queue.iter().position(|n| Arc::ptr_eq(n, node)) {
            queue.remove(pos);
          }
          return true;
        }
        Err(actual) => current = actual,
      }
    }
    node.rearm();
    false
  }

  /// Removes a queued waiter that is giving up.
  fn withdraw(&self, node: &Arc<WaitNode>) {
    let was_notified = !node.cancel();
    let mut queue = self.queue.lock();
    let Some(pos) = queue.iter().position(|n| Arc::ptr_eq(n, node)) else {
      return;
    };
    queue.remove(pos);

    let mut current = self.load();
    let after = loop {
      let waiters = current.waiters() - 1;
      // Nobody may bank more than one permit past the remaining waiters.
      let permits = current.permits().min(waiters + 1);
      let next = Counters::pack(permits, waiters);
      match self.cas(current, next) {
        Ok(()) => break next,
        Err(actual) => current = actual,
      }
    };

    if was_notified {
      // The wake meant for this waiter goes to the next one instead.
      if after.permits() > 0 {
        if let Some(next) = queue.iter().find(|n| n.notify()) {
          next.wake();
        }
      }
    } else {
      drop(queue);
      self.observer.wait_cancelled();
    }
  }
}

impl AutoResetSignal for SpinSignal {
  type Wait<'a> = SpinWait<'a>;

  fn set(&self) {
    SpinSignal::set(self)
  }

  fn try_wait(&self) -> bool {
    SpinSignal::try_wait(self)
  }

  fn wait_async(&self) -> SpinWait<'_> {
    SpinSignal::wait_async(self)
  }
}

/// Future returned by [`SpinSignal::wait_async`].
#[must_use = "futures do nothing unless you .await or poll them"]
pub struct SpinWait<'a> {
  signal: &'a SpinSignal,
  node: Option<Arc<WaitNode>>,
  done: bool,
}

impl fmt::Debug for SpinWait<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SpinWait")
      .field("queued", &self.node.is_some())
      .field("done", &self.done)
      .finish()
  }
}

impl Future for SpinWait<'_> {
  type Output = ();

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
    let this = self.get_mut();
    if this.done {
      return Poll::Ready(());
    }

    let node = match &this.node {
      Some(node) => node,
      None => {
        if this.signal.spin_acquire() {
          this.done = true;
          return Poll::Ready(());
        }
        match this.signal.acquire_or_enqueue(|| WaitNode::new_async(cx.waker())) {
          None => {
            this.done = true;
            return Poll::Ready(());
          }
          Some(node) => {
            this.node = Some(node);
            return Poll::Pending;
          }
        }
      }
    };

    loop {
      if !node.is_notified() {
        node.register(cx.waker());
        if !node.is_notified() {
          return Poll::Pending;
        }
      }
      if this.signal.acquire_queued(node) {
        this.node = None;
        this.done = true;
        return Poll::Ready(());
      }
      // Lost the permit to a barger; the node is pending again.
    }
  }
}

impl Drop for SpinWait<'_> {
  fn drop(&mut self) {
    if let Some(node) = self.node.take() {
      self.signal.withdraw(&node);
    }
  }
}
