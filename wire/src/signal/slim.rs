// src/signal/slim.rs

//! A bit-packed auto-reset signal with blocking and async waiters.
//!
//! ```text
//!  63               32 31             1   0
//! +-------------------+----------------+---+
//! | registered waiters|  owed releases | S |
//! +-------------------+----------------+---+
//! ```
//!
//! `S` is the signaled bit. A `set` that finds `S` already up while more waiters
//! are registered than releases are pending bumps the owed count instead of
//! being lost; whoever consumes `S` with releases owed leaves it up and wakes
//! the next waiter. While no waiter is registered, `set` is a single
//! compare-and-swap and never touches the lock. Blocking waiters spin with
//! `crossbeam_utils::Backoff` before registering and sleeping on a
//! `parking_lot::Condvar`; async waiters register a keyed waker.

use super::AutoResetSignal;
use crate::observe::{NoopObserver, Observer};

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::{Condvar, Mutex};

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

const SIGNALED: u64 = 1;
const OWED_ONE: u64 = 1 << 1;
const OWED_MASK: u64 = 0xFFFF_FFFE;
const WAITER_SHIFT: u32 = 32;
const WAITER_ONE: u64 = 1 << WAITER_SHIFT;

#[inline]
fn waiters_of(word: u64) -> u64 {
  word >> WAITER_SHIFT
}

#[inline]
fn owed_of(word: u64) -> u64 {
  (word & OWED_MASK) >> 1
}

/// What a consuming attempt found in the word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Take {
  Empty,
  Cleared,
  /// An owed release was taken; `S` stays up for the next waiter.
  Owed,
}

/// Identifies one async registration with a [`SlimSignal`].
///
/// Keep it across polls of the same wait and hand it to
/// [`SlimSignal::cancel_wait`] if the wait is abandoned.
#[derive(Debug, Default)]
pub struct WaitKey(Option<u64>);

impl WaitKey {
  /// A key that is not registered yet.
  pub const fn new() -> Self {
    WaitKey(None)
  }

  /// Whether this key currently holds a registration.
  pub fn is_registered(&self) -> bool {
    self.0.is_some()
  }
}

#[derive(Debug, Default)]
struct Waiters {
  next_key: u64,
  tasks: VecDeque<(u64, Waker)>,
  threads: usize,
}

/// An auto-reset signal whose uncontended path is a single atomic word.
pub struct SlimSignal {
  word: CachePadded<AtomicU64>,
  waiters: Mutex<Waiters>,
  cond: Condvar,
  observer: Arc<dyn Observer>,
}

impl fmt::Debug for SlimSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let word = self.word.load(Ordering::Relaxed);
    f.debug_struct("SlimSignal")
      .field("signaled", &(word & SIGNALED != 0))
      .field("owed", &owed_of(word))
      .field("waiters", &waiters_of(word))
      .finish()
  }
}

impl Default for SlimSignal {
  fn default() -> Self {
    Self::new()
  }
}

impl SlimSignal {
  /// Creates an unsignaled signal.
  pub fn new() -> Self {
    Self::with_observer(Arc::new(NoopObserver))
  }

  /// Creates an unsignaled signal that reports cancelled waits to `observer`.
  pub fn with_observer(observer: Arc<dyn Observer>) -> Self {
    SlimSignal {
      word: CachePadded::new(AtomicU64::new(0)),
      waiters: Mutex::new(Waiters::default()),
      cond: Condvar::new(),
      observer,
    }
  }

  /// Releases one waiter, or banks the signal if nobody is waiting.
  ///
  /// Sets the signaled bit and wakes one registered waiter. If the bit is
  /// already up and waiters outnumber the releases still pending, the release
  /// is owed to the next waiter. Otherwise the signal is already banked and
  /// this does nothing.
  pub fn set(&self) {
    let mut current = self.word.load(Ordering::Acquire);
    loop {
      let next = if current & SIGNALED == 0 {
        current | SIGNALED
      } else if owed_of(current) < waiters_of(current) {
        current + OWED_ONE
      } else {
        return;
      };
      match self
        .word
        .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => break,
        Err(actual) => current = actual,
      }
    }
    if current & SIGNALED == 0 && current >= WAITER_ONE {
      let mut waiters = self.waiters.lock();
      self.wake_one(&mut waiters);
    }
  }

  /// Consumes the signal if it is set.
  pub fn try_wait(&self) -> bool {
    match self.take() {
      Take::Empty => false,
      Take::Cleared => true,
      Take::Owed => {
        let mut waiters = self.waiters.lock();
        self.wake_one(&mut waiters);
        true
      }
    }
  }

  // Same as `try_wait`, for callers already holding the waiter lock.
  fn try_wait_locked(&self, waiters: &mut Waiters) -> bool {
    match self.take() {
      Take::Empty => false,
      Take::Cleared => true,
      Take::Owed => {
        self.wake_one(waiters);
        true
      }
    }
  }

  fn take(&self) -> Take {
    let mut current = self.word.load(Ordering::Acquire);
    while current & SIGNALED != 0 {
      let (next, took) = if owed_of(current) > 0 {
        (current - OWED_ONE, Take::Owed)
      } else {
        (current & !SIGNALED, Take::Cleared)
      };
      match self
        .word
        .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => return took,
        Err(actual) => current = actual,
      }
    }
    Take::Empty
  }

  /// Unregisters one waiter from the word, dropping owed releases that no
  /// longer have a waiter to go to. Returns the previous word.
  fn leave(&self) -> u64 {
    let mut current = self.word.load(Ordering::Acquire);
    loop {
      let waiters = waiters_of(current) - 1;
      let owed = owed_of(current).min(waiters);
      let next = (waiters << WAITER_SHIFT) | (owed << 1) | (current & SIGNALED);
      match self
        .word
        .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => return current,
        Err(actual) => current = actual,
      }
    }
  }

  /// Whether the signal is currently banked.
  pub fn is_set(&self) -> bool {
    self.word.load(Ordering::Acquire) & SIGNALED != 0
  }

  /// Blocks until the signal is delivered.
  pub fn wait(&self) {
    let delivered = self.wait_deadline(None);
    debug_assert!(delivered);
  }

  /// Blocks until the signal is delivered or `timeout` elapses. Returns `true`
  /// if the signal was consumed.
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    self.wait_deadline(Some(Instant::now() + timeout))
  }

  /// Blocks until the signal is delivered or `deadline` passes.
  pub fn wait_deadline(&self, deadline: Option<Instant>) -> bool {
    let backoff = Backoff::new();
    while !backoff.is_completed() {
      if self.try_wait() {
        return true;
      }
      backoff.snooze();
    }

    let mut waiters = self.waiters.lock();
    waiters.threads += 1;
    self.word.fetch_add(WAITER_ONE, Ordering::AcqRel);
    let delivered = loop {
      if self.try_wait_locked(&mut waiters) {
        break true;
      }
      match deadline {
        None => self.cond.wait(&mut waiters),
        Some(deadline) => {
          if self.cond.wait_until(&mut waiters, deadline).timed_out() {
            break self.try_wait_locked(&mut waiters);
          }
        }
      }
    };
    waiters.threads -= 1;
    self.leave();
    if !delivered {
      self.observer.wait_cancelled();
    }
    delivered
  }

  /// Waits for the signal.
  pub fn wait_async(&self) -> SlimWait<'_> {
    SlimWait {
      signal: self,
      key: WaitKey::new(),
    }
  }

  /// Poll-style wait for callers that store their own [`WaitKey`].
  ///
  /// Returns `Ready` once the signal has been consumed for this caller; `key`
  /// is unregistered again at that point.
  pub fn poll_wait(&self, cx: &mut Context<'_>, key: &mut WaitKey) -> Poll<()> {
    if self.try_wait() {
      self.withdraw(key);
      return Poll::Ready(());
    }

    {
      let mut waiters = self.waiters.lock();
      match key.0 {
        None => {
          let id = waiters.next_key;
          waiters.next_key = waiters.next_key.wrapping_add(1);
          waiters.tasks.push_back((id, cx.waker().clone()));
          self.word.fetch_add(WAITER_ONE, Ordering::AcqRel);
          key.0 = Some(id);
        }
        Some(id) => match waiters.tasks.iter_mut().find(|(k, _)| *k == id) {
          Some((_, waker)) => {
            if !waker.will_wake(cx.waker()) {
              *waker = cx.waker().clone();
            }
          }
          // Popped by a `set` whose signal someone else took; queue up again.
          None => waiters.tasks.push_back((id, cx.waker().clone())),
        },
      }
    }

    // Critical re-check after registration
    if self.try_wait() {
      self.withdraw(key);
      return Poll::Ready(());
    }
    Poll::Pending
  }

  /// Abandons a registration made through [`poll_wait`](Self::poll_wait).
  ///
  /// If a `set` had already picked this waiter, its wake is passed on to the
  /// next registered waiter.
  pub fn cancel_wait(&self, key: &mut WaitKey) {
    if self.withdraw(key) {
      self.observer.wait_cancelled();
    }
  }

  /// Drops the registration held by `key`, forwarding a wake this waiter may
  /// have been picked for. Returns `false` if `key` was not registered.
  pub(crate) fn withdraw(&self, key: &mut WaitKey) -> bool {
    let Some(id) = key.0.take() else {
      return false;
    };
    let mut waiters = self.waiters.lock();
    let still_queued = match waiters.tasks.iter().position(|(k, _)| *k == id) {
      Some(pos) => {
        waiters.tasks.remove(pos);
        true
      }
      None => false,
    };
    let prev = self.leave();
    if !still_queued && prev & SIGNALED != 0 {
      self.wake_one(&mut waiters);
    }
    true
  }

  fn wake_one(&self, waiters: &mut Waiters) {
    if let Some((_, waker)) = waiters.tasks.pop_front() {
      waker.wake();
    } else if waiters.threads > 0 {
      self.cond.notify_one();
    }
  }
}

impl AutoResetSignal for SlimSignal {
  type Wait<'a> = SlimWait<'a>;

  fn set(&self) {
    SlimSignal::set(self)
  }

  fn try_wait(&self) -> bool {
    SlimSignal::try_wait(self)
  }

  fn wait_async(&self) -> SlimWait<'_> {
    SlimSignal::wait_async(self)
  }
}

/// Future returned by [`SlimSignal::wait_async`].
#[must_use = "futures do nothing unless you .await or poll them"]
#[derive(Debug)]
pub struct SlimWait<'a> {
  signal: &'a SlimSignal,
  key: WaitKey,
}

impl Future for SlimWait<'_> {
  type Output = ();

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
    let this = self.get_mut();
    this.signal.poll_wait(cx, &mut this.key)
  }
}

impl Drop for SlimWait<'_> {
  fn drop(&mut self) {
    self.signal.cancel_wait(&mut self.key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::observe::CountingObserver;

  use futures_util::FutureExt;
  use std::thread;

  fn noop_cx() -> Context<'static> {
    Context::from_waker(futures_util::task::noop_waker_ref())
  }

  #[test]
  fn set_is_idempotent_until_consumed() {
    let signal = SlimSignal::new();
    signal.set();
    signal.set();
    assert!(signal.is_set());
    assert!(signal.try_wait());
    assert!(!signal.try_wait());
  }

  #[test]
  fn async_wait_registers_and_unregisters() {
    let signal = SlimSignal::new();
    let mut cx = noop_cx();
    let mut key = WaitKey::new();
    assert!(signal.poll_wait(&mut cx, &mut key).is_pending());
    assert!(key.is_registered());
    assert_eq!(signal.word.load(Ordering::Relaxed), WAITER_ONE);

    signal.set();
    assert!(signal.poll_wait(&mut cx, &mut key).is_ready());
    assert!(!key.is_registered());
    assert_eq!(signal.word.load(Ordering::Relaxed), 0);
  }

  #[test]
  fn dropped_wait_passes_wake_to_next() {
    let observer = Arc::new(CountingObserver::new());
    let signal = SlimSignal::with_observer(observer.clone());
    let mut cx = noop_cx();
    let mut first = Box::pin(signal.wait_async());
    let mut second = Box::pin(signal.wait_async());
    assert!(first.as_mut().poll(&mut cx).is_pending());
    assert!(second.as_mut().poll(&mut cx).is_pending());

    signal.set(); // pops `first`
    drop(first);
    assert!(second.as_mut().poll(&mut cx).is_ready());
    assert_eq!(observer.snapshot().waits_cancelled, 1);
    assert_eq!(signal.word.load(Ordering::Relaxed), 0);
  }

  #[test]
  fn set_while_wake_in_flight_is_owed_to_next_waiter() {
    let signal = SlimSignal::new();
    let mut cx = noop_cx();
    let mut first = Box::pin(signal.wait_async());
    let mut second = Box::pin(signal.wait_async());
    assert!(first.as_mut().poll(&mut cx).is_pending());
    assert!(second.as_mut().poll(&mut cx).is_pending());

    signal.set();
    signal.set();
    let word = signal.word.load(Ordering::Relaxed);
    assert_eq!(word, 2 * WAITER_ONE + OWED_ONE + SIGNALED);

    assert!(first.as_mut().poll(&mut cx).is_ready());
    assert!(second.as_mut().poll(&mut cx).is_ready());
    assert_eq!(signal.word.load(Ordering::Relaxed), 0);
  }

  #[test]
  fn owed_releases_are_capped_by_waiters() {
    let signal = SlimSignal::new();
    let mut cx = noop_cx();
    let mut only = Box::pin(signal.wait_async());
    assert!(only.as_mut().poll(&mut cx).is_pending());

    for _ in 0..4 {
      signal.set();
    }
    assert_eq!(owed_of(signal.word.load(Ordering::Relaxed)), 1);
    assert!(only.as_mut().poll(&mut cx).is_ready());
    // One release went to the waiter, one stays banked.
    assert!(signal.try_wait());
    assert!(!signal.try_wait());
  }

  #[test]
  fn leaving_waiter_trims_owed_releases() {
    let signal = SlimSignal::new();
    let mut cx = noop_cx();
    let mut first = Box::pin(signal.wait_async());
    let mut second = Box::pin(signal.wait_async());
    assert!(first.as_mut().poll(&mut cx).is_pending());
    assert!(second.as_mut().poll(&mut cx).is_pending());
    for _ in 0..3 {
      signal.set();
    }
    assert_eq!(owed_of(signal.word.load(Ordering::Relaxed)), 2);

    drop(second);
    assert_eq!(owed_of(signal.word.load(Ordering::Relaxed)), 1);
    assert!(first.as_mut().poll(&mut cx).is_ready());
    assert!(signal.try_wait());
    assert!(!signal.try_wait());
  }

  #[test]
  fn blocking_wait_wakes_on_set() {
    let signal = Arc::new(SlimSignal::new());
    let waiter = {
      let signal = signal.clone();
      thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
    };
    thread::sleep(Duration::from_millis(20));
    signal.set();
    assert!(waiter.join().unwrap());
    assert!(!signal.is_set());
  }

  #[test]
  fn blocking_wait_times_out() {
    let signal = SlimSignal::new();
    let start = Instant::now();
    assert!(!signal.wait_timeout(Duration::from_millis(30)));
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(signal.word.load(Ordering::Relaxed), 0);
  }

  #[test]
  fn banked_signal_resolves_immediately() {
    let signal = SlimSignal::new();
    signal.set();
    assert_eq!(signal.wait_async().now_or_never(), Some(()));
    assert_eq!(signal.wait_async().now_or_never(), None);
  }
}
