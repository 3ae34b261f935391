// src/future/slot.rs

use super::spawn::ContinuationSpawner;
use super::state::{State, COMPLETED, COMPLETING, CONTINUATION, DETACHED, MAX_COMPLETERS};
use crate::error::{DoubleCompletion, FutureError};
use crate::observe::{default_observer, Observer};
use crate::pool::Poolable;

use futures_util::task::AtomicWaker;

use std::cell::UnsafeCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

pub(crate) type Continuation<T> = Box<dyn FnOnce(Result<T, FutureError>) + Send>;
pub(crate) type Recycler<T> = Arc<dyn Fn(Arc<FutureSlot<T>>) + Send + Sync>;

/// The reusable storage behind a [`Completer`] / [`RecyclableFuture`] pair.
///
/// A slot is leased, completed exactly once, consumed, and then recycled: its
/// value, continuation and waker are cleared, its generation is bumped, and the
/// recycler (usually a pool's `release`) receives it back. Handles from an earlier
/// lease carry the old generation and can no longer touch it.
pub struct FutureSlot<T> {
  state: AtomicU64,
  value: UnsafeCell<Option<Result<T, FutureError>>>,
  continuation: UnsafeCell<Option<Continuation<T>>>,
  waker: AtomicWaker,
  recycler: Option<Recycler<T>>,
  spawner: Option<Arc<dyn ContinuationSpawner>>,
  observer: Arc<dyn Observer>,
}

// `value` is written only by the completer that won the COMPLETING claim and
// read only by the single party that observed COMPLETED and consumes the outcome.
// `continuation` is written by the unique consumer before it publishes
// CONTINUATION and taken by whichever side publishes second.
unsafe impl<T: Send> Send for FutureSlot<T> {}
unsafe impl<T: Send> Sync for FutureSlot<T> {}

impl<T> fmt::Debug for FutureSlot<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FutureSlot")
      .field("state", &State(self.state.load(Ordering::Relaxed)))
      .field("has_recycler", &self.recycler.is_some())
      .field("deferred", &self.spawner.is_some())
      .finish_non_exhaustive()
  }
}

// Pools of slots never reset them on release; recycling already did.
impl<T> Poolable for Arc<FutureSlot<T>> {}

impl<T: Send + 'static> FutureSlot<T> {
  /// Creates a standalone slot with no recycler. Continuations run inline.
  pub fn new() -> Arc<Self> {
    Arc::new(Self::from_parts(None, None, default_observer()))
  }

  /// Creates a slot that hands itself to `recycler` after every use.
  pub fn with_recycler<F>(recycler: F) -> Arc<Self>
  where
    F: Fn(Arc<FutureSlot<T>>) + Send + Sync + 'static,
  {
    Arc::new(Self::from_parts(Some(Arc::new(recycler)), None, default_observer()))
  }

  pub(crate) fn from_parts(
    recycler: Option<Recycler<T>>,
    spawner: Option<Arc<dyn ContinuationSpawner>>,
    observer: Arc<dyn Observer>,
  ) -> Self {
    FutureSlot {
      state: AtomicU64::new(State::idle(0).0),
      value: UnsafeCell::new(None),
      continuation: UnsafeCell::new(None),
      waker: AtomicWaker::new(),
      recycler,
      spawner,
      observer,
    }
  }

  /// Starts a new lease, returning its completer and its consumer.
  ///
  /// # Panics
  ///
  /// Panics if the slot is still in use by a previous lease.
  pub fn lease(self: &Arc<Self>) -> (Completer<T>, RecyclableFuture<T>) {
    let current = State(self.state.load(Ordering::Acquire));
    assert!(current.is_idle(), "future slot leased while still in use: {:?}", current);
    let leased = current.add_completer();
    let claimed = self
      .state
      .compare_exchange(current.0, leased.0, Ordering::AcqRel, Ordering::Acquire);
    assert!(claimed.is_ok(), "future slot leased concurrently");

    let generation = current.generation();
    (
      Completer {
        slot: Arc::clone(self),
        generation,
      },
      RecyclableFuture {
        slot: Some(Arc::clone(self)),
      },
    )
  }

  /// How many times this slot has been recycled.
  pub fn generation(&self) -> u32 {
    State(self.state.load(Ordering::Acquire)).generation()
  }

  #[inline]
  fn load(&self) -> State {
    State(self.state.load(Ordering::Acquire))
  }

  /// Claims completion for `generation`. On success the caller must `publish`.
  fn claim(&self, generation: u32) -> bool {
    let mut current = self.load();
    loop {
      if current.generation() != generation || current.is_claimed() {
        return false;
      }
      match self.state.compare_exchange_weak(
        current.0,
        current.with_flag(COMPLETING).0,
        Ordering::AcqRel,
        Ordering::Acquire,
      ) {
        Ok(_) => return true,
        Err(actual) => current = State(actual),
      }
    }
  }

  /// Makes the outcome visible and hands it to whoever is waiting for it.
  fn publish(self: &Arc<Self>, outcome: Result<T, FutureError>) {
    unsafe {
      *self.value.get() = Some(outcome);
    }
    let prev = State(self.state.fetch_or(COMPLETED, Ordering::AcqRel));
    if prev.has_continuation() {
      self.run_continuation(false);
    } else if prev.is_detached() {
      self.recycle();
    } else {
      self.waker.wake();
    }
  }

  /// Runs the registered continuation with the published outcome, then recycles.
  ///
  /// Only the side that published second (of COMPLETED and CONTINUATION) calls
  /// this, so both cells are exclusively ours.
  fn run_continuation(self: &Arc<Self>, inline: bool) {
    let continuation = unsafe { (*self.continuation.get()).take() };
    let outcome = unsafe { (*self.value.get()).take() };
    let (Some(continuation), Some(outcome)) = (continuation, outcome) else {
      debug_assert!(false, "continuation ran without both halves published");
      return;
    };

    match (&self.spawner, inline) {
      (Some(spawner), false) => {
        let slot = Arc::clone(self);
        spawner.spawn(Box::new(move || {
          continuation(outcome);
          slot.recycle();
        }));
      }
      _ => {
        continuation(outcome);
        self.recycle();
      }
    }
  }

  /// Takes the outcome if the current lease has completed.
  fn take_completed(&self) -> Option<Result<T, FutureError>> {
    if !self.load().is_completed() {
      return None;
    }
    let outcome = unsafe { (*self.value.get()).take() };
    debug_assert!(outcome.is_some(), "completed slot without an outcome");
    outcome
  }

  /// Clears the slot, bumps the generation and returns it to its recycler.
  fn recycle(self: &Arc<Self>) {
    unsafe {
      *self.value.get() = None;
      *self.continuation.get() = None;
    }
    drop(self.waker.take());

    let current = self.load();
    self.state.store(
      State::idle(current.generation().wrapping_add(1)).0,
      Ordering::Release,
    );

    if let Some(recycler) = &self.recycler {
      recycler(Arc::clone(self));
    }
  }
}

/// The producing half of a leased future.
///
/// Cloneable so the completion can race between several parties; only the first
/// completion through any clone is accepted. If every clone is dropped without
/// completing, the future resolves to [`FutureError::Abandoned`].
pub struct Completer<T: Send + 'static> {
  slot: Arc<FutureSlot<T>>,
  generation: u32,
}

impl<T: Send + 'static> Completer<T> {
  /// Completes the future with a value.
  ///
  /// # Errors
  ///
  /// Returns the value back inside [`DoubleCompletion`] if the future was
  /// already completed or failed, or if its slot has since been recycled.
  pub fn complete(&self, value: T) -> Result<(), DoubleCompletion<T>> {
    self.finish(Ok(value))
  }

  /// Completes the future with an error.
  ///
  /// # Errors
  ///
  /// Same as [`complete`](Self::complete).
  pub fn fail(&self, error: FutureError) -> Result<(), DoubleCompletion<T>> {
    self.finish(Err(error))
  }

  /// Returns `true` once any completer of this lease has completed it.
  pub fn is_completed(&self) -> bool {
    let state = self.slot.load();
    state.generation() != self.generation || state.is_claimed()
  }

  fn finish(&self, outcome: Result<T, FutureError>) -> Result<(), DoubleCompletion<T>> {
    if !self.slot.claim(self.generation) {
      self.slot.observer.double_completion();
      return Err(DoubleCompletion(outcome));
    }
    self.slot.publish(outcome);
    Ok(())
  }
}

impl<T: Send + 'static> Clone for Completer<T> {
  fn clone(&self) -> Self {
    let mut current = self.slot.load();
    // A clone of a recycled lease stays uncounted; its drop is a no-op.
    while current.generation() == self.generation {
      assert!(
        current.completers() < MAX_COMPLETERS,
        "too many completers for one future"
      );
      match self.slot.state.compare_exchange_weak(
        current.0,
        current.add_completer().0,
        Ordering::AcqRel,
        Ordering::Acquire,
      ) {
        Ok(_) => break,
        Err(actual) => current = State(actual),
      }
    }
    Completer {
      slot: Arc::clone(&self.slot),
      generation: self.generation,
    }
  }
}

impl<T: Send + 'static> Drop for Completer<T> {
  fn drop(&mut self) {
    let mut current = self.slot.load();
    loop {
      if current.generation() != self.generation {
        return;
      }
      let mut next = current.remove_completer();
      let abandon = next.completers() == 0 && !current.is_claimed();
      if abandon {
        next = next.with_flag(COMPLETING);
      }
      match self.slot.state.compare_exchange_weak(
        current.0,
        next.0,
        Ordering::AcqRel,
        Ordering::Acquire,
      ) {
        Ok(_) => {
          if abandon {
            self.slot.observer.future_abandoned();
            self.slot.publish(Err(FutureError::Abandoned));
          }
          return;
        }
        Err(actual) => current = State(actual),
      }
    }
  }
}

impl<T: Send + 'static> fmt::Debug for Completer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Completer")
      .field("generation", &self.generation)
      .field("completed", &self.is_completed())
      .finish()
  }
}

/// The consuming half of a leased future.
///
/// Either `.await` it, poll it with [`try_result`](Self::try_result), or hand the
/// outcome to a callback with [`register_continuation`](Self::register_continuation).
/// Dropping it unconsumed detaches it: the slot recycles as soon as a completer
/// finishes.
#[must_use = "futures do nothing unless you .await or poll them"]
pub struct RecyclableFuture<T: Send + 'static> {
  // `None` once the outcome has been consumed.
  slot: Option<Arc<FutureSlot<T>>>,
}

impl<T: Send + 'static> RecyclableFuture<T> {
  /// Returns `true` once the outcome is available (or already consumed).
  pub fn is_completed(&self) -> bool {
    match &self.slot {
      Some(slot) => slot.load().is_completed(),
      None => true,
    }
  }

  /// Takes the outcome without waiting.
  ///
  /// Returns `None` while the future is pending and after the outcome has
  /// already been taken. A failure is returned as the carried [`FutureError`].
  pub fn try_result(&mut self) -> Option<Result<T, FutureError>> {
    let outcome = self.slot.as_ref()?.take_completed()?;
    if let Some(slot) = self.slot.take() {
      slot.recycle();
    }
    Some(outcome)
  }

  /// Hands the outcome to `continuation` instead of awaiting it.
  ///
  /// If the future has already completed, the continuation runs on this thread
  /// before this call returns. Otherwise it runs on the completing thread, or on
  /// the slot's [`ContinuationSpawner`] when one is configured. Either way it runs
  /// exactly once and the slot recycles after it returns.
  ///
  /// # Panics
  ///
  /// Panics if the outcome was already taken.
  pub fn register_continuation<F>(mut self, continuation: F)
  where
    F: FnOnce(Result<T, FutureError>) + Send + 'static,
  {
    let slot = match self.slot.take() {
      Some(slot) => slot,
      None => panic!("continuation registered on a consumed future"),
    };
    unsafe {
      *slot.continuation.get() = Some(Box::new(continuation));
    }
    let prev = State(slot.state.fetch_or(CONTINUATION, Ordering::AcqRel));
    if prev.is_completed() {
      slot.run_continuation(true);
    }
  }
}

impl<T: Send + 'static> Future for RecyclableFuture<T> {
  type Output = Result<T, FutureError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    let slot = match &this.slot {
      Some(slot) => slot,
      None => panic!("RecyclableFuture polled after completion"),
    };

    if let Some(outcome) = slot.take_completed() {
      if let Some(slot) = this.slot.take() {
        slot.recycle();
      }
      return Poll::Ready(outcome);
    }

    slot.waker.register(cx.waker());

    // Critical re-check after registration
    if let Some(outcome) = slot.take_completed() {
      if let Some(slot) = this.slot.take() {
        slot.recycle();
      }
      return Poll::Ready(outcome);
    }
    Poll::Pending
  }
}

impl<T: Send + 'static> Drop for RecyclableFuture<T> {
  fn drop(&mut self) {
    if let Some(slot) = self.slot.take() {
      let prev = State(slot.state.fetch_or(DETACHED, Ordering::AcqRel));
      if prev.is_completed() {
        slot.recycle();
      }
    }
  }
}

impl<T: Send + 'static> fmt::Debug for RecyclableFuture<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RecyclableFuture")
      .field("completed", &self.is_completed())
      .field("consumed", &self.slot.is_none())
      .finish()
  }
}
