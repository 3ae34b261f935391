// src/observe.rs

//! Injected observability for the primitives in this crate.
//!
//! Every component takes an `Arc<dyn Observer>` at construction time. Nothing in
//! the crate records into process-wide state; if you want numbers, hand the
//! components a [`CountingObserver`] and read its [`snapshot`](CountingObserver::snapshot).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

/// Which side of a ring buffer stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingSide {
  /// The writer found the buffer full and had to wait for space.
  Writer,
  /// The reader found the buffer empty and had to wait for data.
  Reader,
}

impl fmt::Display for RingSide {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RingSide::Writer => write!(f, "writer"),
      RingSide::Reader => write!(f, "reader"),
    }
  }
}

/// Receives notable events from pools, futures, signals and ring buffers.
///
/// All methods default to doing nothing, so implementors only override what
/// they care about. Calls happen inline on the hot path and must not block.
pub trait Observer: Send + Sync + 'static {
  /// A borrow found every slot empty and fell back to the generator.
  fn pool_miss(&self, _pool: &str) {}
  /// A release found every slot occupied and dropped the item.
  fn pool_overflow(&self, _pool: &str) {}
  /// A completion was rejected because the future was already completed.
  fn double_completion(&self) {}
  /// The last completer of a future was dropped without completing it.
  fn future_abandoned(&self) {}
  /// A pending signal wait was cancelled before it was released.
  fn wait_cancelled(&self) {}
  /// One side of a ring buffer had to suspend.
  fn ring_stalled(&self, _side: RingSide) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Forwards events to `tracing`. This is the default observer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
  fn pool_miss(&self, pool: &str) {
    tracing::trace!(pool, "pool exhausted, allocating transient instance");
  }

  fn pool_overflow(&self, pool: &str) {
    tracing::trace!(pool, "pool full, dropping released instance");
  }

  fn double_completion(&self) {
    tracing::warn!("recyclable future completed more than once; extra completion rejected");
  }

  fn future_abandoned(&self) {
    tracing::debug!("recyclable future abandoned by all completers");
  }

  fn wait_cancelled(&self) {
    tracing::trace!("signal wait cancelled");
  }

  fn ring_stalled(&self, side: RingSide) {
    tracing::trace!(%side, "ring buffer stalled");
  }
}

/// Returns the observer used when none is configured.
pub(crate) fn default_observer() -> Arc<dyn Observer> {
  Arc::new(TracingObserver)
}

/// Counts events in cache-padded atomics.
#[derive(Debug, Default)]
pub struct CountingObserver {
  pool_misses: CachePadded<AtomicU64>,
  pool_overflows: CachePadded<AtomicU64>,
  double_completions: CachePadded<AtomicU64>,
  futures_abandoned: CachePadded<AtomicU64>,
  waits_cancelled: CachePadded<AtomicU64>,
  writer_stalls: CachePadded<AtomicU64>,
  reader_stalls: CachePadded<AtomicU64>,
}

impl CountingObserver {
  /// Creates a new counting observer with every counter at zero.
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the counters.
  pub fn snapshot(&self) -> ObserverSnapshot {
    ObserverSnapshot {
      pool_misses: self.pool_misses.load(Ordering::Relaxed),
      pool_overflows: self.pool_overflows.load(Ordering::Relaxed),
      double_completions: self.double_completions.load(Ordering::Relaxed),
      futures_abandoned: self.futures_abandoned.load(Ordering::Relaxed),
      waits_cancelled: self.waits_cancelled.load(Ordering::Relaxed),
      writer_stalls: self.writer_stalls.load(Ordering::Relaxed),
      reader_stalls: self.reader_stalls.load(Ordering::Relaxed),
    }
  }
}

impl Observer for CountingObserver {
  fn pool_miss(&self, _pool: &str) {
    self.pool_misses.fetch_add(1, Ordering::Relaxed);
  }

  fn pool_overflow(&self, _pool: &str) {
    self.pool_overflows.fetch_add(1, Ordering::Relaxed);
  }

  fn double_completion(&self) {
    self.double_completions.fetch_add(1, Ordering::Relaxed);
  }

  fn future_abandoned(&self) {
    self.futures_abandoned.fetch_add(1, Ordering::Relaxed);
  }

  fn wait_cancelled(&self) {
    self.waits_cancelled.fetch_add(1, Ordering::Relaxed);
  }

  fn ring_stalled(&self, side: RingSide) {
    match side {
      RingSide::Writer => self.writer_stalls.fetch_add(1, Ordering::Relaxed),
      RingSide::Reader => self.reader_stalls.fetch_add(1, Ordering::Relaxed),
    };
  }
}

/// A point-in-time view of a [`CountingObserver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverSnapshot {
  /// Borrows that fell back to the generator.
  pub pool_misses: u64,
  /// Releases that dropped their item because the pool was full.
  pub pool_overflows: u64,
  /// Completions rejected because the future was already completed.
  pub double_completions: u64,
  /// Futures failed because every completer was dropped.
  pub futures_abandoned: u64,
  /// Signal waits withdrawn by cancellation.
  pub waits_cancelled: u64,
  /// Times a ring writer suspended on a full buffer.
  pub writer_stalls: u64,
  /// Times a ring reader suspended on an empty buffer.
  pub reader_stalls: u64,
}
