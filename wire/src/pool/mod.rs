// src/pool/mod.rs

//! Fixed-capacity, lock-free object pools.
//!
//! A [`Pool`] is an array of slots. Each slot is a tiny state machine driven by a
//! single compare-and-swap per transition, so any number of threads may borrow
//! and release concurrently without a global lock:
//!
//! ```text
//!   borrow:  FULL  --CAS--> BUSY --(move item out)--> EMPTY
//!   release: EMPTY --CAS--> BUSY --(move item in)---> FULL
//! ```
//!
//! A slot in `BUSY` is skipped, never waited on. When no slot is `FULL`, `borrow`
//! falls back to the generator and hands out a transient instance. When no slot is
//! `EMPTY`, `release` drops the item. Neither path blocks.
//!
//! Size a pool to the expected number of concurrently outstanding items, not to
//! throughput: both operations scan linearly in the worst case.
//!
//! # Example
//!
//! ```
//! use fibre_wire::pool::Pool;
//!
//! let pool: Pool<Vec<u8>> = Pool::builder(|| Vec::with_capacity(512))
//!   .capacity(8)
//!   .pre_initialize(true)
//!   .build()
//!   .unwrap();
//!
//! let mut frame = pool.borrow();
//! frame.extend_from_slice(b"basic.publish");
//! pool.release(frame); // cleared by `Poolable::reset`, then parked in a slot
//!
//! let frame = pool.borrow();
//! assert!(frame.is_empty());
//! assert!(frame.capacity() >= 512);
//! ```

mod builder;
mod guard;

pub use builder::{PoolBuilder, PoolConfig};
pub use guard::Pooled;

use crate::error::BuildError;
use crate::observe::Observer;

use crossbeam_utils::CachePadded;

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

// Slot states.
const SLOT_EMPTY: u8 = 0;
const SLOT_BUSY: u8 = 1;
const SLOT_FULL: u8 = 2;

/// Opt-in lifecycle hooks for pooled types.
///
/// Both hooks default to doing nothing; a type that needs neither can implement
/// the trait with an empty body.
pub trait Poolable {
  /// Called on every borrow, including transient instances from the generator.
  #[inline]
  fn on_borrow(&mut self) {}

  /// Called on release before the item is parked in a slot, unless the pool was
  /// built with `ignore_dispose`. Called even if the item ends up dropped.
  #[inline]
  fn reset(&mut self) {}
}

impl<T> Poolable for Vec<T> {
  #[inline]
  fn reset(&mut self) {
    self.clear();
  }
}

impl<T> Poolable for VecDeque<T> {
  #[inline]
  fn reset(&mut self) {
    self.clear();
  }
}

impl Poolable for String {
  #[inline]
  fn reset(&mut self) {
    self.clear();
  }
}

impl<T: Poolable + ?Sized> Poolable for Box<T> {
  #[inline]
  fn on_borrow(&mut self) {
    (**self).on_borrow();
  }

  #[inline]
  fn reset(&mut self) {
    (**self).reset();
  }
}

struct Slot<T> {
  state: AtomicU8,
  value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
  fn empty() -> Self {
    Slot {
      state: AtomicU8::new(SLOT_EMPTY),
      value: UnsafeCell::new(MaybeUninit::uninit()),
    }
  }

  /// Claims a FULL slot and moves its item out.
  #[inline]
  fn try_take(&self) -> Option<T> {
    if self.state.load(Ordering::Relaxed) != SLOT_FULL {
      return None;
    }
    if self
      .state
      .compare_exchange(SLOT_FULL, SLOT_BUSY, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      return None;
    }
    // We own the slot while it is BUSY.
    let item = unsafe { (*self.value.get()).assume_init_read() };
    self.state.store(SLOT_EMPTY, Ordering::Release);
    Some(item)
  }

  /// Claims an EMPTY slot and moves `item` in, handing it back on failure.
  #[inline]
  fn try_put(&self, item: T) -> Result<(), T> {
    if self.state.load(Ordering::Relaxed) != SLOT_EMPTY {
      return Err(item);
    }
    if self
      .state
      .compare_exchange(SLOT_EMPTY, SLOT_BUSY, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      return Err(item);
    }
    unsafe {
      (*self.value.get()).write(item);
    }
    self.state.store(SLOT_FULL, Ordering::Release);
    Ok(())
  }
}

pub(crate) type Generator<T> = Box<dyn Fn() -> T + Send + Sync>;

/// A fixed-capacity pool that lends and reclaims instances of `T`.
///
/// See the [module documentation](self) for the slot protocol.
pub struct Pool<T: Poolable> {
  slots: Box<[CachePadded<Slot<T>>]>,
  generator: Generator<T>,
  ignore_dispose: bool,
  label: Arc<str>,
  observer: Arc<dyn Observer>,
}

// Items move between threads through the slots; the slot protocol gives each
// slot a single owner at a time.
unsafe impl<T: Poolable + Send> Send for Pool<T> {}
unsafe impl<T: Poolable + Send> Sync for Pool<T> {}

impl<T: Poolable> fmt::Debug for Pool<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pool")
      .field("label", &self.label)
      .field("capacity", &self.capacity())
      .field("available", &self.available())
      .field("ignore_dispose", &self.ignore_dispose)
      .finish_non_exhaustive()
  }
}

impl<T: Poolable> Pool<T> {
  /// Starts building a pool whose instances come from `generator`.
  pub fn builder<F>(generator: F) -> PoolBuilder<T>
  where
    F: Fn() -> T + Send + Sync + 'static,
  {
    PoolBuilder::new(generator)
  }

  /// Creates a lazily filled pool with the given capacity.
  ///
  /// # Panics
  ///
  /// Panics if `capacity` is zero.
  pub fn new<F>(capacity: usize, generator: F) -> Self
  where
    F: Fn() -> T + Send + Sync + 'static,
  {
    let config = PoolConfig {
      capacity,
      ..PoolConfig::default()
    };
    Self::assemble(
      config,
      Box::new(generator),
      Arc::from(std::any::type_name::<T>()),
      crate::observe::default_observer(),
    )
  }

  pub(crate) fn from_parts(
    config: PoolConfig,
    generator: Generator<T>,
    label: Arc<str>,
    observer: Arc<dyn Observer>,
  ) -> Result<Self, BuildError> {
    if config.capacity == 0 {
      return Err(BuildError::ZeroCapacity);
    }
    Ok(Self::assemble(config, generator, label, observer))
  }

  /// Infallible constructor for callers that validated the capacity.
  pub(crate) fn assemble(
    config: PoolConfig,
    generator: Generator<T>,
    label: Arc<str>,
    observer: Arc<dyn Observer>,
  ) -> Self {
    assert!(config.capacity > 0, "pool capacity must be greater than 0");
    let slots: Box<[CachePadded<Slot<T>>]> = (0..config.capacity)
      .map(|_| CachePadded::new(Slot::empty()))
      .collect();
    let pool = Pool {
      slots,
      generator,
      ignore_dispose: config.ignore_dispose,
      label,
      observer,
    };
    if config.pre_initialize {
      for slot in pool.slots.iter() {
        // Fresh from the generator, so no reset is needed.
        let parked = slot.try_put((pool.generator)());
        debug_assert!(parked.is_ok(), "slot occupied during pre-initialization");
      }
    }
    pool
  }

  /// Lends an instance, taking a pooled one if any slot holds one and
  /// generating a transient one otherwise.
  pub fn borrow(&self) -> T {
    let mut item = match self.slots.iter().find_map(|slot| slot.try_take()) {
      Some(item) => item,
      None => {
        self.observer.pool_miss(&self.label);
        (self.generator)()
      }
    };
    item.on_borrow();
    item
  }

  /// Lends an instance wrapped in a guard that releases it on drop.
  pub fn borrow_scoped(&self) -> Pooled<'_, T> {
    Pooled::new(self, self.borrow())
  }

  /// Takes an instance back. The item is reset (unless the pool ignores
  /// disposal) and parked in the first empty slot; if every slot is occupied
  /// it is dropped.
  pub fn release(&self, mut item: T) {
    if !self.ignore_dispose {
      item.reset();
    }
    for slot in self.slots.iter() {
      match slot.try_put(item) {
        Ok(()) => return,
        Err(returned) => item = returned,
      }
    }
    self.observer.pool_overflow(&self.label);
    drop(item);
  }

  /// The number of slots.
  #[inline]
  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  /// The number of slots currently holding an instance. Only a hint while other
  /// threads are borrowing or releasing.
  pub fn available(&self) -> usize {
    self
      .slots
      .iter()
      .filter(|slot| slot.state.load(Ordering::Relaxed) == SLOT_FULL)
      .count()
  }

  /// The label this pool reports to its observer.
  pub fn label(&self) -> &str {
    &self.label
  }
}

impl<T: Poolable> Drop for Pool<T> {
  fn drop(&mut self) {
    for slot in self.slots.iter_mut() {
      if *slot.state.get_mut() == SLOT_FULL {
        unsafe { slot.value.get_mut().assume_init_drop() };
        *slot.state.get_mut() = SLOT_EMPTY;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::observe::CountingObserver;

  use std::sync::atomic::AtomicUsize;
  use std::thread;

  #[derive(Debug, Default)]
  struct Props {
    id: usize,
    headers: Vec<(String, String)>,
    borrowed: usize,
  }

  impl Poolable for Props {
    fn on_borrow(&mut self) {
      self.borrowed += 1;
    }

    fn reset(&mut self) {
      self.headers.clear();
    }
  }

  fn counting_pool(capacity: usize, pre_initialize: bool) -> (Pool<Props>, Arc<AtomicUsize>, Arc<CountingObserver>) {
    let created = Arc::new(AtomicUsize::new(0));
    let created_clone = created.clone();
    let observer = Arc::new(CountingObserver::new());
    let pool = Pool::builder(move || Props {
      id: created_clone.fetch_add(1, Ordering::Relaxed),
      ..Props::default()
    })
    .capacity(capacity)
    .pre_initialize(pre_initialize)
    .observer(observer.clone())
    .build()
    .unwrap();
    (pool, created, observer)
  }

  #[test]
  fn zero_capacity_is_rejected() {
    let res = Pool::builder(Vec::<u8>::new).capacity(0).build();
    assert_eq!(res.unwrap_err(), BuildError::ZeroCapacity);
  }

  #[test]
  #[should_panic]
  fn new_with_zero_capacity_panics() {
    let _ = Pool::new(0, String::new);
  }

  #[test]
  fn pre_initialize_fills_every_slot() {
    let (pool, created, _) = counting_pool(4, true);
    assert_eq!(created.load(Ordering::Relaxed), 4);
    assert_eq!(pool.available(), 4);
  }

  #[test]
  fn lazy_pool_generates_then_reuses() {
    let (pool, created, observer) = counting_pool(2, false);
    assert_eq!(pool.available(), 0);

    let a = pool.borrow();
    assert_eq!(created.load(Ordering::Relaxed), 1);
    assert_eq!(observer.snapshot().pool_misses, 1);
    let id = a.id;
    pool.release(a);
    assert_eq!(pool.available(), 1);

    let again = pool.borrow();
    assert_eq!(again.id, id);
    assert_eq!(again.borrowed, 2);
    assert_eq!(created.load(Ordering::Relaxed), 1);
  }

  #[test]
  fn release_resets_item() {
    let (pool, _, _) = counting_pool(1, false);
    let mut item = pool.borrow();
    item.headers.push(("x-trace".into(), "1".into()));
    pool.release(item);
    assert!(pool.borrow().headers.is_empty());
  }

  #[test]
  fn ignore_dispose_skips_reset() {
    let pool = Pool::builder(Props::default)
      .capacity(1)
      .ignore_dispose(true)
      .build()
      .unwrap();
    let mut item = pool.borrow();
    item.headers.push(("k".into(), "v".into()));
    pool.release(item);
    assert_eq!(pool.borrow().headers.len(), 1);
  }

  #[test]
  fn exhaustion_allocates_transient_and_overflow_drops() {
    let (pool, created, observer) = counting_pool(2, true);
    let a = pool.borrow();
    let b = pool.borrow();
    let c = pool.borrow(); // transient
    assert_eq!(created.load(Ordering::Relaxed), 3);

    pool.release(a);
    pool.release(b);
    pool.release(c); // no room
    let snap = observer.snapshot();
    assert_eq!(snap.pool_misses, 1);
    assert_eq!(snap.pool_overflows, 1);
    assert_eq!(pool.available(), 2);
  }

  #[test]
  fn dropping_pool_drops_parked_items() {
    let drops = Arc::new(AtomicUsize::new(0));
    struct Tracked(Arc<AtomicUsize>);
    impl Poolable for Tracked {}
    impl Drop for Tracked {
      fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::Relaxed);
      }
    }
    let drops_clone = drops.clone();
    let pool = Pool::builder(move || Tracked(drops_clone.clone()))
      .capacity(3)
      .pre_initialize(true)
      .build()
      .unwrap();
    let held = pool.borrow();
    drop(pool);
    assert_eq!(drops.load(Ordering::Relaxed), 2);
    drop(held);
    assert_eq!(drops.load(Ordering::Relaxed), 3);
  }

  #[test]
  fn concurrent_borrow_release_never_aliases() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 10_000;
    let (pool, _, _) = counting_pool(4, true);
    let pool = Arc::new(pool);
    let in_use: Arc<Vec<AtomicUsize>> = Arc::new((0..THREADS * 2 + 4).map(|_| AtomicUsize::new(0)).collect());

    let handles: Vec<_> = (0..THREADS)
      .map(|_| {
        let pool = pool.clone();
        let in_use = in_use.clone();
        thread::spawn(move || {
          for _ in 0..ROUNDS {
            let item = pool.borrow();
            if let Some(flag) = in_use.get(item.id) {
              assert_eq!(flag.swap(1, Ordering::AcqRel), 0, "item {} lent twice", item.id);
              flag.store(0, Ordering::Release);
            }
            pool.release(item);
          }
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    assert!(pool.available() <= pool.capacity());
  }
}
