// src/future/pool.rs

use super::slot::{Completer, FutureSlot, RecyclableFuture, Recycler};
use super::spawn::ContinuationSpawner;
use crate::error::BuildError;
use crate::observe::{default_observer, Observer};
use crate::pool::{Pool, PoolConfig};

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

type SlotPool<T> = Pool<Arc<FutureSlot<T>>>;

/// A pool of [`FutureSlot`]s that return to it on their own.
///
/// Every slot is created with a recycler pointing back at the pool, so after a
/// leased future has been consumed the slot is parked again without the caller
/// doing anything. Cloning the pool is cheap and shares the slots.
///
/// ```
/// # futures_util::FutureExt::now_or_never(async {
/// use fibre_wire::future::FuturePool;
///
/// let pool = FuturePool::<u32>::new(16);
/// let (completer, reply) = pool.rent();
/// completer.complete(200).unwrap();
/// assert_eq!(reply.await.unwrap(), 200);
/// assert_eq!(pool.available(), 1);
/// # });
/// ```
pub struct FuturePool<T: Send + 'static> {
  slots: Arc<SlotPool<T>>,
}

impl<T: Send + 'static> FuturePool<T> {
  /// Creates a lazily filled pool.
  ///
  /// # Panics
  ///
  /// Panics if `capacity` is zero.
  pub fn new(capacity: usize) -> Self {
    assert!(capacity > 0, "future pool capacity must be greater than 0");
    Self::assemble(
      PoolConfig {
        capacity,
        ..PoolConfig::default()
      },
      None,
      default_observer(),
      Arc::from("future-slots"),
    )
  }

  /// Starts building a pool.
  pub fn builder() -> FuturePoolBuilder<T> {
    FuturePoolBuilder::new()
  }

  fn assemble(
    config: PoolConfig,
    spawner: Option<Arc<dyn ContinuationSpawner>>,
    observer: Arc<dyn Observer>,
    label: Arc<str>,
  ) -> Self {
    let config = PoolConfig {
      ignore_dispose: true,
      ..config
    };
    let slots = Arc::new_cyclic(|weak: &Weak<SlotPool<T>>| {
      let home = weak.clone();
      let recycler: Recycler<T> = Arc::new(move |slot| {
        // Once the pool is gone the slot is simply dropped.
        if let Some(pool) = home.upgrade() {
          pool.release(slot);
        }
      });
      let slot_observer = Arc::clone(&observer);
      let generator = move || {
        Arc::new(FutureSlot::from_parts(
          Some(Arc::clone(&recycler)),
          spawner.clone(),
          Arc::clone(&slot_observer),
        ))
      };
      Pool::assemble(config, Box::new(generator), label, observer)
    });
    FuturePool { slots }
  }

  /// Leases a future from the pool, creating a transient slot if it is empty.
  pub fn rent(&self) -> (Completer<T>, RecyclableFuture<T>) {
    self.slots.borrow().lease()
  }

  /// The number of slots.
  pub fn capacity(&self) -> usize {
    self.slots.capacity()
  }

  /// Slots currently parked and ready to lease.
  pub fn available(&self) -> usize {
    self.slots.available()
  }
}

impl<T: Send + 'static> Clone for FuturePool<T> {
  fn clone(&self) -> Self {
    FuturePool {
      slots: Arc::clone(&self.slots),
    }
  }
}

impl<T: Send + 'static> fmt::Debug for FuturePool<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FuturePool")
      .field("slots", &self.slots)
      .finish()
  }
}

/// A builder for [`FuturePool`].
pub struct FuturePoolBuilder<T> {
  capacity: usize,
  pre_initialize: bool,
  label: Option<Arc<str>>,
  spawner: Option<Arc<dyn ContinuationSpawner>>,
  observer: Option<Arc<dyn Observer>>,
  _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for FuturePoolBuilder<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FuturePoolBuilder")
      .field("capacity", &self.capacity)
      .field("pre_initialize", &self.pre_initialize)
      .field("label", &self.label)
      .field("deferred", &self.spawner.is_some())
      .finish_non_exhaustive()
  }
}

impl<T: Send + 'static> FuturePoolBuilder<T> {
  fn new() -> Self {
    FuturePoolBuilder {
      capacity: PoolConfig::default().capacity,
      pre_initialize: false,
      label: None,
      spawner: None,
      observer: None,
      _marker: PhantomData,
    }
  }

  /// Sets the number of slots.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity;
    self
  }

  /// Creates every slot up front.
  pub fn pre_initialize(mut self, yes: bool) -> Self {
    self.pre_initialize = yes;
    self
  }

  /// Names the pool in observer events.
  pub fn label(mut self, label: impl Into<Arc<str>>) -> Self {
    self.label = Some(label.into());
    self
  }

  /// Runs continuations registered on pending futures through `spawner`
  /// instead of on the completing thread.
  pub fn spawner(mut self, spawner: Arc<dyn ContinuationSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// Sets the observer shared by the pool and its slots.
  pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
    self.observer = Some(observer);
    self
  }

  /// Builds the pool.
  ///
  /// # Errors
  ///
  /// Returns [`BuildError::ZeroCapacity`] if the capacity is zero.
  pub fn build(self) -> Result<FuturePool<T>, BuildError> {
    if self.capacity == 0 {
      return Err(BuildError::ZeroCapacity);
    }
    let config = PoolConfig {
      capacity: self.capacity,
      pre_initialize: self.pre_initialize,
      ignore_dispose: true,
    };
    Ok(FuturePool::assemble(
      config,
      self.spawner,
      self.observer.unwrap_or_else(default_observer),
      self.label.unwrap_or_else(|| Arc::from("future-slots")),
    ))
  }
}
