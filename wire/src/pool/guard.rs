// src/pool/guard.rs

use super::{Pool, Poolable};

use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

/// A borrowed instance that goes back to its pool when dropped.
pub struct Pooled<'a, T: Poolable> {
  pool: &'a Pool<T>,
  item: ManuallyDrop<T>,
}

impl<'a, T: Poolable> Pooled<'a, T> {
  pub(super) fn new(pool: &'a Pool<T>, item: T) -> Self {
    Pooled {
      pool,
      item: ManuallyDrop::new(item),
    }
  }

  /// Keeps the instance instead of returning it to the pool.
  pub fn detach(self) -> T {
    let mut this = ManuallyDrop::new(self);
    // `this` is never dropped, so the item is taken exactly once.
    unsafe { ManuallyDrop::take(&mut this.item) }
  }
}

impl<T: Poolable> Deref for Pooled<'_, T> {
  type Target = T;

  fn deref(&self) -> &T {
    &self.item
  }
}

impl<T: Poolable> DerefMut for Pooled<'_, T> {
  fn deref_mut(&mut self) -> &mut T {
    &mut self.item
  }
}

impl<T: Poolable + fmt::Debug> fmt::Debug for Pooled<'_, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Pooled").field(&*self.item).finish()
  }
}

impl<T: Poolable> Drop for Pooled<'_, T> {
  fn drop(&mut self) {
    let item = unsafe { ManuallyDrop::take(&mut self.item) };
    self.pool.release(item);
  }
}
