// src/pool/builder.rs

use super::{Generator, Pool, Poolable};
use crate::error::BuildError;
use crate::observe::{default_observer, Observer};

use std::fmt;
use std::sync::Arc;

/// Plain pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
  /// Number of slots.
  pub capacity: usize,
  /// Fill every slot from the generator at construction.
  pub pre_initialize: bool,
  /// Skip `Poolable::reset` on release.
  pub ignore_dispose: bool,
}

impl Default for PoolConfig {
  fn default() -> Self {
    PoolConfig {
      capacity: 64,
      pre_initialize: false,
      ignore_dispose: false,
    }
  }
}

/// A builder for [`Pool`].
pub struct PoolBuilder<T> {
  config: PoolConfig,
  generator: Generator<T>,
  label: Option<Arc<str>>,
  observer: Option<Arc<dyn Observer>>,
}

impl<T> fmt::Debug for PoolBuilder<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PoolBuilder")
      .field("config", &self.config)
      .field("label", &self.label)
      .field("has_observer", &self.observer.is_some())
      .finish_non_exhaustive()
  }
}

impl<T: Poolable> PoolBuilder<T> {
  pub(crate) fn new<F>(generator: F) -> Self
  where
    F: Fn() -> T + Send + Sync + 'static,
  {
    PoolBuilder {
      config: PoolConfig::default(),
      generator: Box::new(generator),
      label: None,
      observer: None,
    }
  }

  /// Replaces the whole configuration.
  pub fn config(mut self, config: PoolConfig) -> Self {
    self.config = config;
    self
  }

  /// Sets the number of slots.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.config.capacity = capacity;
    self
  }

  /// Fills every slot at construction instead of on first release.
  pub fn pre_initialize(mut self, yes: bool) -> Self {
    self.config.pre_initialize = yes;
    self
  }

  /// Skips `Poolable::reset` when items are released.
  pub fn ignore_dispose(mut self, yes: bool) -> Self {
    self.config.ignore_dispose = yes;
    self
  }

  /// Names the pool in observer events.
  pub fn label(mut self, label: impl Into<Arc<str>>) -> Self {
    self.label = Some(label.into());
    self
  }

  /// Sets the observer that receives miss/overflow events.
  pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
    self.observer = Some(observer);
    self
  }

  /// Builds the pool.
  ///
  /// # Errors
  ///
  /// Returns [`BuildError::ZeroCapacity`] if the capacity is zero.
  pub fn build(self) -> Result<Pool<T>, BuildError> {
    let label = self
      .label
      .unwrap_or_else(|| Arc::from(std::any::type_name::<T>()));
    let observer = self.observer.unwrap_or_else(default_observer);
    Pool::from_parts(self.config, self.generator, label, observer)
  }
}
