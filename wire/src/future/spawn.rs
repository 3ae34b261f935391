// src/future/spawn.rs

use parking_lot::Mutex;

use std::sync::Arc;
use std::thread;

/// A continuation packaged to run somewhere else.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Moves continuations off the completing thread.
///
/// A completer usually runs on the connection's read path; configuring a spawner
/// keeps slow continuations from stalling it. The slot is recycled inside the
/// job, after the continuation returns.
pub trait ContinuationSpawner: Send + Sync + 'static {
  /// Runs `job` on another execution unit.
  fn spawn(&self, job: Job);
}

/// Runs each job on a fresh OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl ContinuationSpawner for ThreadSpawner {
  fn spawn(&self, job: Job) {
    let pending = Arc::new(Mutex::new(Some(job)));
    let remote = Arc::clone(&pending);
    let spawned = thread::Builder::new()
      .name("fibre-wire-continuation".into())
      .spawn(move || {
        let job = remote.lock().take();
        if let Some(job) = job {
          job();
        }
      });
    if let Err(e) = spawned {
      // The closure was dropped unrun; never lose a continuation.
      tracing::warn!(error = %e, "failed to spawn continuation thread, running inline");
      let job = pending.lock().take();
      if let Some(job) = job {
        job();
      }
    }
  }
}

/// Runs each job as a task on a Tokio runtime.
#[cfg(feature = "tokio")]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Creates a spawner that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Creates a spawner bound to an explicit runtime handle.
  pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl ContinuationSpawner for TokioSpawner {
  fn spawn(&self, job: Job) {
    self.0.spawn(async move { job() });
  }
}

#[cfg(feature = "tokio")]
impl std::fmt::Debug for TokioSpawner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("TokioSpawner").finish()
  }
}

/// Runs each job immediately on the completing thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineSpawner;

impl ContinuationSpawner for InlineSpawner {
  fn spawn(&self, job: Job) {
    job();
  }
}
