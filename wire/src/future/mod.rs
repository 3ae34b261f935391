// src/future/mod.rs

//! Recyclable, single-assignment futures.
//!
//! A [`FutureSlot`] is leased as a ([`Completer`], [`RecyclableFuture`]) pair. The
//! completer side resolves it exactly once; the future side either awaits the
//! outcome or registers a continuation for it. Once the outcome has been consumed
//! the slot recycles itself, typically back into a [`FuturePool`], so steady-state
//! request/response correlation allocates nothing.
//!
//! Exactly-once is enforced with a single atomic state word: competing completions
//! lose a compare-and-swap and get their outcome back as a
//! [`DoubleCompletion`](crate::error::DoubleCompletion); the continuation runs on
//! whichever side (completion or registration) finishes second.

mod pool;
mod slot;
mod spawn;
mod state;


pub use pool::{FuturePool, FuturePoolBuilder};
pub use slot::{Completer, FutureSlot, RecyclableFuture};
#[cfg(feature = "tokio")]
pub use spawn::TokioSpawner;
pub use spawn::{ContinuationSpawner, InlineSpawner, Job, ThreadSpawner};

/// Creates an unpooled completer/future pair.
pub fn pair<T: Send + 'static>() -> (Completer<T>, RecyclableFuture<T>) {
  FutureSlot::new().lease()
}
