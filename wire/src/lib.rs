// src/lib.rs
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! Low-allocation concurrency primitives for wire-protocol clients.
//!
//! A socket-reading loop hands bytes to a frame decoder and completes requests
//! for many async callers. Doing that without a heap allocation or a kernel
//! wait per message takes a small set of cooperating pieces:
//!
//! - **[`pool`]**: a fixed array of lock-free slots that recycles short-lived
//!   values and falls back to fresh allocation when exhausted.
//! - **[`future`]**: a single-assignment future whose slot goes back to a pool
//!   once it has been completed and consumed, with a generation check that
//!   turns stale handles into no-ops.
//! - **[`signal`]**: three auto-reset signals (queue-based FIFO, dual-counter
//!   CAS, bit-packed word) behind one trait, with cancellable async waits.
//! - **[`ring`]**: a single-writer, single-reader byte ring with backpressure,
//!   in blocking and async flavors.
//! - **[`observe`]**: an injected [`Observer`] that sees pool misses, dropped
//!   completions, cancelled waits and ring stalls.
//!
//! # Features
//! - `serde`: derives `Serialize`/`Deserialize` for [`PoolConfig`] and [`RingConfig`].
//! - `tokio`: adds [`future::TokioSpawner`] for running continuations on a runtime.

pub mod error;
pub mod future;
pub mod observe;
pub mod pool;
pub mod ring;
pub mod signal;

// Re-export the primary user-facing types for convenience
pub use error::{BuildError, DoubleCompletion, FutureError, ReadTimeoutError, RingClosed, WaitError};
pub use future::{Completer, FuturePool, RecyclableFuture};
pub use observe::{CountingObserver, NoopObserver, Observer, ObserverSnapshot, RingSide, TracingObserver};
pub use pool::{Pool, PoolBuilder, PoolConfig, Poolable, Pooled};
pub use ring::{RingBuilder, RingConfig};
pub use signal::{wait_or_cancel, AutoResetSignal, QueueSignal, SlimSignal, SpinSignal};
