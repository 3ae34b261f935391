// src/ring/mod.rs

//! A single-writer, single-reader byte ring buffer.
//!
//! The ring decouples a socket-reading loop from a frame decoder. A full
//! buffer stalls the writer and an empty one stalls the reader, so the
//! transport is throttled by how fast frames are consumed.
//!
//! Each side is a separate handle that is neither `Clone` nor `Sync`, and
//! every operation takes `&mut self`, so a second concurrent writer or reader
//! cannot be expressed. Both halves come in a blocking and an async flavor
//! over the same core; `to_async` / `to_sync` convert between them.
//!
//! Reads copy up to `min(buf.len(), available)` bytes, crossing the wrap point
//! in one call. Callers that need an exact count must loop, as with
//! [`std::io::Read`].
//!
//! # Closing
//!
//! - Dropping the writer lets the reader drain what was committed; after that
//!   `read` returns `0`.
//! - Dropping the reader makes further writes fail with
//!   [`RingClosed`](crate::RingClosed).
//!
//! # Examples
//!
//! ```
//! use fibre_wire::ring;
//!
//! let (mut writer, mut reader) = ring::bounded_sync(16);
//!
//! writer.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
//! let mut buf = [0u8; 20];
//! assert_eq!(reader.read(&mut buf), 10);
//! assert_eq!(&buf[..10], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
//!
//! // Crosses the end of the 16-byte storage.
//! writer.write(&[11, 12, 13, 14, 15, 16, 17, 18, 19, 20]).unwrap();
//! assert_eq!(reader.read(&mut buf[..10]), 10);
//! assert_eq!(&buf[..10], &[11, 12, 13, 14, 15, 16, 17, 18, 19, 20]);
//! ```
//!
//! ### Async
//!
//! ```
//! use fibre_wire::ring;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (mut writer, mut reader) = ring::bounded_async(4);
//!
//! let pump = tokio::spawn(async move {
//!   writer.write(b"more than four bytes").await.unwrap();
//! });
//!
//! let mut out = Vec::new();
//! let mut buf = [0u8; 3];
//! loop {
//!   let n = reader.read(&mut buf).await;
//!   if n == 0 {
//!     break;
//!   }
//!   out.extend_from_slice(&buf[..n]);
//! }
//! pump.await.unwrap();
//! assert_eq!(out, b"more than four bytes");
//! # }
//! ```

mod async_impl;
mod shared;
mod sync_impl;

pub use async_impl::{AsyncRingReader, AsyncRingWriter, RingRead, RingWrite};
pub use sync_impl::{SyncRingReader, SyncRingWriter};

use crate::error::BuildError;
use crate::observe::{default_observer, Observer};
use shared::RingShared;

use std::fmt;
use std::sync::Arc;

/// Creates a blocking ring with room for `capacity` bytes.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn bounded_sync(capacity: usize) -> (SyncRingWriter, SyncRingReader) {
  let shared = Arc::new(RingShared::new(capacity, default_observer()));
  (
    SyncRingWriter::from_shared(shared.clone()),
    SyncRingReader::from_shared(shared),
  )
}

/// Creates an async ring with room for `capacity` bytes.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn bounded_async(capacity: usize) -> (AsyncRingWriter, AsyncRingReader) {
  let (writer, reader) = bounded_sync(capacity);
  (writer.to_async(), reader.to_async())
}

/// Plain ring configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RingConfig {
  /// Size of the backing storage in bytes.
  pub capacity: usize,
}

impl Default for RingConfig {
  fn default() -> Self {
    RingConfig { capacity: 64 * 1024 }
  }
}

/// A builder for rings that need a non-default observer.
#[derive(Default)]
pub struct RingBuilder {
  config: RingConfig,
  observer: Option<Arc<dyn Observer>>,
}

impl fmt::Debug for RingBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RingBuilder")
      .field("config", &self.config)
      .field("has_observer", &self.observer.is_some())
      .finish()
  }
}

impl RingBuilder {
  /// Starts from [`RingConfig::default`].
  pub fn new() -> Self {
    Self::default()
  }

  /// Replaces the whole configuration.
  pub fn config(mut self, config: RingConfig) -> Self {
    self.config = config;
    self
  }

  /// Sets the buffer size in bytes.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.config.capacity = capacity;
    self
  }

  /// Sets the observer that receives stall and cancellation events.
  pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
    self.observer = Some(observer);
    self
  }

  /// Builds a blocking writer/reader pair.
  ///
  /// # Errors
  ///
  /// Returns [`BuildError::ZeroCapacity`] if the capacity is zero.
  pub fn build_sync(self) -> Result<(SyncRingWriter, SyncRingReader), BuildError> {
    let shared = Arc::new(self.shared()?);
    Ok((
      SyncRingWriter::from_shared(shared.clone()),
      SyncRingReader::from_shared(shared),
    ))
  }

  /// Builds an async writer/reader pair.
  ///
  /// # Errors
  ///
  /// Returns [`BuildError::ZeroCapacity`] if the capacity is zero.
  pub fn build_async(self) -> Result<(AsyncRingWriter, AsyncRingReader), BuildError> {
    let shared = Arc::new(self.shared()?);
    Ok((
      AsyncRingWriter::from_shared(shared.clone()),
      AsyncRingReader::from_shared(shared),
    ))
  }

  fn shared(self) -> Result<RingShared, BuildError> {
    if self.config.capacity == 0 {
      return Err(BuildError::ZeroCapacity);
    }
    let observer = self.observer.unwrap_or_else(default_observer);
    Ok(RingShared::new(self.config.capacity, observer))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ReadTimeoutError;
  use crate::observe::CountingObserver;

  use futures_util::FutureExt;
  use std::thread;
  use std::time::Duration;

  #[test]
  fn builder_rejects_zero_capacity() {
    assert!(matches!(
      RingBuilder::new().capacity(0).build_sync(),
      Err(BuildError::ZeroCapacity)
    ));
    assert!(matches!(
      RingBuilder::new().capacity(0).build_async(),
      Err(BuildError::ZeroCapacity)
    ));
  }

  #[test]
  #[should_panic(expected = "capacity must be greater than 0")]
  fn bounded_sync_panics_on_zero() {
    let _ = bounded_sync(0);
  }

  #[test]
  fn default_config() {
    assert_eq!(RingConfig::default().capacity, 65536);
    let (writer, reader) = RingBuilder::new().build_sync().unwrap();
    assert_eq!(writer.capacity(), 65536);
    assert_eq!(reader.capacity(), 65536);
  }

  #[test]
  fn short_read_leaves_the_rest() {
    let (mut writer, mut reader) = bounded_sync(8);
    writer.write(&[1, 2, 3, 4, 5]).unwrap();
    let mut buf = [0u8; 2];
    assert_eq!(reader.read(&mut buf), 2);
    assert_eq!(buf, [1, 2]);
    assert_eq!(reader.len(), 3);
    let mut buf = [0u8; 8];
    assert_eq!(reader.read(&mut buf), 3);
    assert_eq!(&buf[..3], &[3, 4, 5]);
    assert!(reader.is_empty());
  }

  #[test]
  fn reader_drains_then_sees_end_of_stream() {
    let (mut writer, mut reader) = bounded_sync(8);
    writer.write(&[9, 9, 9]).unwrap();
    drop(writer);
    assert!(reader.is_closed());
    let mut buf = [0u8; 8];
    assert_eq!(reader.read(&mut buf), 3);
    assert_eq!(reader.read(&mut buf), 0);
  }

  #[test]
  fn write_fails_after_reader_drops() {
    let (mut writer, reader) = bounded_sync(4);
    writer.write(&[1, 2]).unwrap();
    drop(reader);
    assert!(writer.is_closed());
    assert_eq!(writer.write(&[3]), Err(crate::RingClosed { written: 0 }));
    assert_eq!(writer.try_write(&[3]), Err(crate::RingClosed { written: 0 }));
  }

  #[test]
  fn blocked_writer_reports_partial_progress_on_close() {
    let (mut writer, mut reader) = bounded_sync(4);
    let handle = thread::spawn(move || writer.write(&[0u8; 10]));
    thread::sleep(Duration::from_millis(30));
    let mut buf = [0u8; 2];
    assert_eq!(reader.read(&mut buf), 2);
    thread::sleep(Duration::from_millis(30));
    drop(reader);
    let err = handle.join().unwrap().unwrap_err();
    assert_eq!(err.written, 6);
  }

  #[test]
  fn read_timeout_expires_on_idle_ring() {
    let (_writer, mut reader) = bounded_sync(4);
    let mut buf = [0u8; 4];
    assert_eq!(
      reader.read_timeout(&mut buf, Duration::from_millis(20)),
      Err(ReadTimeoutError::Timeout)
    );
  }

  #[test]
  fn stalls_are_reported_to_the_observer() {
    let observer = Arc::new(CountingObserver::new());
    let (mut writer, mut reader) = RingBuilder::new()
      .capacity(2)
      .observer(observer.clone())
      .build_async()
      .unwrap();

    let mut buf = [0u8; 2];
    assert!(reader.read(&mut buf).now_or_never().is_none());
    assert_eq!(writer.try_write(&[1, 2, 3]), Ok(2));
    assert!(writer.write(&[3]).now_or_never().is_none());

    let snapshot = observer.snapshot();
    assert_eq!(snapshot.reader_stalls, 1);
    assert_eq!(snapshot.writer_stalls, 1);
  }

  #[test]
  fn conversions_share_the_buffer() {
    let (writer, reader) = bounded_async(8);
    let mut writer = writer.to_sync();
    writer.write(&[4, 5, 6]).unwrap();
    let mut reader = reader.to_sync().to_async();
    let mut buf = [0u8; 8];
    assert_eq!(reader.read(&mut buf).now_or_never(), Some(3));
    assert_eq!(&buf[..3], &[4, 5, 6]);
  }

  #[test]
  fn async_writer_close_ends_the_stream() {
    use futures_util::io::{AsyncReadExt, AsyncWriteExt};

    let (mut writer, mut reader) = bounded_async(8);
    let mut out = Vec::new();
    async {
      writer.write_all(b"abc").await.unwrap();
      writer.close().await.unwrap();
      assert!(writer.write_all(b"d").await.is_err());
      reader.read_to_end(&mut out).await.unwrap();
    }
    .now_or_never()
    .unwrap();
    assert_eq!(out, b"abc");
  }
}
