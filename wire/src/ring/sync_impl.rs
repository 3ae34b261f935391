// src/ring/sync_impl.rs

use super::async_impl::{AsyncRingReader, AsyncRingWriter};
use super::shared::RingShared;
use crate::error::{ReadTimeoutError, RingClosed};
use crate::observe::RingSide;

use std::io;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The blocking writing end of a byte ring.
#[derive(Debug)]
pub struct SyncRingWriter {
  pub(crate) shared: Arc<RingShared>,
  // Makes the handle !Sync: only one thread may write.
  pub(crate) _phantom: PhantomData<*mut ()>,
}

/// The blocking reading end of a byte ring.
#[derive(Debug)]
pub struct SyncRingReader {
  pub(crate) shared: Arc<RingShared>,
  // Makes the handle !Sync: only one thread may read.
  pub(crate) _phantom: PhantomData<*mut ()>,
}

unsafe impl Send for SyncRingWriter {}
unsafe impl Send for SyncRingReader {}

impl SyncRingWriter {
  pub(crate) fn from_shared(shared: Arc<RingShared>) -> Self {
    SyncRingWriter {
      shared,
      _phantom: PhantomData,
    }
  }

  /// Converts this writer into an async one over the same buffer.
  pub fn to_async(self) -> AsyncRingWriter {
    let this = ManuallyDrop::new(self);
    // `this` is never dropped, so the Arc moves out exactly once.
    let shared = unsafe { ptr::read(&this.shared) };
    AsyncRingWriter::from_shared(shared)
  }

  /// Writes all of `buf`, blocking while the buffer is full.
  ///
  /// # Errors
  ///
  /// Returns [`RingClosed`] if the reader is dropped before every byte is
  /// committed; `written` says how many were.
  pub fn write(&mut self, buf: &[u8]) -> Result<(), RingClosed> {
    let mut written = 0;
    while written < buf.len() {
      if self.shared.is_reader_closed() {
        return Err(RingClosed { written });
      }
      let n = self.shared.try_write_from(&buf[written..]);
      if n > 0 {
        written += n;
        continue;
      }
      self.shared.stalled(RingSide::Writer);
      self.shared.space_available.wait();
    }
    Ok(())
  }

  /// Writes as much of `buf` as fits right now.
  ///
  /// # Errors
  ///
  /// Returns [`RingClosed`] if the reader has been dropped.
  pub fn try_write(&mut self, buf: &[u8]) -> Result<usize, RingClosed> {
    if self.shared.is_reader_closed() {
      return Err(RingClosed { written: 0 });
    }
    Ok(self.shared.try_write_from(buf))
  }

  /// Returns `true` if the reader has been dropped.
  pub fn is_closed(&self) -> bool {
    self.shared.is_reader_closed()
  }

  /// Bytes committed but not yet read.
  pub fn len(&self) -> usize {
    self.shared.len()
  }

  /// Returns `true` if no unread bytes are buffered.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The fixed size of the buffer in bytes.
  pub fn capacity(&self) -> usize {
    self.shared.capacity()
  }
}

impl io::Write for SyncRingWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    if buf.is_empty() {
      return Ok(0);
    }
    loop {
      if self.shared.is_reader_closed() {
        return Err(RingClosed { written: 0 }.into());
      }
      let n = self.shared.try_write_from(buf);
      if n > 0 {
        return Ok(n);
      }
      self.shared.stalled(RingSide::Writer);
      self.shared.space_available.wait();
    }
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl Drop for SyncRingWriter {
  fn drop(&mut self) {
    self.shared.close_writer();
  }
}

impl SyncRingReader {
  pub(crate) fn from_shared(shared: Arc<RingShared>) -> Self {
    SyncRingReader {
      shared,
      _phantom: PhantomData,
    }
  }

  /// Converts this reader into an async one over the same buffer.
  pub fn to_async(self) -> AsyncRingReader {
    let this = ManuallyDrop::new(self);
    let shared = unsafe { ptr::read(&this.shared) };
    AsyncRingReader::from_shared(shared)
  }

  /// Reads at least one byte into `buf`, blocking while the buffer is empty.
  ///
  /// Returns the number of bytes copied, at most `buf.len()`. Returns `0` if
  /// `buf` is empty, or once the writer has been dropped and every committed
  /// byte has been read.
  pub fn read(&mut self, buf: &mut [u8]) -> usize {
    match self.read_deadline(buf, None) {
      Some(n) => n,
      None => unreachable!("read without a deadline timed out"),
    }
  }

  /// Like [`read`](Self::read), but gives up after `timeout`.
  ///
  /// # Errors
  ///
  /// Returns [`ReadTimeoutError::Timeout`] if no byte arrived in time.
  pub fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, ReadTimeoutError> {
    self
      .read_deadline(buf, Some(Instant::now() + timeout))
      .ok_or(ReadTimeoutError::Timeout)
  }

  /// Copies whatever is available right now, possibly nothing.
  pub fn try_read(&mut self, buf: &mut [u8]) -> usize {
    self.shared.try_read_into(buf)
  }

  fn read_deadline(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> Option<usize> {
    if buf.is_empty() {
      return Some(0);
    }
    loop {
      let n = self.shared.try_read_into(buf);
      if n > 0 {
        return Some(n);
      }
      if self.shared.is_writer_closed() {
        return Some(self.shared.try_read_into(buf));
      }
      self.shared.stalled(RingSide::Reader);
      if !self.shared.data_available.wait_deadline(deadline) {
        return match self.shared.try_read_into(buf) {
          0 if !self.shared.is_writer_closed() => None,
          n => Some(n),
        };
      }
    }
  }

  /// Returns `true` if the writer has been dropped. Buffered bytes can still
  /// be read.
  pub fn is_closed(&self) -> bool {
    self.shared.is_writer_closed()
  }

  /// Bytes committed but not yet read.
  pub fn len(&self) -> usize {
    self.shared.len()
  }

  /// Returns `true` if no unread bytes are buffered.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The fixed size of the buffer in bytes.
  pub fn capacity(&self) -> usize {
    self.shared.capacity()
  }
}

impl io::Read for SyncRingReader {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    Ok(SyncRingReader::read(self, buf))
  }
}

impl Drop for SyncRingReader {
  fn drop(&mut self) {
    self.shared.close_reader();
  }
}
