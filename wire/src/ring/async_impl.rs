// src/ring/async_impl.rs

use super::shared::RingShared;
use super::sync_impl::{SyncRingReader, SyncRingWriter};
use crate::error::RingClosed;
use crate::signal::WaitKey;

use futures_util::io::{AsyncRead, AsyncWrite};

use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::pin::Pin;
use std::ptr;
use std::sync::Arc;
use std::task::{Context, Poll};

/// The async writing end of a byte ring.
#[derive(Debug)]
pub struct AsyncRingWriter {
  pub(crate) shared: Arc<RingShared>,
  key: WaitKey,
  pub(crate) _phantom: PhantomData<*mut ()>,
}

/// The async reading end of a byte ring.
#[derive(Debug)]
pub struct AsyncRingReader {
  pub(crate) shared: Arc<RingShared>,
  key: WaitKey,
  pub(crate) _phantom: PhantomData<*mut ()>,
}

unsafe impl Send for AsyncRingWriter {}
unsafe impl Send for AsyncRingReader {}

impl AsyncRingWriter {
  pub(crate) fn from_shared(shared: Arc<RingShared>) -> Self {
    AsyncRingWriter {
      shared,
      key: WaitKey::new(),
      _phantom: PhantomData,
    }
  }

  /// Converts this writer into a blocking one over the same buffer.
  pub fn to_sync(self) -> SyncRingWriter {
    let mut md = ManuallyDrop::new(self);
    let this: &mut Self = &mut md;
    this.shared.space_available.withdraw(&mut this.key);
    // `this` is never dropped, so the Arc moves out exactly once.
    let shared = unsafe { ptr::read(&this.shared) };
    SyncRingWriter::from_shared(shared)
  }

  /// Writes all of `buf`, suspending while the buffer is full.
  ///
  /// The returned future resolves to [`RingClosed`] if the reader goes away
  /// first. If it is dropped early, the bytes committed so far stay committed.
  pub fn write<'a>(&'a mut self, buf: &'a [u8]) -> RingWrite<'a> {
    RingWrite {
      writer: self,
      buf,
      written: 0,
    }
  }

  /// Writes as much of `buf` as fits right now.
  ///
  /// # Errors
  ///
  /// Returns [`RingClosed`] if the reader has been dropped or this writer was
  /// closed.
  pub fn try_write(&mut self, buf: &[u8]) -> Result<usize, RingClosed> {
    if self.shared.is_reader_closed() || self.shared.is_writer_closed() {
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

  fn poll_write_some(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, RingClosed>> {
    if self.shared.is_writer_closed() {
      return Poll::Ready(Err(RingClosed { written: 0 }));
    }
    self.shared.poll_write_some(cx, buf, &mut self.key)
  }
}

impl Drop for AsyncRingWriter {
  fn drop(&mut self) {
    self.shared.space_available.withdraw(&mut self.key);
    self.shared.close_writer();
  }
}

impl AsyncWrite for AsyncRingWriter {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
    self.get_mut().poll_write_some(cx, buf).map_err(io::Error::from)
  }

  fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Poll::Ready(Ok(()))
  }

  fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    self.shared.close_writer();
    Poll::Ready(Ok(()))
  }
}

/// Future returned by [`AsyncRingWriter::write`].
#[must_use = "futures do nothing unless you .await or poll them"]
#[derive(Debug)]
pub struct RingWrite<'a> {
  writer: &'a mut AsyncRingWriter,
  buf: &'a [u8],
  written: usize,
}

impl Future for RingWrite<'_> {
  type Output = Result<(), RingClosed>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    while this.written < this.buf.len() {
      match this.writer.poll_write_some(cx, &this.buf[this.written..]) {
        Poll::Ready(Ok(n)) => this.written += n,
        Poll::Ready(Err(_)) => {
          return Poll::Ready(Err(RingClosed {
            written: this.written,
          }))
        }
        Poll::Pending => return Poll::Pending,
      }
    }
    Poll::Ready(Ok(()))
  }
}

impl Drop for RingWrite<'_> {
  fn drop(&mut self) {
    let writer = &mut *self.writer;
    writer.shared.space_available.withdraw(&mut writer.key);
  }
}

impl AsyncRingReader {
  pub(crate) fn from_shared(shared: Arc<RingShared>) -> Self {
    AsyncRingReader {
      shared,
      key: WaitKey::new(),
      _phantom: PhantomData,
    }
  }

  /// Converts this reader into a blocking one over the same buffer.
  pub fn to_sync(self) -> SyncRingReader {
    let mut md = ManuallyDrop::new(self);
    let this: &mut Self = &mut md;
    this.shared.data_available.withdraw(&mut this.key);
    let shared = unsafe { ptr::read(&this.shared) };
    SyncRingReader::from_shared(shared)
  }

  /// Reads at least one byte into `buf`, suspending while the buffer is empty.
  ///
  /// Resolves to the number of bytes copied, at most `buf.len()`, or to `0` if
  /// `buf` is empty or the writer is gone and every committed byte was read.
  pub fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> RingRead<'a> {
    RingRead { reader: self, buf }
  }

  /// Copies whatever is available right now, possibly nothing.
  pub fn try_read(&mut self, buf: &mut [u8]) -> usize {
    self.shared.try_read_into(buf)
  }

  /// Returns `true` if the writer has been dropped or closed. Buffered bytes
  /// can still be read.
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

impl Drop for AsyncRingReader {
  fn drop(&mut self) {
    self.shared.data_available.withdraw(&mut self.key);
    self.shared.close_reader();
  }
}

impl AsyncRead for AsyncRingReader {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<io::Result<usize>> {
    let this = self.get_mut();
    this.shared.poll_read(cx, buf, &mut this.key).map(Ok)
  }
}

/// Future returned by [`AsyncRingReader::read`].
#[must_use = "futures do nothing unless you .await or poll them"]
#[derive(Debug)]
pub struct RingRead<'a> {
  reader: &'a mut AsyncRingReader,
  buf: &'a mut [u8],
}

impl Future for RingRead<'_> {
  type Output = usize;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<usize> {
    let this = self.get_mut();
    let reader = &mut *this.reader;
    reader.shared.poll_read(cx, this.buf, &mut reader.key)
  }
}

impl Drop for RingRead<'_> {
  fn drop(&mut self) {
    let reader = &mut *self.reader;
    reader.shared.data_available.withdraw(&mut reader.key);
  }
}
