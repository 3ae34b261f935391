// src/ring/shared.rs

use crate::error::RingClosed;
use crate::observe::{Observer, RingSide};
use crate::signal::{SlimSignal, WaitKey};

use crossbeam_utils::CachePadded;

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Internal shared state of a byte ring, used by both the sync and async handles.
pub(crate) struct RingShared {
  storage: Box<[UnsafeCell<u8>]>,
  capacity: usize,
  write_pos: CachePadded<AtomicUsize>, // advanced by the writer only
  read_pos: CachePadded<AtomicUsize>,  // advanced by the reader only

  pub(crate) data_available: SlimSignal,
  pub(crate) space_available: SlimSignal,

  writer_closed: AtomicBool,
  reader_closed: AtomicBool,
  observer: Arc<dyn Observer>,
}

// The writer only touches bytes in [write_pos, read_pos + capacity) and the
// reader only bytes in [read_pos, write_pos); the release/acquire pairs on the
// positions hand each region over.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

impl fmt::Debug for RingShared {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RingShared")
      .field("capacity", &self.capacity)
      .field("write_pos", &self.write_pos.load(Ordering::Relaxed))
      .field("read_pos", &self.read_pos.load(Ordering::Relaxed))
      .field("writer_closed", &self.writer_closed.load(Ordering::Relaxed))
      .field("reader_closed", &self.reader_closed.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

impl RingShared {
  pub(crate) fn new(capacity: usize, observer: Arc<dyn Observer>) -> Self {
    assert!(capacity > 0, "ring buffer capacity must be greater than 0");
    RingShared {
      storage: (0..capacity).map(|_| UnsafeCell::new(0)).collect(),
      capacity,
      write_pos: CachePadded::new(AtomicUsize::new(0)),
      read_pos: CachePadded::new(AtomicUsize::new(0)),
      data_available: SlimSignal::new(),
      space_available: SlimSignal::new(),
      writer_closed: AtomicBool::new(false),
      reader_closed: AtomicBool::new(false),
      observer,
    }
  }

  #[inline]
  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    let write = self.write_pos.load(Ordering::Acquire);
    let read = self.read_pos.load(Ordering::Acquire);
    write.wrapping_sub(read)
  }

  #[inline]
  fn base(&self) -> *mut u8 {
    UnsafeCell::raw_get(self.storage.as_ptr())
  }

  #[inline]
  pub(crate) fn is_writer_closed(&self) -> bool {
    self.writer_closed.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn is_reader_closed(&self) -> bool {
    self.reader_closed.load(Ordering::Acquire)
  }

  pub(crate) fn close_writer(&self) {
    if !self.writer_closed.swap(true, Ordering::AcqRel) {
      self.data_available.set();
    }
  }

  pub(crate) fn close_reader(&self) {
    if !self.reader_closed.swap(true, Ordering::AcqRel) {
      self.space_available.set();
    }
  }

  #[inline]
  pub(crate) fn stalled(&self, side: RingSide) {
    self.observer.ring_stalled(side);
  }

  /// Copies as much of `src` as fits, crossing the wrap point if needed.
  /// Writer side only.
  pub(crate) fn try_write_from(&self, src: &[u8]) -> usize {
    let write = self.write_pos.load(Ordering::Relaxed);
    let read = self.read_pos.load(Ordering::Acquire);
    let free = self.capacity - write.wrapping_sub(read);
    let n = src.len().min(free);
    if n == 0 {
      return 0;
    }

    let start = write % self.capacity;
    let first = n.min(self.capacity - start);
    unsafe {
      ptr::copy_nonoverlapping(src.as_ptr(), self.base().add(start), first);
      ptr::copy_nonoverlapping(src.as_ptr().add(first), self.base(), n - first);
    }
    self.write_pos.store(write.wrapping_add(n), Ordering::Release);
    self.data_available.set();
    n
  }

  /// Copies up to `dst.len()` committed bytes out, crossing the wrap point if
  /// needed. Reader side only.
  pub(crate) fn try_read_into(&self, dst: &mut [u8]) -> usize {
    let read = self.read_pos.load(Ordering::Relaxed);
    let write = self.write_pos.load(Ordering::Acquire);
    let n = dst.len().min(write.wrapping_sub(read));
    if n == 0 {
      return 0;
    }

    let start = read % self.capacity;
    let first = n.min(self.capacity - start);
    unsafe {
      ptr::copy_nonoverlapping(self.base().add(start), dst.as_mut_ptr(), first);
      ptr::copy_nonoverlapping(self.base(), dst.as_mut_ptr().add(first), n - first);
    }
    self.read_pos.store(read.wrapping_add(n), Ordering::Release);
    self.space_available.set();
    n
  }

  /// Poll-based read shared by the read future and `AsyncRead`. `Ready(0)`
  /// means end of stream (or an empty `dst`).
  pub(crate) fn poll_read(&self, cx: &mut Context<'_>, dst: &mut [u8], key: &mut WaitKey) -> Poll<usize> {
    if dst.is_empty() {
      return Poll::Ready(0);
    }
    loop {
      let n = self.try_read_into(dst);
      if n > 0 {
        self.data_available.withdraw(key);
        return Poll::Ready(n);
      }
      if self.is_writer_closed() {
        // Bytes committed before the close are still delivered.
        let n = self.try_read_into(dst);
        self.data_available.withdraw(key);
        return Poll::Ready(n);
      }
      match self.data_available.poll_wait(cx, key) {
        Poll::Ready(()) => continue,
        Poll::Pending => {
          self.stalled(RingSide::Reader);
          return Poll::Pending;
        }
      }
    }
  }

  /// Poll-based partial write. Fails once the reader is gone; the caller
  /// fills in how much of its own write was committed.
  pub(crate) fn poll_write_some(
    &self,
    cx: &mut Context<'_>,
    src: &[u8],
    key: &mut WaitKey,
  ) -> Poll<Result<usize, RingClosed>> {
    if src.is_empty() {
      return Poll::Ready(Ok(0));
    }
    loop {
      if self.is_reader_closed() {
        self.space_available.withdraw(key);
        return Poll::Ready(Err(RingClosed { written: 0 }));
      }
      let n = self.try_write_from(src);
      if n > 0 {
        self.space_available.withdraw(key);
        return Poll::Ready(Ok(n));
      }
      match self.space_available.poll_wait(cx, key) {
        Poll::Ready(()) => continue,
        Poll::Pending => {
          self.stalled(RingSide::Writer);
          return Poll::Pending;
        }
      }
    }
  }
}
