// src/future/state.rs

//! The packed state word of a [`FutureSlot`](super::FutureSlot).
//!
//! ```text
//!  63                32 31               8 7        0
//! +--------------------+------------------+----------+
//! |     generation     | live completers  |  flags   |
//! +--------------------+------------------+----------+
//! ```
//!
//! Keeping the completer count and the generation in the same word as the flags
//! lets a completer check "still my lease, not yet completed" and claim the
//! completion in one compare-and-swap.

pub(super) const COMPLETING: u64 = 1 << 0;
pub(super) const COMPLETED: u64 = 1 << 1;
pub(super) const CONTINUATION: u64 = 1 << 2;
pub(super) const DETACHED: u64 = 1 << 3;

const FLAG_MASK: u64 = 0xFF;
const COUNT_SHIFT: u32 = 8;
const COUNT_ONE: u64 = 1 << COUNT_SHIFT;
const COUNT_MASK: u64 = 0x00FF_FFFF << COUNT_SHIFT;
const GENERATION_SHIFT: u32 = 32;

pub(super) const MAX_COMPLETERS: u32 = 0x00FF_FFFF;

#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) struct State(pub(super) u64);

impl State {
  /// A slot of the given generation with no lease outstanding.
  #[inline]
  pub(super) const fn idle(generation: u32) -> Self {
    State((generation as u64) << GENERATION_SHIFT)
  }

  #[inline]
  pub(super) fn generation(self) -> u32 {
    (self.0 >> GENERATION_SHIFT) as u32
  }

  #[inline]
  pub(super) fn completers(self) -> u32 {
    ((self.0 & COUNT_MASK) >> COUNT_SHIFT) as u32
  }

  #[inline]
  pub(super) fn is_idle(self) -> bool {
    self.0 & (FLAG_MASK | COUNT_MASK) == 0
  }

  #[inline]
  pub(super) fn is_completing(self) -> bool {
    self.0 & COMPLETING != 0
  }

  #[inline]
  pub(super) fn is_completed(self) -> bool {
    self.0 & COMPLETED != 0
  }

  /// Claimed by a completer, whether or not the value is visible yet.
  #[inline]
  pub(super) fn is_claimed(self) -> bool {
    self.0 & (COMPLETING | COMPLETED) != 0
  }

  #[inline]
  pub(super) fn has_continuation(self) -> bool {
    self.0 & CONTINUATION != 0
  }

  #[inline]
  pub(super) fn is_detached(self) -> bool {
    self.0 & DETACHED != 0
  }

  #[inline]
  pub(super) fn with_flag(self, flag: u64) -> Self {
    State(self.0 | flag)
  }

  #[inline]
  pub(super) fn add_completer(self) -> Self {
    debug_assert!(self.completers() < MAX_COMPLETERS);
    State(self.0 + COUNT_ONE)
  }

  #[inline]
  pub(super) fn remove_completer(self) -> Self {
    debug_assert!(self.completers() > 0);
    State(self.0 - COUNT_ONE)
  }
}

impl std::fmt::Debug for State {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("State")
      .field("generation", &self.generation())
      .field("completers", &self.completers())
      .field("completing", &self.is_completing())
      .field("completed", &self.is_completed())
      .field("continuation", &self.has_continuation())
      .field("detached", &self.is_detached())
      .finish()
  }
}
