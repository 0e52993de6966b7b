//! Growable memory segments the heap carves blocks from.
//!
//! A segment is a contiguous region that only ever grows. Heaps address it
//! with byte offsets from [`Segment::base`]; this module is the only place
//! where offsets turn back into raw pointers.
//!
//! ```text
//!   base                                                  base + extent
//!    │                                                          │
//!    ▼                                                          ▼
//!    ┌────────┬──────────────┬────────┬─────────┬────────┬──────┐
//!    │ header │   payload    │ header │ payload │ header │ ...  │
//!    └────────┴──────────────┴────────┴─────────┴────────┴──────┘
//!    0        HEADER_SIZE    at       at + HEADER_SIZE
//! ```

use std::{
  alloc::{self, Layout},
  ptr::{self, NonNull},
  sync::{
    Arc,
    atomic::{AtomicPtr, AtomicUsize, Ordering},
  },
};

use libc::{c_void, intptr_t, sbrk};
use log::{trace, warn};
use parking_lot::{Mutex, const_mutex};

use crate::{
  align::{HEADER_ALIGN, padding_for},
  block::{Block, HEADER_SIZE},
  error::HeapError,
};

/// A contiguous, grow-only region of memory.
///
/// # Safety
///
/// Implementors must guarantee that:
///
/// - `base` never changes once it returned `Some`
/// - every range `offset..offset + increment` returned by `extend` is backed
///   by memory, handed out exactly once and aligned to the header alignment
/// - `extent` never shrinks and covers every range returned by `extend`
/// - `extend` is serialized by a growth lock of its own, independent of any
///   lock a caller may hold
pub unsafe trait Segment {
  /// Start of the segment, `None` while it has no backing yet.
  fn base(&self) -> Option<NonNull<u8>>;

  /// Bytes from `base` handed out so far.
  fn extent(&self) -> usize;

  /// Grows the segment by `increment` bytes and returns the offset of the
  /// first new byte.
  fn extend(
    &self,
    increment: usize,
  ) -> Result<usize, HeapError>;
}

unsafe impl<T: Segment + ?Sized> Segment for &T {
  fn base(&self) -> Option<NonNull<u8>> {
    (**self).base()
  }

  fn extent(&self) -> usize {
    (**self).extent()
  }

  fn extend(
    &self,
    increment: usize,
  ) -> Result<usize, HeapError> {
    (**self).extend(increment)
  }
}

unsafe impl<T: Segment + ?Sized> Segment for Arc<T> {
  fn base(&self) -> Option<NonNull<u8>> {
    (**self).base()
  }

  fn extent(&self) -> usize {
    (**self).extent()
  }

  fn extend(
    &self,
    increment: usize,
  ) -> Result<usize, HeapError> {
    (**self).extend(increment)
  }
}

struct BreakState {
  growth_lock: Mutex<()>,
  base: AtomicPtr<u8>,
  extent: AtomicUsize,
}

static BREAK: BreakState = BreakState {
  growth_lock: const_mutex(()),
  base: AtomicPtr::new(ptr::null_mut()),
  extent: AtomicUsize::new(0),
};

/// Returns the current program break, `sbrk(0)`.
pub fn program_break() -> *mut u8 {
  unsafe { sbrk(0) }.cast()
}

fn break_failed(addr: *mut c_void) -> bool {
  addr == usize::MAX as *mut c_void
}

/// The process data segment, grown with `sbrk(2)`.
///
/// There is one program break per process, so this is a zero-sized handle
/// onto shared state: every copy observes the same base and extent and
/// every growth call goes through the same lock.
///
/// The first break seen becomes the base. Foreign `brk`/`sbrk` users may
/// move the break in between our calls; the bytes they take simply never
/// show up in any free list.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgramBreak;

impl ProgramBreak {
  pub const fn new() -> Self {
    Self
  }
}

unsafe impl Segment for ProgramBreak {
  fn base(&self) -> Option<NonNull<u8>> {
    NonNull::new(BREAK.base.load(Ordering::Acquire))
  }

  fn extent(&self) -> usize {
    BREAK.extent.load(Ordering::Acquire)
  }

  fn extend(
    &self,
    increment: usize,
  ) -> Result<usize, HeapError> {
    let _guard = BREAK.growth_lock.lock();

    unsafe {
      let current = sbrk(0);
      if break_failed(current) {
        return Err(HeapError::OutOfMemory { increment });
      }

      let padding = padding_for(current.addr());
      let total = increment
        .checked_add(padding)
        .filter(|total| *total <= intptr_t::MAX as usize)
        .ok_or(HeapError::SizeOverflow {
          requested: increment,
        })?;

      let old = sbrk(total as intptr_t);
      if break_failed(old) {
        return Err(HeapError::OutOfMemory { increment });
      }
      if padding_for(old.addr()) > padding {
        warn!(
          "program break moved to unaligned {:?} during growth, {} bytes dropped",
          old, total
        );
        return Err(HeapError::OutOfMemory { increment });
      }

      let start = old.cast::<u8>().add(padding_for(old.addr()));

      let base = match NonNull::new(BREAK.base.load(Ordering::Acquire)) {
        Some(base) => base.as_ptr(),
        None => {
          BREAK.base.store(start, Ordering::Release);
          start
        }
      };

      let Some(offset) = start.addr().checked_sub(base.addr()) else {
        warn!("program break {:?} fell below segment base {:?}", start, base);
        return Err(HeapError::OutOfMemory { increment });
      };

      BREAK
        .extent
        .fetch_max(offset + increment, Ordering::AcqRel);

      trace!(
        "program break grown by {} bytes, block at offset {:#x}, break = {:?}",
        total,
        offset,
        sbrk(0)
      );

      Ok(offset)
    }
  }
}

/// A segment backed by one buffer reserved up front.
///
/// Growth bumps a cursor inside the buffer and fails with
/// [`HeapError::OutOfMemory`] once the capacity is used up. Several heaps
/// may share one arena through `&Arena` or `Arc<Arena>`.
pub struct Arena {
  buffer: NonNull<u8>,
  capacity: usize,
  cursor: Mutex<usize>,
  extent: AtomicUsize,
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
  pub fn with_capacity(capacity: usize) -> Self {
    let (buffer, capacity) = match Self::layout(capacity) {
      Some(layout) => {
        let buffer = unsafe { alloc::alloc(layout) };
        let buffer = NonNull::new(buffer).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        (buffer, capacity)
      }
      None => (NonNull::dangling(), 0),
    };

    Self {
      buffer,
      capacity,
      cursor: const_mutex(0),
      extent: AtomicUsize::new(0),
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  fn layout(capacity: usize) -> Option<Layout> {
    if capacity == 0 {
      return None;
    }
    Layout::from_size_align(capacity, HEADER_ALIGN).ok()
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    if let Some(layout) = Self::layout(self.capacity) {
      unsafe { alloc::dealloc(self.buffer.as_ptr(), layout) };
    }
  }
}

unsafe impl Segment for Arena {
  fn base(&self) -> Option<NonNull<u8>> {
    (self.capacity > 0).then_some(self.buffer)
  }

  fn extent(&self) -> usize {
    self.extent.load(Ordering::Acquire)
  }

  fn extend(
    &self,
    increment: usize,
  ) -> Result<usize, HeapError> {
    let mut cursor = self.cursor.lock();

    let offset = *cursor + padding_for(*cursor);
    let end = offset
      .checked_add(increment)
      .filter(|end| *end <= self.capacity)
      .ok_or(HeapError::OutOfMemory { increment })?;

    *cursor = end;
    self.extent.store(end, Ordering::Release);

    trace!("arena grown by {} bytes, block at offset {:#x}", increment, offset);

    Ok(offset)
  }
}

fn header_ptr<S: Segment + ?Sized>(
  segment: &S,
  at: usize,
) -> NonNull<Block> {
  let in_bounds = at
    .checked_add(HEADER_SIZE)
    .is_some_and(|end| end <= segment.extent());

  match segment.base() {
    Some(base) if in_bounds => {
      let header = unsafe { base.add(at) }.cast::<Block>();
      debug_assert!(header.is_aligned());
      header
    }
    _ => panic!("block header at {at:#x} lies outside the segment"),
  }
}

/// Reads the header at offset `at`.
///
/// # Panics
///
/// Panics if the header does not lie inside the segment.
pub(crate) fn load<S: Segment + ?Sized>(
  segment: &S,
  at: usize,
) -> Block {
  unsafe { header_ptr(segment, at).read() }
}

/// Writes the header at offset `at`.
///
/// # Panics
///
/// Panics if the header does not lie inside the segment.
pub(crate) fn store<S: Segment + ?Sized>(
  segment: &S,
  at: usize,
  block: Block,
) {
  unsafe { header_ptr(segment, at).write(block) }
}

/// Pointer handed to callers for the block at `at`.
pub(crate) fn payload<S: Segment + ?Sized>(
  segment: &S,
  at: usize,
) -> NonNull<u8> {
  unsafe { header_ptr(segment, at).cast::<u8>().add(HEADER_SIZE) }
}

/// Recovers the header offset of a payload pointer.
///
/// Returns `None` for pointers whose header could not lie inside the
/// segment. Anything that passes is trusted to be a real block.
pub(crate) fn header_offset<S: Segment + ?Sized>(
  segment: &S,
  payload: NonNull<u8>,
) -> Option<usize> {
  let base = segment.base()?;
  let at = payload
    .addr()
    .get()
    .checked_sub(base.addr().get())?
    .checked_sub(HEADER_SIZE)?;

  let in_bounds = at
    .checked_add(HEADER_SIZE)
    .is_some_and(|end| end <= segment.extent());

  (in_bounds && at % HEADER_ALIGN == 0).then_some(at)
}
