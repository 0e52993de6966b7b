//! The two heap personalities and the process-wide entry points.
//!
//! ```text
//!   alloc_shared / free_shared            alloc_local / free_local
//!              │                                     │
//!              ▼                                     ▼
//!   ┌─────────────────────┐          ┌──────────────────────────────┐
//!   │ SharedHeap          │          │ thread_local! Heap           │
//!   │ Mutex<Heap>         │          │ one root per thread, no lock │
//!   └──────────┬──────────┘          └───────────────┬──────────────┘
//!              │                                     │
//!              └──────────────┐   ┌──────────────────┘
//!                             ▼   ▼
//!                  ┌──────────────────────────┐
//!                  │ ProgramBreak growth lock │
//!                  │ sbrk(2)                  │
//!                  └──────────────────────────┘
//! ```
//!
//! The heap lock is always taken first and the growth lock is only ever
//! held inside [`Segment::extend`], so the two cannot deadlock.

use std::{cell::RefCell, ptr};

use log::{debug, warn};
use parking_lot::{Mutex, const_mutex};

use crate::{
  heap::{Heap, HeapStats},
  segment::{ProgramBreak, Segment},
};

/// A heap context behind one mutex covering every allocate and free.
pub struct SharedHeap<S: Segment> {
  heap: Mutex<Heap<S>>,
}

impl<S: Segment> SharedHeap<S> {
  pub const fn new(segment: S) -> Self {
    Self {
      heap: const_mutex(Heap::new(segment)),
    }
  }

  /// Allocates `size` bytes, or returns null when the segment cannot grow.
  pub fn allocate(
    &self,
    size: usize,
  ) -> *mut u8 {
    let result = self.heap.lock().allocate(size);
    match result {
      Ok(ptr) => ptr.as_ptr(),
      Err(err) => {
        debug!("shared allocation of {} bytes failed: {}", size, err);
        ptr::null_mut()
      }
    }
  }

  /// Frees a pointer obtained from [`allocate`](Self::allocate).
  ///
  /// # Safety
  ///
  /// Same contract as [`Heap::deallocate`].
  pub unsafe fn deallocate(
    &self,
    ptr: *mut u8,
  ) {
    unsafe { self.heap.lock().deallocate(ptr) }
  }

  pub fn stats(&self) -> HeapStats {
    self.heap.lock().stats()
  }

  /// Runs `f` with the heap locked.
  pub fn with_heap<R>(
    &self,
    f: impl FnOnce(&mut Heap<S>) -> R,
  ) -> R {
    f(&mut self.heap.lock())
  }
}

static SHARED_HEAP: SharedHeap<ProgramBreak> = SharedHeap::new(ProgramBreak::new());

thread_local! {
  static LOCAL_HEAP: RefCell<Heap<ProgramBreak>> = const {
    RefCell::new(Heap::new(ProgramBreak::new()))
  };
}

/// Allocates from the process-wide heap, serialized by its lock.
///
/// Returns null when the program break cannot move.
pub fn alloc_shared(size: usize) -> *mut u8 {
  SHARED_HEAP.allocate(size)
}

/// Frees a pointer from [`alloc_shared`]. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or come from [`alloc_shared`] and not be used again.
pub unsafe fn free_shared(ptr: *mut u8) {
  unsafe { SHARED_HEAP.deallocate(ptr) }
}

/// Allocates from the calling thread's own heap, without locking.
///
/// Returns null when the program break cannot move, or when called while
/// the thread's heap is already in use further up the stack.
pub fn alloc_local(size: usize) -> *mut u8 {
  LOCAL_HEAP.with(|heap| {
    let Ok(mut heap) = heap.try_borrow_mut() else {
      warn!("reentrant local allocation of {} bytes refused", size);
      return ptr::null_mut();
    };

    match heap.allocate(size) {
      Ok(ptr) => ptr.as_ptr(),
      Err(err) => {
        debug!("local allocation of {} bytes failed: {}", size, err);
        ptr::null_mut()
      }
    }
  })
}

/// Frees a pointer from [`alloc_local`] into the calling thread's heap.
///
/// # Safety
///
/// `ptr` must be null or come from [`alloc_local`] on this same thread and
/// not be used again.
pub unsafe fn free_local(ptr: *mut u8) {
  LOCAL_HEAP.with(|heap| match heap.try_borrow_mut() {
    Ok(mut heap) => unsafe { heap.deallocate(ptr) },
    Err(_) => warn!("reentrant local free of {:?} ignored", ptr),
  });
}

/// Free-list summary of the process-wide heap.
pub fn shared_stats() -> HeapStats {
  SHARED_HEAP.stats()
}

/// Free-list summary of the calling thread's heap.
pub fn local_stats() -> HeapStats {
  LOCAL_HEAP.with(|heap| {
    heap
      .try_borrow()
      .map(|heap| heap.stats())
      .unwrap_or_default()
  })
}
