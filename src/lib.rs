//! # brkalloc - A Best-Fit Allocator on the Program Break
//!
//! This crate provides a **best-fit free-list allocator** that manages memory
//! obtained from the `sbrk` system call, in two concurrency flavours.
//!
//! ## Overview
//!
//! Every region handed out is prefixed by a header. Freed regions are kept in
//! an address-ordered, doubly-linked free list anchored by a zero-size
//! sentinel, and neighbours are merged as soon as they are both free:
//!
//! ```text
//!   Heap after alloc(A) alloc(B) alloc(C) free(B):
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         PROGRAM SEGMENT                              │
//!   │                                                                      │
//!   │   ┌─────┬──────────┬──────────┬──────────┬─────────────────────────┐ │
//!   │   │  S  │    A     │    B     │    C     │     not yet grown       │ │
//!   │   └─────┴──────────┴──────────┴──────────┴─────────────────────────┘ │
//!   │     │                  ▲                 ▲                         │
//!   │     └──── free list ───┘            Program Break                  │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   S is the sentinel; only free blocks are linked.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align        - Word rounding of request sizes
//!   ├── block        - Block header and link arithmetic
//!   ├── segment      - Grow-only segments: ProgramBreak (sbrk) and Arena
//!   ├── error        - HeapError
//!   ├── heap         - Heap: best fit, splitting, coalescing
//!   └── personality  - SharedHeap, thread-local heap, entry points
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkalloc::{alloc_local, alloc_shared, free_local, free_shared};
//!
//! let shared = alloc_shared(64);
//! let local = alloc_local(64);
//! assert!(!shared.is_null() && !local.is_null());
//!
//! unsafe {
//!     shared.write_bytes(0xAB, 64);
//!     free_shared(shared);
//!     free_local(local);
//! }
//! ```
//!
//! Heaps can also be built directly over any [`Segment`], for example a
//! fixed [`Arena`]:
//!
//! ```rust
//! use brkalloc::{Arena, Heap};
//!
//! let mut heap = Heap::new(Arena::with_capacity(4096));
//! let ptr = heap.allocate(40).unwrap();
//!
//! unsafe { heap.deallocate(ptr.as_ptr()) };
//! assert_eq!(heap.stats().free_bytes, 40);
//! ```
//!
//! ## How It Works
//!
//! ```text
//!   Single block:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ is_free         │  │  │                          │  │
//!   │  │ prev: offset    │  │  │     N bytes usable       │  │
//!   │  │ next: offset    │  │  │                          │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   │      32 bytes         │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! - **Allocation** scans the whole free list for the block leaving the
//!   smallest leftover; an exact fit stops the scan. A leftover larger than
//!   one header is split off as a new free block. With no candidate the
//!   segment grows by exactly one header plus the request.
//! - **Deallocation** reinserts the block in address order, merges it with
//!   the following block and then the preceding one when they touch.
//! - **Growth** goes through one lock per segment. For the program break
//!   that lock is process-wide, shared by every heap.
//!
//! ## Personalities
//!
//! - [`alloc_shared`]/[`free_shared`]: one heap for the whole process, every
//!   call serialized by a mutex.
//! - [`alloc_local`]/[`free_local`]: one heap per thread, no lock around the
//!   free list. Pointers must be freed on the thread that allocated them.
//!
//! ## Limitations
//!
//! - **No resize**: there is no realloc
//! - **Word alignment only**: payloads are aligned to `usize`
//! - **Linear search**: no size classes
//! - **Grow only**: memory never goes back to the OS
//! - **Best-effort checks**: double frees are caught only while the header
//!   is intact
//! - **Unix-only**: requires `libc` and `sbrk` for [`ProgramBreak`]
//!
//! ## Safety
//!
//! Freeing is `unsafe`: pointers must come from the same heap personality
//! that produced them.

pub mod align;
mod block;
mod error;
mod heap;
mod personality;
mod segment;

pub use block::HEADER_SIZE;
pub use error::HeapError;
pub use heap::{FreeBlock, FreeBlocks, Heap, HeapStats};
pub use personality::{
  SharedHeap, alloc_local, alloc_shared, free_local, free_shared, local_stats, shared_stats,
};
pub use segment::{Arena, ProgramBreak, Segment, program_break};
