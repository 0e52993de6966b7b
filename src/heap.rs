//! The heap engine: best-fit allocation over an address-ordered free list.
//!
//! ```text
//!   Free list of one heap (address order, sentinel first):
//!
//!   ┌──────────┐     ┌──────────┐     ┌──────────┐
//!   │ sentinel │ ──▶ │ free 64  │ ──▶ │ free 16  │ ──▶ NIL
//!   │ size 0   │ ◀── │          │ ◀── │          │
//!   └──────────┘     └──────────┘     └──────────┘
//!        ▲
//!        └── root
//! ```
//!
//! Allocated blocks are unlinked; only their header survives in front of
//! the payload, so `free` finds it again by stepping back `HEADER_SIZE`.

use std::{iter::FusedIterator, ptr::NonNull};

use log::{debug, trace, warn};

use crate::{
  align::align_up,
  block::{Block, HEADER_SIZE, NIL},
  error::HeapError,
  segment::{self, Segment},
};

/// A free block as seen from outside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
  pub payload: NonNull<u8>,
  pub size: usize,
}

/// Free-list summary, sentinel excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

/// A heap context: one free list rooted in a segment.
///
/// The heap does no locking of its own. Whoever owns a `Heap` decides how
/// it is shared: behind a mutex ([`SharedHeap`](crate::SharedHeap)) or
/// confined to one thread. Growth is always serialized by the segment.
pub struct Heap<S: Segment> {
  segment: S,
  root: Option<usize>,
}

impl<S: Segment> Heap<S> {
  /// Creates a heap with no sentinel yet; it appears on first allocation.
  pub const fn new(segment: S) -> Self {
    Self {
      segment,
      root: None,
    }
  }

  pub fn segment(&self) -> &S {
    &self.segment
  }

  pub fn is_initialized(&self) -> bool {
    self.root.is_some()
  }

  fn load(
    &self,
    at: usize,
  ) -> Block {
    segment::load(&self.segment, at)
  }

  fn store(
    &self,
    at: usize,
    block: Block,
  ) {
    segment::store(&self.segment, at, block);
  }

  fn set_next(
    &self,
    at: usize,
    next: usize,
  ) {
    let mut block = self.load(at);
    block.next = next;
    self.store(at, block);
  }

  fn set_prev(
    &self,
    at: usize,
    prev: usize,
  ) {
    if at == NIL {
      return;
    }
    let mut block = self.load(at);
    block.prev = prev;
    self.store(at, block);
  }

  /// Returns the sentinel offset, materializing it on first use.
  fn root(&mut self) -> Result<usize, HeapError> {
    if let Some(root) = self.root {
      return Ok(root);
    }

    let root = self.segment.extend(HEADER_SIZE)?;
    self.store(root, Block::sentinel());
    self.root = Some(root);

    trace!("heap sentinel created at offset {:#x}", root);

    Ok(root)
  }

  /// Carves a fresh allocated block off the end of the segment.
  fn grow(
    &mut self,
    size: usize,
  ) -> Result<usize, HeapError> {
    let increment = HEADER_SIZE
      .checked_add(size)
      .ok_or(HeapError::SizeOverflow { requested: size })?;

    let at = self.segment.extend(increment)?;
    self.store(at, Block::allocated(size));

    trace!("heap grown: block of {} bytes at offset {:#x}", size, at);

    Ok(at)
  }

  /// Smallest free block that holds `size` bytes; an exact fit ends the scan.
  fn best_fit(
    &self,
    root: usize,
    size: usize,
  ) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    let mut cursor = self.load(root).next();

    while let Some(at) = cursor {
      let block = self.load(at);

      if block.size == size {
        return Some(at);
      }

      if block.size > size {
        let leftover = block.size - size;
        if best.is_none_or(|(_, best_leftover)| leftover < best_leftover) {
          best = Some((at, leftover));
        }
      }

      cursor = block.next();
    }

    best.map(|(at, _)| at)
  }

  /// Turns the free block at `at` into an allocated block of `size` bytes.
  ///
  /// The tail is split off as a new free block in the same list position
  /// unless it could not hold more than a bare header.
  fn split(
    &mut self,
    at: usize,
    size: usize,
  ) {
    let mut block = self.load(at);
    debug_assert!(block.is_free && block.size >= size);

    let leftover = block.size - size;

    if leftover <= HEADER_SIZE {
      self.set_next(block.prev, block.next);
      self.set_prev(block.next, block.prev);
    } else {
      let tail_at = at + HEADER_SIZE + size;
      let tail = Block::new(leftover - HEADER_SIZE, true, block.prev, block.next);
      self.store(tail_at, tail);
      self.set_next(block.prev, tail_at);
      self.set_prev(block.next, tail_at);

      trace!(
        "split block at {:#x}: {} + {} bytes free at {:#x}",
        at, size, tail.size, tail_at
      );

      block.size = size;
    }

    block.is_free = false;
    block.prev = NIL;
    block.next = NIL;
    self.store(at, block);
  }

  /// Last free block below `at`, starting from the sentinel.
  fn insertion_point(
    &self,
    root: usize,
    at: usize,
  ) -> Option<usize> {
    if at <= root {
      return None;
    }

    let mut cursor = root;
    loop {
      let next = self.load(cursor).next;
      if next == NIL || next > at || next == cursor {
        return Some(cursor);
      }
      cursor = next;
    }
  }

  /// Allocates `size` bytes, best fit first, growing the segment otherwise.
  ///
  /// The request is rounded up to the machine word. A failed growth leaves
  /// the heap untouched.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, HeapError> {
    let size = align_up(size).ok_or(HeapError::SizeOverflow { requested: size })?;
    let root = self.root()?;

    let at = match self.best_fit(root, size) {
      Some(at) => {
        trace!("best fit for {} bytes at offset {:#x}", size, at);
        self.split(at, size);
        at
      }
      None => self.grow(size)?,
    };

    Ok(segment::payload(&self.segment, at))
  }

  /// Returns a block to the free list and merges it with free neighbours.
  ///
  /// Null pointers, blocks already marked free and pointers that cannot
  /// belong to this heap are ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer returned by [`allocate`](Self::allocate)
  /// on this heap. Freeing a block twice is caught only while its header is
  /// intact; anything else is undefined behaviour.
  pub unsafe fn deallocate(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(ptr) = NonNull::new(ptr) else {
      debug!("free of null pointer ignored");
      return;
    };

    let (Some(root), Some(at)) = (self.root, segment::header_offset(&self.segment, ptr)) else {
      warn!("free of {:?} ignored: not inside this heap", ptr);
      return;
    };

    let mut block = self.load(at);
    if block.is_free {
      debug!("double free of {:?} ignored", ptr);
      return;
    }

    let Some(prev_at) = self.insertion_point(root, at) else {
      warn!("free of {:?} ignored: no place in the free list", ptr);
      return;
    };
    let next_at = self.load(prev_at).next;

    block.is_free = true;
    block.prev = prev_at;
    block.next = next_at;
    self.store(at, block);
    self.set_next(prev_at, at);
    self.set_prev(next_at, at);

    if next_at != NIL {
      let next = self.load(next_at);
      if block.is_adjacent(at, next_at) {
        block.size += HEADER_SIZE + next.size;
        block.next = next.next;
        self.store(at, block);
        self.set_prev(next.next, at);

        trace!("merged {:#x} into {:#x}", next_at, at);
      }
    }

    let mut prev = self.load(prev_at);
    if prev_at != root && prev.is_adjacent(prev_at, at) {
      prev.size += HEADER_SIZE + block.size;
      prev.next = block.next;
      self.store(prev_at, prev);
      self.set_prev(block.next, prev_at);

      trace!("merged {:#x} into {:#x}", at, prev_at);
    }
  }

  /// Payload capacity of an allocated block, which may exceed the request.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live pointer returned by [`allocate`](Self::allocate)
  /// on this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> Option<usize> {
    let at = segment::header_offset(&self.segment, NonNull::new(ptr)?)?;
    let block = self.load(at);
    (!block.is_free).then_some(block.size)
  }

  /// Free blocks in address order, sentinel excluded.
  pub fn free_blocks(&self) -> FreeBlocks<'_, S> {
    let cursor = self
      .root
      .and_then(|root| self.load(root).next())
      .unwrap_or(NIL);

    FreeBlocks { heap: self, cursor }
  }

  pub fn stats(&self) -> HeapStats {
    self
      .free_blocks()
      .fold(HeapStats::default(), |stats, block| HeapStats {
        free_blocks: stats.free_blocks + 1,
        free_bytes: stats.free_bytes + block.size,
        largest_free: stats.largest_free.max(block.size),
      })
  }

  /// Walks the free list and checks its structural invariants.
  ///
  /// The list must start at a zero-size free sentinel, run in strictly
  /// increasing address order with consistent back-links, hold only free
  /// blocks, and contain no two address-adjacent blocks past the sentinel.
  pub fn validate(&self) -> Result<(), HeapError> {
    let Some(root) = self.root else {
      return Ok(());
    };

    let sentinel = self.load(root);
    if sentinel.size != 0 || !sentinel.is_free || sentinel.prev != NIL {
      return corrupted(root, "malformed sentinel");
    }

    let limit = self.segment.extent() / HEADER_SIZE;
    let mut steps = 0;
    let mut prev_at = root;
    let mut prev = sentinel;

    while let Some(at) = prev.next() {
      steps += 1;
      if steps > limit {
        return corrupted(at, "free list does not terminate");
      }
      if at <= prev_at {
        return corrupted(at, "free list out of address order");
      }

      let block = self.load(at);
      if !block.is_free {
        return corrupted(at, "allocated block in free list");
      }
      if block.prev != prev_at {
        return corrupted(at, "broken back-link");
      }
      if prev_at != root && prev.is_adjacent(prev_at, at) {
        return corrupted(at, "adjacent free blocks not coalesced");
      }

      prev_at = at;
      prev = block;
    }

    Ok(())
  }
}

fn corrupted(
  offset: usize,
  reason: &'static str,
) -> Result<(), HeapError> {
  Err(HeapError::Corrupted { offset, reason })
}

/// Iterator returned by [`Heap::free_blocks`].
pub struct FreeBlocks<'h, S: Segment> {
  heap: &'h Heap<S>,
  cursor: usize,
}

impl<S: Segment> Iterator for FreeBlocks<'_, S> {
  type Item = FreeBlock;

  fn next(&mut self) -> Option<Self::Item> {
    if self.cursor == NIL {
      return None;
    }

    let at = self.cursor;
    let block = self.heap.load(at);
    self.cursor = if block.next == at { NIL } else { block.next };

    Some(FreeBlock {
      payload: segment::payload(&self.heap.segment, at),
      size: block.size,
    })
  }
}

impl<S: Segment> FusedIterator for FreeBlocks<'_, S> {}

#[cfg(test)]
mod tests {
  use std::{collections::HashSet, sync::Arc, thread};

  use super::*;
  use crate::segment::{Arena, ProgramBreak};

  fn arena_heap(capacity: usize) -> Heap<Arena> {
    Heap::new(Arena::with_capacity(capacity))
  }

  fn sizes<S: Segment>(heap: &Heap<S>) -> Vec<usize> {
    heap.free_blocks().map(|block| block.size).collect()
  }

  #[test]
  fn test_first_allocation_creates_sentinel() {
    let mut heap = arena_heap(1024);
    assert!(!heap.is_initialized());

    let ptr = heap.allocate(40).unwrap();

    assert!(heap.is_initialized());
    assert_eq!(heap.segment().extent(), HEADER_SIZE + HEADER_SIZE + 40);
    assert_eq!(
      ptr.addr().get(),
      heap.segment().base().unwrap().addr().get() + 2 * HEADER_SIZE
    );
    assert!(heap.free_blocks().next().is_none());
    heap.validate().unwrap();
  }

  #[test]
  fn test_growth_then_reuse_scenario() {
    let mut heap = arena_heap(1024);

    let first = heap.allocate(40).unwrap();
    let second = heap.allocate(40).unwrap();
    assert_ne!(first, second);
    assert_eq!(heap.segment().extent(), HEADER_SIZE + 2 * (HEADER_SIZE + 40));

    unsafe { heap.deallocate(first.as_ptr()) };
    assert_eq!(
      heap.free_blocks().collect::<Vec<_>>(),
      vec![FreeBlock {
        payload: first,
        size: 40
      }]
    );

    let third = heap.allocate(40).unwrap();
    assert_eq!(third, first);
    assert!(heap.free_blocks().next().is_none());
    assert_eq!(heap.segment().extent(), HEADER_SIZE + 2 * (HEADER_SIZE + 40));
    heap.validate().unwrap();
  }

  #[test]
  fn test_round_trip_restores_free_capacity() {
    let mut heap = arena_heap(4096);

    let big = heap.allocate(256).unwrap();
    let guard = heap.allocate(8).unwrap();
    unsafe { heap.deallocate(big.as_ptr()) };

    let before = heap.stats();
    assert_eq!(before.free_bytes, 256);

    let ptr = heap.allocate(40).unwrap();
    assert_eq!(ptr, big);
    assert_eq!(heap.stats().free_bytes, 256 - 40 - HEADER_SIZE);

    unsafe { heap.deallocate(ptr.as_ptr()) };
    assert_eq!(heap.stats(), before);

    assert_eq!(heap.allocate(40).unwrap(), ptr);
    heap.validate().unwrap();

    unsafe { heap.deallocate(guard.as_ptr()) };
    heap.validate().unwrap();
  }

  #[test]
  fn test_two_way_and_three_way_coalescing() {
    let mut heap = arena_heap(4096);
    let s = 48;

    let a = heap.allocate(s).unwrap();
    let b = heap.allocate(s).unwrap();
    let c = heap.allocate(s).unwrap();

    unsafe {
      heap.deallocate(a.as_ptr());
      heap.deallocate(b.as_ptr());
    }
    assert_eq!(sizes(&heap), vec![2 * s + HEADER_SIZE]);
    heap.validate().unwrap();

    unsafe { heap.deallocate(c.as_ptr()) };
    assert_eq!(sizes(&heap), vec![3 * s + 2 * HEADER_SIZE]);
    assert_eq!(heap.free_blocks().next().unwrap().payload, a);
    heap.validate().unwrap();
  }

  #[test]
  fn test_middle_free_merges_both_neighbours() {
    let mut heap = arena_heap(4096);
    let s = 32;

    let a = heap.allocate(s).unwrap();
    let b = heap.allocate(s).unwrap();
    let c = heap.allocate(s).unwrap();
    let guard = heap.allocate(s).unwrap();

    unsafe {
      heap.deallocate(a.as_ptr());
      heap.deallocate(c.as_ptr());
    }
    assert_eq!(sizes(&heap), vec![s, s]);

    unsafe { heap.deallocate(b.as_ptr()) };
    assert_eq!(sizes(&heap), vec![3 * s + 2 * HEADER_SIZE]);
    heap.validate().unwrap();

    unsafe { heap.deallocate(guard.as_ptr()) };
    assert_eq!(sizes(&heap), vec![4 * s + 3 * HEADER_SIZE]);
    heap.validate().unwrap();
  }

  #[test]
  fn test_block_next_to_sentinel_stays_separate() {
    let mut heap = arena_heap(1024);

    let a = heap.allocate(16).unwrap();
    unsafe { heap.deallocate(a.as_ptr()) };

    assert_eq!(
      heap.free_blocks().collect::<Vec<_>>(),
      vec![FreeBlock {
        payload: a,
        size: 16
      }]
    );
    heap.validate().unwrap();
  }

  #[test]
  fn test_best_fit_prefers_smallest_leftover() {
    let mut heap = arena_heap(4096);

    let small = heap.allocate(16).unwrap();
    let _g1 = heap.allocate(8).unwrap();
    let large = heap.allocate(64).unwrap();
    let _g2 = heap.allocate(8).unwrap();
    let exact = heap.allocate(32).unwrap();
    let _g3 = heap.allocate(8).unwrap();

    unsafe {
      heap.deallocate(small.as_ptr());
      heap.deallocate(large.as_ptr());
      heap.deallocate(exact.as_ptr());
    }
    assert_eq!(sizes(&heap), vec![16, 64, 32]);

    assert_eq!(heap.allocate(32).unwrap(), exact);
    assert_eq!(sizes(&heap), vec![16, 64]);
    heap.validate().unwrap();
  }

  #[test]
  fn test_best_fit_without_exact_match() {
    let mut heap = arena_heap(4096);

    let a = heap.allocate(128).unwrap();
    let _g1 = heap.allocate(8).unwrap();
    let b = heap.allocate(96).unwrap();
    let _g2 = heap.allocate(8).unwrap();

    unsafe {
      heap.deallocate(a.as_ptr());
      heap.deallocate(b.as_ptr());
    }

    let ptr = heap.allocate(40).unwrap();
    assert_eq!(ptr, b);
    assert_eq!(sizes(&heap), vec![128, 96 - 40 - HEADER_SIZE]);
    heap.validate().unwrap();
  }

  #[test]
  fn test_small_leftover_is_not_split() {
    let mut heap = arena_heap(4096);

    let a = heap.allocate(64).unwrap();
    let _guard = heap.allocate(8).unwrap();
    unsafe { heap.deallocate(a.as_ptr()) };

    let request = 64 - HEADER_SIZE;
    let ptr = heap.allocate(request).unwrap();
    assert_eq!(ptr, a);
    assert_eq!(unsafe { heap.usable_size(ptr.as_ptr()) }, Some(64));
    assert!(heap.free_blocks().next().is_none());
    heap.validate().unwrap();
  }

  #[test]
  fn test_leftover_above_header_is_split() {
    let mut heap = arena_heap(4096);

    let a = heap.allocate(64).unwrap();
    let _guard = heap.allocate(8).unwrap();
    unsafe { heap.deallocate(a.as_ptr()) };

    let request = 64 - HEADER_SIZE - 8;
    let ptr = heap.allocate(request).unwrap();
    assert_eq!(unsafe { heap.usable_size(ptr.as_ptr()) }, Some(request));
    assert_eq!(sizes(&heap), vec![8]);
    heap.validate().unwrap();
  }

  #[test]
  fn test_split_tail_keeps_list_position() {
    let mut heap = arena_heap(4096);

    let a = heap.allocate(16).unwrap();
    let _g1 = heap.allocate(8).unwrap();
    let b = heap.allocate(200).unwrap();
    let _g2 = heap.allocate(8).unwrap();
    let c = heap.allocate(16).unwrap();
    let _g3 = heap.allocate(8).unwrap();

    unsafe {
      heap.deallocate(a.as_ptr());
      heap.deallocate(b.as_ptr());
      heap.deallocate(c.as_ptr());
    }

    heap.allocate(100).unwrap();
    assert_eq!(sizes(&heap), vec![16, 200 - 104 - HEADER_SIZE, 16]);
    heap.validate().unwrap();
  }

  #[test]
  fn test_requests_round_to_word() {
    let mut heap = arena_heap(1024);

    let ptr = heap.allocate(13).unwrap();
    assert_eq!(
      unsafe { heap.usable_size(ptr.as_ptr()) },
      align_up(13)
    );
    assert_eq!(ptr.addr().get() % std::mem::align_of::<usize>(), 0);
  }

  #[test]
  fn test_zero_size_requests() {
    let mut heap = arena_heap(1024);

    let a = heap.allocate(0).unwrap();
    let b = heap.allocate(0).unwrap();
    assert_ne!(a, b);
    assert_eq!(unsafe { heap.usable_size(a.as_ptr()) }, Some(0));

    unsafe { heap.deallocate(a.as_ptr()) };
    assert_eq!(heap.allocate(0).unwrap(), a);

    unsafe {
      heap.deallocate(a.as_ptr());
      heap.deallocate(b.as_ptr());
    }
    assert_eq!(sizes(&heap), vec![HEADER_SIZE]);
    heap.validate().unwrap();
  }

  #[test]
  fn test_null_and_double_free_are_ignored() {
    let mut heap = arena_heap(1024);

    unsafe { heap.deallocate(std::ptr::null_mut()) };
    assert!(!heap.is_initialized());

    let a = heap.allocate(24).unwrap();
    let b = heap.allocate(24).unwrap();
    unsafe {
      heap.deallocate(std::ptr::null_mut());
      heap.deallocate(a.as_ptr());
      heap.deallocate(a.as_ptr());
    }
    assert_eq!(sizes(&heap), vec![24]);
    heap.validate().unwrap();

    let again = heap.allocate(24).unwrap();
    assert_eq!(again, a);
    assert!(heap.free_blocks().next().is_none());

    unsafe { heap.deallocate(b.as_ptr()) };
    heap.validate().unwrap();
  }

  #[test]
  fn test_pointer_outside_segment_is_ignored() {
    let mut heap = arena_heap(1024);
    let a = heap.allocate(24).unwrap();

    let mut local = [0u8; 64];
    unsafe { heap.deallocate(local.as_mut_ptr().add(HEADER_SIZE)) };

    assert!(heap.free_blocks().next().is_none());
    unsafe { heap.deallocate(a.as_ptr()) };
    assert_eq!(sizes(&heap), vec![24]);
  }

  #[test]
  fn test_sentinel_payload_free_is_ignored() {
    let mut heap = arena_heap(1024);
    let a = heap.allocate(16).unwrap();
    let _guard = heap.allocate(16).unwrap();
    unsafe { heap.deallocate(a.as_ptr()) };

    let sentinel_payload = heap.segment().base().unwrap().as_ptr().wrapping_add(HEADER_SIZE);
    unsafe { heap.deallocate(sentinel_payload) };

    assert_eq!(sizes(&heap), vec![16]);
    heap.validate().unwrap();
  }

  #[test]
  fn test_block_below_root_has_no_insertion_point() {
    let arena = Arena::with_capacity(4096);
    let mut older = Heap::new(&arena);
    let mut newer = Heap::new(&arena);

    let below = older.allocate(32).unwrap();
    let own = newer.allocate(32).unwrap();
    let _guard = newer.allocate(32).unwrap();
    unsafe { newer.deallocate(own.as_ptr()) };

    unsafe { newer.deallocate(below.as_ptr()) };

    assert_eq!(sizes(&newer), vec![32]);
    assert_eq!(unsafe { older.usable_size(below.as_ptr()) }, Some(32));
    newer.validate().unwrap();

    unsafe { older.deallocate(below.as_ptr()) };
    assert_eq!(sizes(&older), vec![32]);
    older.validate().unwrap();
  }

  #[test]
  fn test_out_of_memory_leaves_heap_usable() {
    let mut heap = arena_heap(4 * HEADER_SIZE + 64);

    let a = heap.allocate(64).unwrap();
    let stats = heap.stats();

    assert_eq!(
      heap.allocate(64),
      Err(HeapError::OutOfMemory {
        increment: HEADER_SIZE + 64
      })
    );
    assert_eq!(heap.stats(), stats);
    heap.validate().unwrap();

    unsafe { heap.deallocate(a.as_ptr()) };
    assert_eq!(heap.allocate(64).unwrap(), a);
  }

  #[test]
  fn test_out_of_memory_before_sentinel() {
    let mut heap = arena_heap(HEADER_SIZE / 2);

    assert!(matches!(
      heap.allocate(8),
      Err(HeapError::OutOfMemory { .. })
    ));
    assert!(!heap.is_initialized());
  }

  #[test]
  fn test_size_overflow() {
    let mut heap = arena_heap(1024);

    assert_eq!(
      heap.allocate(usize::MAX),
      Err(HeapError::SizeOverflow {
        requested: usize::MAX
      })
    );

    let huge = usize::MAX - HEADER_SIZE + 1;
    assert!(matches!(
      heap.allocate(huge),
      Err(HeapError::SizeOverflow { .. })
    ));
  }

  #[test]
  fn test_validate_detects_corruption() {
    let mut heap = arena_heap(1024);

    let a = heap.allocate(16).unwrap();
    let _g = heap.allocate(16).unwrap();
    unsafe { heap.deallocate(a.as_ptr()) };
    heap.validate().unwrap();

    let at = segment::header_offset(heap.segment(), a).unwrap();
    let mut block = heap.load(at);
    block.is_free = false;
    heap.store(at, block);

    assert_eq!(
      heap.validate(),
      Err(HeapError::Corrupted {
        offset: at,
        reason: "allocated block in free list"
      })
    );
  }

  #[test]
  fn test_payload_is_writable() {
    let mut heap = arena_heap(4096);

    let a = heap.allocate(64).unwrap();
    let b = heap.allocate(64).unwrap();

    unsafe {
      a.as_ptr().write_bytes(0x33, 64);
      b.as_ptr().write_bytes(0x55, 64);
      for i in 0..64 {
        assert_eq!(a.as_ptr().add(i).read(), 0x33);
      }
      heap.deallocate(b.as_ptr());
      for i in 0..64 {
        assert_eq!(a.as_ptr().add(i).read(), 0x33);
      }
    }
    heap.validate().unwrap();
  }

  #[test]
  fn test_per_thread_heaps_on_one_arena_never_alias() {
    let arena = Arc::new(Arena::with_capacity(256 * 1024));

    let handles: Vec<_> = (0..2)
      .map(|_| {
        let arena = Arc::clone(&arena);
        thread::spawn(move || {
          let mut heap = Heap::new(arena);
          let ptrs: Vec<_> = [16, 64, 32, 128]
            .iter()
            .cycle()
            .take(64)
            .map(|&size| heap.allocate(size).unwrap())
            .collect();

          for ptr in ptrs.iter().step_by(2) {
            unsafe { heap.deallocate(ptr.as_ptr()) };
          }
          heap.validate().unwrap();

          let freed: HashSet<usize> = ptrs
            .iter()
            .step_by(2)
            .map(|ptr| ptr.addr().get())
            .collect();
          for block in heap.free_blocks() {
            assert!(freed.contains(&block.payload.addr().get()));
          }

          ptrs.iter().map(|ptr| ptr.addr().get()).collect::<Vec<_>>()
        })
      })
      .collect();

    let results: Vec<Vec<usize>> = handles
      .into_iter()
      .map(|handle| handle.join().unwrap())
      .collect();

    let first: HashSet<_> = results[0].iter().copied().collect();
    assert!(results[1].iter().all(|addr| !first.contains(addr)));
  }

  #[test]
  fn test_program_break_refusal_leaves_heap_usable() {
    let mut heap = Heap::new(ProgramBreak::new());
    let a = heap.allocate(24).unwrap();

    assert_eq!(
      heap.allocate(1 << 46),
      Err(HeapError::OutOfMemory {
        increment: HEADER_SIZE + (1 << 46)
      })
    );
    heap.validate().unwrap();

    let b = heap.allocate(8).unwrap();
    assert_ne!(a, b);
    unsafe {
      heap.deallocate(a.as_ptr());
      heap.deallocate(b.as_ptr());
    }
    heap.validate().unwrap();
  }

  #[test]
  fn test_program_break_heap() {
    let mut heap = Heap::new(ProgramBreak::new());

    let a = heap.allocate(40).unwrap();
    let b = heap.allocate(40).unwrap();
    assert_ne!(a, b);

    unsafe { heap.deallocate(a.as_ptr()) };
    assert_eq!(heap.allocate(40).unwrap(), a);

    unsafe {
      heap.deallocate(a.as_ptr());
      heap.deallocate(b.as_ptr());
    }
    heap.validate().unwrap();
  }
}
