use std::mem;

/// Link value meaning "no block".
pub const NIL: usize = usize::MAX;

/// Bytes taken by every header, sentinel included.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

/// Header prefixing every region carved from a segment.
///
/// `prev` and `next` are segment offsets of the neighbouring free blocks.
/// They only mean something while the block sits in a free list; allocated
/// blocks carry `NIL` in both.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
  pub size: usize,
  pub is_free: bool,
  pub prev: usize,
  pub next: usize,
}

impl Block {
  pub fn new(
    size: usize,
    is_free: bool,
    prev: usize,
    next: usize,
  ) -> Self {
    Self {
      size,
      is_free,
      prev,
      next,
    }
  }

  /// The zero-size anchor of a free list.
  pub fn sentinel() -> Self {
    Self::new(0, true, NIL, NIL)
  }

  /// A freshly carved block owned by the caller, linked nowhere.
  pub fn allocated(size: usize) -> Self {
    Self::new(size, false, NIL, NIL)
  }

  pub fn next(&self) -> Option<usize> {
    (self.next != NIL).then_some(self.next)
  }

  /// Offset one past the payload of a block sitting at `at`.
  pub fn end(
    &self,
    at: usize,
  ) -> usize {
    at + HEADER_SIZE + self.size
  }

  /// Whether a block at `next_at` starts exactly where this one (at `at`) ends.
  pub fn is_adjacent(
    &self,
    at: usize,
    next_at: usize,
  ) -> bool {
    self.end(at) == next_at
  }
}
