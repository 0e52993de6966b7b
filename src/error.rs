use thiserror::Error;

/// Failures reported by the heap engine and its segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
  /// The segment refused to grow.
  #[error("segment cannot grow by {increment} bytes")]
  OutOfMemory { increment: usize },

  /// Header plus payload does not fit the address arithmetic.
  #[error("request of {requested} bytes overflows the block layout")]
  SizeOverflow { requested: usize },

  /// Raised by [`Heap::validate`](crate::Heap::validate) only.
  #[error("free list corrupted at offset {offset:#x}: {reason}")]
  Corrupted { offset: usize, reason: &'static str },
}
