use std::mem;

/// Alignment every block header is kept at: one machine word.
pub const HEADER_ALIGN: usize = mem::align_of::<usize>();

/// Rounds a request up to the next multiple of the machine word.
///
/// Returns `None` when the rounded value does not fit in `usize`.
///
/// # Examples
///
/// ```rust
/// use std::mem;
/// use brkalloc::align::align_up;
///
/// match mem::size_of::<usize>() {
///     8 => assert_eq!(align_up(13), Some(16)), // 64 bit machine.
///     4 => assert_eq!(align_up(11), Some(12)), // 32 bit machine.
///     _ => {},
/// };
/// assert_eq!(align_up(usize::MAX), None);
/// ```
pub const fn align_up(value: usize) -> Option<usize> {
  match value.checked_add(HEADER_ALIGN - 1) {
    Some(padded) => Some(padded & !(HEADER_ALIGN - 1)),
    None => None,
  }
}

/// Number of bytes needed to move `addr` up to the header alignment.
pub const fn padding_for(addr: usize) -> usize {
  (HEADER_ALIGN - addr % HEADER_ALIGN) % HEADER_ALIGN
}
