/// Granularity of every block size and payload address handed out by the heap.
pub const ALIGNMENT: usize = 16;

/// Rounds `value` up to the next multiple of [`ALIGNMENT`].
///
/// Usable in const context. Wraps on overflow; request paths go through
/// [`round_up`] instead.
///
/// # Examples
///
/// ```rust
/// use rmalloc::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(10000), 10000);
/// assert_eq!(align!(10001), 10016);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}

/// Rounds `value` up to the next multiple of `align`, which must be a power of two.
///
/// ```rust
/// use rmalloc::align_to;
///
/// assert_eq!(align_to!(5, 8), 8);
/// assert_eq!(align_to!(4096, 4096), 4096);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Checked version of [`align!`] for caller supplied sizes.
pub fn round_up(size: usize) -> Option<usize> {
  size
    .checked_add(ALIGNMENT - 1)
    .map(|padded| padded & !(ALIGNMENT - 1))
}

pub fn is_aligned(value: usize) -> bool {
  value & (ALIGNMENT - 1) == 0
}
