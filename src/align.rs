/// Rounds `value` up to the next multiple of `align`.
///
/// `align` must be a power of two.
///
/// # Examples
///
/// ```rust
/// use rheap::align_to;
///
/// assert_eq!(align_to!(13, 8), 16);
/// assert_eq!(align_to!(16, 8), 16);
/// assert_eq!(align_to!(0, 4096), 0);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Rounds `value` up to the heap's alignment unit ([`ALIGNMENT`](crate::ALIGNMENT)).
///
/// Every block size and every payload offset handed out by the heap is a
/// multiple of this unit.
///
/// # Examples
///
/// ```rust
/// use rheap::align;
///
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::ALIGNMENT)
  };
}
