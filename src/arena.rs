//! The growable byte range the heap is carved out of.
//!
//! The heap never talks to the operating system directly. It asks an
//! [`Arena`] for more bytes the same way a C allocator calls `sbrk`, and
//! reads and writes block metadata through the arena's committed slice.

use std::{io, ptr, ptr::NonNull, slice};

use thiserror::Error;

/// Errors reported by an [`Arena`].
#[derive(Debug, Error)]
pub enum ArenaError {
  /// The arena cannot commit the requested number of bytes.
  #[error("arena exhausted: requested {requested} bytes, {remaining} bytes remaining")]
  Exhausted {
    /// Bytes asked for by the failed growth.
    requested: usize,
    /// Bytes still available before the arena hits its capacity.
    remaining: usize,
  },
  /// The backing reservation could not be mapped.
  #[error("failed to map {size} bytes for the arena")]
  Map {
    size: usize,
    #[source]
    source: io::Error,
  },
}

/// A contiguous, growable byte range with a movable break.
///
/// Offsets handed out by [`grow`](Arena::grow) are relative to the arena's
/// low boundary, so `as_slice()[offset]` is the first newly committed byte.
pub trait Arena {
  /// Commits `incr` more bytes and returns the previous break offset.
  fn grow(
    &mut self,
    incr: usize,
  ) -> Result<usize, ArenaError>;

  /// Moves the break back to the low boundary.
  fn reset(&mut self);

  /// Address of the first committed byte.
  fn lo(&self) -> *const u8;

  /// Address of the last committed byte (`lo() - 1` when empty).
  fn hi(&self) -> *const u8 {
    self.lo().wrapping_add(self.size()).wrapping_sub(1)
  }

  /// Number of committed bytes.
  fn size(&self) -> usize;

  /// Natural growth granularity of the underlying resource.
  fn page_size(&self) -> usize;

  fn as_slice(&self) -> &[u8];

  fn as_mut_slice(&mut self) -> &mut [u8];
}

/// An [`Arena`] backed by one anonymous `mmap` reservation.
///
/// ```text
///   base                     base + brk                 base + capacity
///   ├──────── committed ─────────┼──────── reserved ──────────┤
///   │  prologue │ blocks ... │ E │                            │
///   └───────────────────────────┴────────────────────────────┘
/// ```
///
/// The whole capacity is reserved up front with `MAP_NORESERVE`, so pages
/// are only backed once the heap touches them. Growing never moves the
/// base, which keeps absolute payload addresses stable across growth.
pub struct MemArena {
  base: NonNull<u8>,
  brk: usize,
  capacity: usize,
  page_size: usize,
}

impl MemArena {
  /// Default reservation: 20 MiB.
  pub const DEFAULT_CAPACITY: usize = 20 * (1 << 20);

  /// Reserves an arena of [`DEFAULT_CAPACITY`](Self::DEFAULT_CAPACITY) bytes.
  pub fn new() -> Result<Self, ArenaError> {
    Self::with_capacity(Self::DEFAULT_CAPACITY)
  }

  /// Reserves an arena of at least `capacity` bytes, rounded up to the page size.
  pub fn with_capacity(capacity: usize) -> Result<Self, ArenaError> {
    let page_size = os_page_size();
    let capacity = capacity
      .max(1)
      .checked_add(page_size - 1)
      .map(|end| end & !(page_size - 1))
      .ok_or_else(|| ArenaError::Map {
        size: capacity,
        source: io::ErrorKind::OutOfMemory.into(),
      })?;

    let base = unsafe { os_mmap(capacity) }.ok_or_else(|| ArenaError::Map {
      size: capacity,
      source: io::Error::last_os_error(),
    })?;

    Ok(Self {
      base,
      brk: 0,
      capacity,
      page_size,
    })
  }

  /// Total bytes reserved for this arena.
  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

impl Arena for MemArena {
  fn grow(
    &mut self,
    incr: usize,
  ) -> Result<usize, ArenaError> {
    let remaining = self.capacity - self.brk;

    if incr > remaining {
      return Err(ArenaError::Exhausted {
        requested: incr,
        remaining,
      });
    }

    let old_brk = self.brk;
    self.brk += incr;

    Ok(old_brk)
  }

  fn reset(&mut self) {
    self.brk = 0;
  }

  fn lo(&self) -> *const u8 {
    self.base.as_ptr()
  }

  fn size(&self) -> usize {
    self.brk
  }

  fn page_size(&self) -> usize {
    self.page_size
  }

  fn as_slice(&self) -> &[u8] {
    // SAFETY: `[base, base + brk)` lies inside the live mapping and anonymous
    // pages are zero-filled, so every byte is initialized.
    unsafe { slice::from_raw_parts(self.base.as_ptr(), self.brk) }
  }

  fn as_mut_slice(&mut self) -> &mut [u8] {
    // SAFETY: as above; `&mut self` guarantees exclusive access.
    unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
  }
}

impl Drop for MemArena {
  fn drop(&mut self) {
    unsafe { os_munmap(self.base, self.capacity) };
  }
}

fn os_page_size() -> usize {
  match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
    size if size > 0 => size as usize,
    _ => 4096,
  }
}

unsafe fn os_mmap(size: usize) -> Option<NonNull<u8>> {
  let ptr = unsafe {
    libc::mmap(
      ptr::null_mut(),
      size,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
      -1,
      0,
    )
  };

  if ptr == libc::MAP_FAILED {
    None
  } else {
    NonNull::new(ptr as *mut u8)
  }
}

unsafe fn os_munmap(
  ptr: NonNull<u8>,
  size: usize,
) {
  unsafe { libc::munmap(ptr.as_ptr().cast(), size) };
}
