//! Allocation errors.

use thiserror::Error;

use crate::{
  arena::ArenaError,
  block::{ALIGNMENT, MIN_BLOCK_SIZE},
};

/// Errors returned by [`Heap`](crate::Heap) operations.
///
/// Only [`OutOfMemory`](AllocError::OutOfMemory) and
/// [`TooLarge`](AllocError::TooLarge) describe a heap that could not satisfy
/// a legal request. Releasing or resizing an address the heap never handed
/// out is a caller bug and is not reported here.
#[derive(Debug, Error)]
pub enum AllocError {
  /// Zero-byte requests never create a block.
  #[error("cannot allocate zero bytes")]
  ZeroSize,

  /// The request is so large its block size overflows `usize`.
  #[error("request of {requested} bytes exceeds the largest block size")]
  TooLarge { requested: usize },

  /// The arena refused to grow.
  #[error("out of memory")]
  OutOfMemory(#[from] ArenaError),

  /// The configured growth chunk cannot hold whole aligned blocks.
  #[error(
    "chunk size {0} must be a multiple of {align} and at least {min}",
    align = ALIGNMENT,
    min = MIN_BLOCK_SIZE
  )]
  InvalidChunkSize(usize),

  /// The arena's break address is not on an alignment boundary, so
  /// payload addresses could not be aligned.
  #[error("arena break {0:#x} is not aligned to {align} bytes", align = ALIGNMENT)]
  MisalignedArena(usize),
}
