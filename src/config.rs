//! Heap configuration.

use crate::{
  block::{ALIGNMENT, MIN_BLOCK_SIZE},
  error::AllocError,
};

/// Where a free-block search starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchPolicy {
  /// Resume from the block the last placement or merge touched, wrapping
  /// around to the start of the heap once.
  #[default]
  NextFit,
  /// Always scan from the first block after the prologue.
  FirstFit,
}

/// Tunables for a [`Heap`](crate::Heap).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
  /// Minimum number of bytes requested from the arena when no free block
  /// fits. Larger requests grow the arena by exactly their adjusted size.
  ///
  /// Must be a multiple of [`ALIGNMENT`] and at least [`MIN_BLOCK_SIZE`].
  pub chunk_size: usize,

  /// Free-block search policy.
  pub search: SearchPolicy,
}

impl HeapConfig {
  /// Default growth chunk: 4 KiB.
  pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

  pub fn new() -> Self {
    Self {
      chunk_size: Self::DEFAULT_CHUNK_SIZE,
      search: SearchPolicy::default(),
    }
  }

  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_search(
    mut self,
    search: SearchPolicy,
  ) -> Self {
    self.search = search;
    self
  }

  pub(crate) fn validate(&self) -> Result<(), AllocError> {
    if self.chunk_size < MIN_BLOCK_SIZE || self.chunk_size % ALIGNMENT != 0 {
      return Err(AllocError::InvalidChunkSize(self.chunk_size));
    }

    Ok(())
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::new()
  }
}
