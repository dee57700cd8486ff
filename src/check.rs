//! Heap inspection: block listing, statistics and a consistency checker.

use thiserror::Error;

use crate::{
  arena::Arena,
  block::{ALIGNMENT, Block, DSIZE, MIN_BLOCK_SIZE, WSIZE, pack, try_get, unpack, walk},
  heap::Heap,
};

/// One block between the prologue and the epilogue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload offset from the arena's low boundary.
  pub offset: usize,
  /// Total block size, header and footer included.
  pub size: usize,
  pub allocated: bool,
}

/// Totals over every block in the heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes committed in the arena.
  pub committed: usize,
  pub blocks: usize,
  pub free_blocks: usize,
  /// Sum of allocated block sizes, header and footer included.
  pub allocated_bytes: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

impl HeapStats {
  /// `payload_bytes / committed`, the figure a trace driver reports as
  /// utilization.
  pub fn utilization(
    &self,
    payload_bytes: usize,
  ) -> f64 {
    if self.committed == 0 {
      return 0.0;
    }

    payload_bytes as f64 / self.committed as f64
  }
}

/// A broken heap invariant found by [`Heap::check`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HeapError {
  #[error("prologue at {offset:#x} is damaged")]
  BadPrologue { offset: usize },

  #[error("block at {offset:#x} runs past the committed heap")]
  OutOfBounds { offset: usize },

  #[error("block at {offset:#x} is not aligned to {align} bytes", align = ALIGNMENT)]
  Misaligned { offset: usize },

  #[error("block at {offset:#x} has invalid size {size}")]
  BadSize { offset: usize, size: usize },

  #[error("block at {offset:#x}: header {header:#x} disagrees with footer {footer:#x}")]
  HeaderFooterMismatch {
    offset: usize,
    header: u64,
    footer: u64,
  },

  #[error("free blocks at {first:#x} and {second:#x} were not coalesced")]
  Uncoalesced { first: usize, second: usize },

  #[error("epilogue header at {offset:#x} does not end the heap at {brk:#x}")]
  BadEpilogue { offset: usize, brk: usize },

  #[error("blocks cover {covered} bytes but {committed} bytes are committed")]
  SizeMismatch { covered: usize, committed: usize },

  #[error("search cursor {offset:#x} does not name a block")]
  DanglingCursor { offset: usize },
}

/// Bytes outside any block: padding word, prologue, epilogue header.
const OVERHEAD: usize = 4 * WSIZE;

impl<A: Arena> Heap<A> {
  /// Blocks in address order, sentinels excluded.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    let mem = self.arena.as_slice();

    walk(mem, self.first_block(), None).map(move |bp| BlockInfo {
      offset: bp.offset(),
      size: bp.size(mem),
      allocated: bp.is_allocated(mem),
    })
  }

  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(
      HeapStats {
        committed: self.arena.size(),
        ..HeapStats::default()
      },
      |mut stats, block| {
        stats.blocks += 1;
        if block.allocated {
          stats.allocated_bytes += block.size;
        } else {
          stats.free_blocks += 1;
          stats.free_bytes += block.size;
          stats.largest_free = stats.largest_free.max(block.size);
        }
        stats
      },
    )
  }

  /// Walks the whole heap and reports the first broken invariant.
  ///
  /// Never called by the allocation paths; it exists for tests and for
  /// callers chasing a corruption bug.
  pub fn check(&self) -> Result<(), HeapError> {
    let mem = self.arena.as_slice();
    let brk = mem.len();
    let base = self.arena.lo() as usize;
    let prologue = self.prologue;
    let sentinel = Some(pack(DSIZE, true));

    if try_get(mem, prologue.header()) != sentinel || try_get(mem, prologue.offset()) != sentinel {
      return Err(HeapError::BadPrologue {
        offset: prologue.offset(),
      });
    }

    let mut bp = self.first_block();
    let mut covered = 0;
    let mut prev_free: Option<Block> = None;
    let mut cursor_seen = false;

    loop {
      let offset = bp.offset();
      let header = try_get(mem, bp.header()).ok_or(HeapError::OutOfBounds { offset })?;
      let (size, allocated) = unpack(header);

      if size == 0 {
        if !allocated || offset != brk {
          return Err(HeapError::BadEpilogue {
            offset: bp.header(),
            brk,
          });
        }
        break;
      }

      if (base + offset) % ALIGNMENT != 0 {
        return Err(HeapError::Misaligned { offset });
      }
      if size < MIN_BLOCK_SIZE {
        return Err(HeapError::BadSize { offset, size });
      }

      let end = offset
        .checked_add(size)
        .filter(|end| *end <= brk)
        .ok_or(HeapError::OutOfBounds { offset })?;
      let footer = try_get(mem, end - DSIZE).ok_or(HeapError::OutOfBounds { offset })?;

      if header != footer {
        return Err(HeapError::HeaderFooterMismatch {
          offset,
          header,
          footer,
        });
      }

      if allocated {
        prev_free = None;
      } else {
        if let Some(prev) = prev_free {
          return Err(HeapError::Uncoalesced {
            first: prev.offset(),
            second: offset,
          });
        }
        prev_free = Some(bp);
      }

      cursor_seen |= bp == self.cursor;
      covered += size;
      bp = Block(end);
    }

    let committed = brk - (prologue.offset() - DSIZE);
    if covered + OVERHEAD != committed {
      return Err(HeapError::SizeMismatch { covered, committed });
    }

    if !cursor_seen {
      return Err(HeapError::DanglingCursor {
        offset: self.cursor.offset(),
      });
    }

    Ok(())
  }
}
