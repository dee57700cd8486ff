//! Free-space management: finding, carving and merging free blocks.
//!
//! There is no free list. Free blocks are found by walking the block
//! sequence, and every block freed (or created by growth) is merged with its
//! free neighbours immediately, so two free blocks are never adjacent.

use crate::{
  arena::Arena,
  block::{Block, MIN_BLOCK_SIZE, walk},
  config::SearchPolicy,
  heap::Heap,
};

impl<A: Arena> Heap<A> {
  /// Finds a free block of at least `asize` bytes.
  ///
  /// Next-fit scans from the cursor to the epilogue, then from the first
  /// block up to the cursor. First-fit scans the whole heap from the start.
  pub(crate) fn find_fit(
    &self,
    asize: usize,
  ) -> Option<Block> {
    let mem = self.arena.as_slice();
    let fits = |bp: &Block| !bp.is_allocated(mem) && bp.size(mem) >= asize;
    let first = self.first_block();

    match self.config.search {
      SearchPolicy::FirstFit => walk(mem, first, None).find(fits),
      SearchPolicy::NextFit => walk(mem, self.cursor, None)
        .find(fits)
        .or_else(|| walk(mem, first, Some(self.cursor)).find(fits)),
    }
  }

  /// Marks `asize` bytes of the free block `bp` as allocated.
  ///
  /// The tail is split off as a new free block when it can hold a minimum
  /// block; otherwise the whole block is handed out.
  pub(crate) fn place(
    &mut self,
    bp: Block,
    asize: usize,
  ) {
    let mem = self.arena.as_mut_slice();
    let csize = bp.size(mem);

    if csize - asize >= MIN_BLOCK_SIZE {
      bp.set(mem, asize, true);
      bp.next(mem).set(mem, csize - asize, false);
    } else {
      bp.set(mem, csize, true);
    }

    self.cursor = bp;
  }

  /// Merges the free block `bp` with whichever neighbours are free and
  /// returns the surviving block. The cursor always lands on the survivor.
  pub(crate) fn coalesce(
    &mut self,
    bp: Block,
  ) -> Block {
    let prologue = self.prologue;
    let mem = self.arena.as_mut_slice();
    let size = bp.size(mem);

    let prev = bp
      .prev(mem, prologue)
      .filter(|prev| !prev.is_allocated(mem));
    let next = Some(bp.next(mem)).filter(|next| !next.is_allocated(mem));

    let merged = match (prev, next) {
      (None, None) => bp,
      (None, Some(next)) => {
        let size = size + next.size(mem);
        bp.set(mem, size, false);
        bp
      }
      (Some(prev), None) => {
        let size = prev.size(mem) + size;
        prev.set(mem, size, false);
        prev
      }
      (Some(prev), Some(next)) => {
        let size = prev.size(mem) + size + next.size(mem);
        prev.set(mem, size, false);
        prev
      }
    };

    self.cursor = merged;
    merged
  }
}
