//! Boundary-tag block layout.
//!
//! ```text
//!   One block (size = S, a multiple of ALIGNMENT):
//!
//!   ┌──────────┬──────────────────────────────────────┬──────────┐
//!   │  header  │               payload                │  footer  │
//!   │ (S | a)  │            S - DSIZE bytes           │ (S | a)  │
//!   └──────────┴──────────────────────────────────────┴──────────┘
//!   ▲          ▲
//!   hdr        bp (payload offset, what a Block holds)
//! ```
//!
//! The size lives in the high bits of each boundary word and bit 0 is the
//! allocated flag. The footer mirrors the header so the previous block can
//! be reached by reading the word just below our own header.

use std::mem;

/// One boundary word.
pub(crate) type Word = u64;

pub(crate) const WSIZE: usize = mem::size_of::<Word>();
pub(crate) const DSIZE: usize = 2 * WSIZE;

/// Alignment unit of every block size and payload offset.
pub const ALIGNMENT: usize = DSIZE;

/// Smallest block the heap will ever carve: header, footer and one
/// double word of payload.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

const ALLOCATED: Word = 0x1;
const SIZE_MASK: Word = !(ALIGNMENT as Word - 1);

pub(crate) fn pack(
  size: usize,
  allocated: bool,
) -> Word {
  size as Word | if allocated { ALLOCATED } else { 0 }
}

pub(crate) fn unpack(word: Word) -> (usize, bool) {
  ((word & SIZE_MASK) as usize, word & ALLOCATED != 0)
}

/// Reads the boundary word at `at`.
///
/// Panics if `at` lies outside the committed bytes, which only happens when
/// the caller broke the release/resize contract and trampled metadata.
pub(crate) fn get(
  mem: &[u8],
  at: usize,
) -> Word {
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(&mem[at..at + WSIZE]);
  Word::from_ne_bytes(word)
}

/// Non-panicking [`get`] for the consistency checker.
pub(crate) fn try_get(
  mem: &[u8],
  at: usize,
) -> Option<Word> {
  let bytes = mem.get(at..at.checked_add(WSIZE)?)?;
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(bytes);
  Some(Word::from_ne_bytes(word))
}

pub(crate) fn put(
  mem: &mut [u8],
  at: usize,
  word: Word,
) {
  mem[at..at + WSIZE].copy_from_slice(&word.to_ne_bytes());
}

/// A block, named by the offset of its payload inside the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Block(pub(crate) usize);

impl Block {
  pub(crate) fn offset(self) -> usize {
    self.0
  }

  pub(crate) fn header(self) -> usize {
    self.0 - WSIZE
  }

  pub(crate) fn size(
    self,
    mem: &[u8],
  ) -> usize {
    unpack(get(mem, self.header())).0
  }

  pub(crate) fn is_allocated(
    self,
    mem: &[u8],
  ) -> bool {
    unpack(get(mem, self.header())).1
  }

  /// The block that starts right after this one.
  pub(crate) fn next(
    self,
    mem: &[u8],
  ) -> Block {
    Block(self.0 + self.size(mem))
  }

  /// The block that ends right before this one.
  ///
  /// `floor` is the lowest block that may be returned (the prologue). Asking
  /// for the predecessor of `floor` itself, or following a footer that points
  /// below it, yields `None` instead of reading memory before the heap.
  pub(crate) fn prev(
    self,
    mem: &[u8],
    floor: Block,
  ) -> Option<Block> {
    if self <= floor {
      return None;
    }

    let (size, _) = unpack(get(mem, self.0 - DSIZE));
    let prev = Block(self.0.checked_sub(size)?);

    (prev >= floor && prev < self).then_some(prev)
  }

  /// Writes matching header and footer words for a block of `size` bytes.
  pub(crate) fn set(
    self,
    mem: &mut [u8],
    size: usize,
    allocated: bool,
  ) {
    let word = pack(size, allocated);
    put(mem, self.header(), word);
    put(mem, self.0 + size - DSIZE, word);
  }

  /// Flips the allocated flag, keeping the size.
  pub(crate) fn mark(
    self,
    mem: &mut [u8],
    allocated: bool,
  ) {
    let size = self.size(mem);
    self.set(mem, size, allocated);
  }

  /// Turns this block into the zero-sized epilogue (header only).
  pub(crate) fn set_epilogue(
    self,
    mem: &mut [u8],
  ) {
    put(mem, self.header(), pack(0, true));
  }
}

/// Steps forward from `from` until the epilogue, or until `until` if given.
pub(crate) fn walk(
  mem: &[u8],
  from: Block,
  until: Option<Block>,
) -> Walk<'_> {
  Walk {
    mem,
    next: from,
    until,
  }
}

pub(crate) struct Walk<'a> {
  mem: &'a [u8],
  next: Block,
  until: Option<Block>,
}

impl Iterator for Walk<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    let bp = self.next;

    if Some(bp) == self.until || bp.size(self.mem) == 0 {
      return None;
    }

    self.next = bp.next(self.mem);
    Some(bp)
  }
}
