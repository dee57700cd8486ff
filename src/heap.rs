use tracing::{debug, trace};

use crate::{
  align,
  arena::{Arena, MemArena},
  block::{ALIGNMENT, Block, DSIZE, MIN_BLOCK_SIZE, WSIZE, put},
  config::HeapConfig,
  error::AllocError,
};

/// A payload handed out by [`Heap::allocate`] or [`Heap::resize`].
///
/// It is the payload's byte offset from the arena's low boundary. The
/// payload's address (low boundary plus offset) is always a multiple of
/// [`ALIGNMENT`]. Use [`Heap::payload`] and [`Heap::payload_mut`] to reach
/// the bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Payload(usize);

impl Payload {
  pub fn offset(self) -> usize {
    self.0
  }

  pub(crate) fn block(self) -> Block {
    Block(self.0)
  }
}

/// An implicit-free-list heap over an [`Arena`].
///
/// ```text
///   ┌─────┬──────────┬─────────┬─────────┬─────────┬─────┐
///   │ pad │ prologue │ block 1 │ block 2 │   ...   │  E  │
///   └─────┴──────────┴─────────┴─────────┴─────────┴─────┘
///   ▲                 ▲                              ▲
///   arena low          first block                   epilogue header
///                                                    (last word committed)
/// ```
///
/// # Caller contract
///
/// [`release`](Heap::release) and [`resize`](Heap::resize) must only see
/// payloads this heap returned and has not released since. Breaking that
/// corrupts the heap; it is not detected.
pub struct Heap<A: Arena = MemArena> {
  pub(crate) arena: A,
  pub(crate) config: HeapConfig,
  pub(crate) prologue: Block,
  pub(crate) cursor: Block,
}

impl<A: Arena> Heap<A> {
  /// Builds a heap on `arena` with the default configuration.
  pub fn new(arena: A) -> Result<Self, AllocError> {
    Self::with_config(arena, HeapConfig::default())
  }

  pub fn with_config(
    arena: A,
    config: HeapConfig,
  ) -> Result<Self, AllocError> {
    config.validate()?;

    let mut heap = Self {
      arena,
      config,
      prologue: Block(0),
      cursor: Block(0),
    };

    heap.bootstrap()?;
    Ok(heap)
  }

  /// Lays down the padding word, the prologue and an epilogue, then grows
  /// the heap by one chunk.
  fn bootstrap(&mut self) -> Result<(), AllocError> {
    let brk = self.arena.lo() as usize + self.arena.size();
    if brk % ALIGNMENT != 0 {
      return Err(AllocError::MisalignedArena(brk));
    }

    let start = self.arena.grow(4 * WSIZE)?;
    let mem = self.arena.as_mut_slice();

    put(mem, start, 0);
    let prologue = Block(start + DSIZE);
    prologue.set(mem, DSIZE, true);
    let first = prologue.next(mem);
    first.set_epilogue(mem);

    self.prologue = prologue;
    self.cursor = first;

    self.extend(self.config.chunk_size / WSIZE)?;

    debug!(
      start,
      chunk_size = self.config.chunk_size,
      search = ?self.config.search,
      "heap initialized"
    );
    Ok(())
  }

  pub(crate) fn first_block(&self) -> Block {
    Block(self.prologue.offset() + DSIZE)
  }

  /// Grows the arena by `words` words (rounded up to an even count) and
  /// returns the free block covering the new space, merged with a free
  /// block that ended at the old epilogue.
  fn extend(
    &mut self,
    words: usize,
  ) -> Result<Block, AllocError> {
    let size = if words % 2 == 1 {
      (words + 1) * WSIZE
    } else {
      words * WSIZE
    };

    let bp = match self.arena.grow(size) {
      Ok(old_brk) => Block(old_brk),
      Err(err) => {
        debug!(requested = size, error = %err, "arena exhausted");
        return Err(err.into());
      }
    };

    let mem = self.arena.as_mut_slice();
    bp.set(mem, size, false);
    bp.next(mem).set_epilogue(mem);
    self.cursor = bp;

    trace!(bytes = size, brk = self.arena.size(), "arena grown");

    Ok(self.coalesce(bp))
  }

  /// Allocates a block with at least `size` bytes of payload.
  ///
  /// Fails with [`AllocError::ZeroSize`] for zero-byte requests and
  /// [`AllocError::OutOfMemory`] when the arena cannot grow. A failed
  /// allocation leaves the heap as it was.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Payload, AllocError> {
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let asize = adjusted_size(size).ok_or(AllocError::TooLarge { requested: size })?;

    let bp = match self.find_fit(asize) {
      Some(bp) => bp,
      None => self.extend(asize.max(self.config.chunk_size) / WSIZE)?,
    };

    self.place(bp, asize);
    Ok(Payload(bp.offset()))
  }

  /// Returns a block to the heap and merges it with free neighbours.
  pub fn release(
    &mut self,
    payload: Payload,
  ) {
    let bp = payload.block();
    bp.mark(self.arena.as_mut_slice(), false);
    self.coalesce(bp);
  }

  /// Changes the payload size of a block, moving it only when it cannot grow
  /// in place.
  ///
  /// - `None` behaves as [`allocate`](Heap::allocate).
  /// - `size == 0` releases the block and returns `Ok(None)`.
  /// - A size that still fits returns the same payload; blocks never shrink.
  /// - A free successor large enough to cover the growth is absorbed.
  /// - Otherwise the payload is copied into a new block and the old one is
  ///   released. If that allocation fails the old block is left untouched.
  pub fn resize(
    &mut self,
    payload: Option<Payload>,
    size: usize,
  ) -> Result<Option<Payload>, AllocError> {
    let Some(payload) = payload else {
      return self.allocate(size).map(Some);
    };

    if size == 0 {
      self.release(payload);
      return Ok(None);
    }

    let asize = adjusted_size(size).ok_or(AllocError::TooLarge { requested: size })?;
    let bp = payload.block();
    let mem = self.arena.as_mut_slice();
    let old_size = bp.size(mem);

    if asize <= old_size {
      return Ok(Some(payload));
    }

    let next = bp.next(mem);
    let grown = old_size + next.size(mem);

    if !next.is_allocated(mem) && grown >= asize {
      bp.set(mem, grown, true);
      if self.cursor == next {
        self.cursor = bp;
      }
      return Ok(Some(payload));
    }

    let moved = self.allocate(size)?;
    let len = (old_size - DSIZE).min(size);

    self
      .arena
      .as_mut_slice()
      .copy_within(payload.0..payload.0 + len, moved.0);
    self.release(payload);

    trace!(from = payload.0, to = moved.0, bytes = len, "block relocated");
    Ok(Some(moved))
  }

  /// The full usable payload of a live block.
  pub fn payload(
    &self,
    payload: Payload,
  ) -> &[u8] {
    let mem = self.arena.as_slice();
    let len = payload.block().size(mem) - DSIZE;
    &mem[payload.0..payload.0 + len]
  }

  pub fn payload_mut(
    &mut self,
    payload: Payload,
  ) -> &mut [u8] {
    let mem = self.arena.as_mut_slice();
    let len = payload.block().size(mem) - DSIZE;
    &mut mem[payload.0..payload.0 + len]
  }

  /// Payload bytes available in a live block; at least what was requested.
  pub fn usable_size(
    &self,
    payload: Payload,
  ) -> usize {
    payload.block().size(self.arena.as_slice()) - DSIZE
  }

  /// Empties the arena and lays the heap down again. Every outstanding
  /// payload becomes invalid.
  pub fn reset(&mut self) -> Result<(), AllocError> {
    self.arena.reset();
    self.bootstrap()
  }

  pub fn arena(&self) -> &A {
    &self.arena
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn into_arena(self) -> A {
    self.arena
  }
}

/// Block size needed for `size` payload bytes: header and footer included,
/// rounded to the alignment unit, never below the minimum block.
fn adjusted_size(size: usize) -> Option<usize> {
  if size <= DSIZE {
    return Some(MIN_BLOCK_SIZE);
  }

  size
    .checked_add(DSIZE)
    .filter(|size| *size <= usize::MAX - ALIGNMENT)
    .map(|size| align!(size))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    arena::ArenaError,
    check::BlockInfo,
    config::SearchPolicy,
  };

  fn heap() -> Heap {
    Heap::new(MemArena::with_capacity(1 << 20).unwrap()).unwrap()
  }

  fn fill(
    heap: &mut Heap,
    payload: Payload,
    len: usize,
  ) {
    for (i, byte) in heap.payload_mut(payload)[..len].iter_mut().enumerate() {
      *byte = i as u8;
    }
  }

  fn is_filled(
    heap: &Heap,
    payload: Payload,
    len: usize,
  ) -> bool {
    heap.payload(payload)[..len]
      .iter()
      .enumerate()
      .all(|(i, byte)| *byte == i as u8)
  }

  #[test]
  fn test_adjusted_size() {
    assert_eq!(adjusted_size(1), Some(32));
    assert_eq!(adjusted_size(16), Some(32));
    assert_eq!(adjusted_size(17), Some(48));
    assert_eq!(adjusted_size(100), Some(128));
    assert_eq!(adjusted_size(4080), Some(4096));
    assert_eq!(adjusted_size(usize::MAX), None);
    assert_eq!(adjusted_size(usize::MAX - DSIZE + 1), None);
    assert_eq!(
      adjusted_size(usize::MAX - DSIZE - ALIGNMENT),
      Some(usize::MAX - ALIGNMENT + 1)
    );
  }

  #[test]
  fn test_init_layout() {
    let heap = heap();

    assert_eq!(heap.arena().size(), 4 * WSIZE + HeapConfig::DEFAULT_CHUNK_SIZE);
    assert_eq!(
      heap.blocks().collect::<Vec<_>>(),
      vec![BlockInfo {
        offset: 32,
        size: 4096,
        allocated: false,
      }]
    );
    assert_eq!(heap.cursor, heap.first_block());
    assert_eq!(heap.check(), Ok(()));
  }

  /// An arena over a `Vec<u8>` whose low boundary starts `start` bytes in.
  struct VecArena {
    buf: Vec<u8>,
    start: usize,
    brk: usize,
  }

  impl VecArena {
    /// Picks `start` so that `lo()` sits 8 bytes past a 16-byte boundary.
    fn misaligned(capacity: usize) -> Self {
      let buf = vec![0u8; capacity + ALIGNMENT];
      let start = (ALIGNMENT + WSIZE - buf.as_ptr() as usize % ALIGNMENT) % ALIGNMENT;

      Self { buf, start, brk: 0 }
    }
  }

  impl Arena for VecArena {
    fn grow(
      &mut self,
      incr: usize,
    ) -> Result<usize, ArenaError> {
      let remaining = self.buf.len() - self.start - self.brk;

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
      self.buf[self.start..].as_ptr()
    }

    fn size(&self) -> usize {
      self.brk
    }

    fn page_size(&self) -> usize {
      4096
    }

    fn as_slice(&self) -> &[u8] {
      &self.buf[self.start..self.start + self.brk]
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
      &mut self.buf[self.start..self.start + self.brk]
    }
  }

  #[test]
  fn test_init_rejects_misaligned_arena() {
    let mut arena = MemArena::with_capacity(1 << 16).unwrap();
    arena.grow(8).unwrap();
    let brk = arena.lo() as usize + 8;

    assert!(matches!(
      Heap::new(arena),
      Err(AllocError::MisalignedArena(addr)) if addr == brk
    ));
  }

  #[test]
  fn test_init_rejects_misaligned_arena_base() {
    let arena = VecArena::misaligned(1 << 16);

    assert_eq!(arena.lo() as usize % ALIGNMENT, WSIZE);
    assert!(matches!(
      Heap::new(arena),
      Err(AllocError::MisalignedArena(addr)) if addr % ALIGNMENT == WSIZE
    ));
  }

  #[test]
  fn test_init_when_break_realigns_base() {
    let mut arena = VecArena::misaligned(1 << 16);
    arena.grow(WSIZE).unwrap();

    let mut heap = Heap::new(arena).unwrap();
    let payload = heap.allocate(100).unwrap();

    assert_eq!(payload.offset() % ALIGNMENT, WSIZE);
    assert_eq!(heap.payload(payload).as_ptr() as usize % ALIGNMENT, 0);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_init_on_non_empty_aligned_arena() {
    let mut arena = MemArena::with_capacity(1 << 16).unwrap();
    arena.grow(16).unwrap();

    let mut heap = Heap::new(arena).unwrap();
    let payload = heap.allocate(16).unwrap();

    assert_eq!(payload.offset(), 48);
    assert_eq!(heap.payload(payload).as_ptr() as usize % ALIGNMENT, 0);
    assert_eq!(heap.arena().size(), 16 + 4 * WSIZE + HeapConfig::DEFAULT_CHUNK_SIZE);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_init_fails_without_room_for_a_chunk() {
    let arena = MemArena::with_capacity(1).unwrap();
    let config = HeapConfig::new().with_chunk_size(arena.capacity());

    assert!(matches!(
      Heap::with_config(arena, config),
      Err(AllocError::OutOfMemory(ArenaError::Exhausted { .. }))
    ));
  }

  #[test]
  fn test_allocate_zero() {
    let mut heap = heap();
    let before = heap.blocks().collect::<Vec<_>>();

    assert!(matches!(heap.allocate(0), Err(AllocError::ZeroSize)));
    assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
  }

  #[test]
  fn test_allocate_too_large() {
    let mut heap = heap();

    assert!(matches!(
      heap.allocate(usize::MAX),
      Err(AllocError::TooLarge { requested: usize::MAX })
    ));
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_allocate_is_aligned_and_large_enough() {
    let mut heap = heap();

    for size in [1, 7, 16, 17, 100, 255, 1000, 5000] {
      let payload = heap.allocate(size).unwrap();

      assert_eq!(payload.offset() % ALIGNMENT, 0);
      assert_eq!(heap.payload(payload).as_ptr() as usize % ALIGNMENT, 0);
      assert!(heap.usable_size(payload) >= size);
      assert_eq!(heap.payload(payload).len(), heap.usable_size(payload));
    }

    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_allocations_do_not_overlap() {
    let mut heap = heap();
    let payloads = (0..20)
      .map(|i| {
        let payload = heap.allocate(24).unwrap();
        heap.payload_mut(payload).fill(i);
        payload
      })
      .collect::<Vec<_>>();

    for (i, payload) in payloads.iter().enumerate() {
      assert!(heap.payload(*payload).iter().all(|byte| *byte == i as u8));
    }
  }

  #[test]
  fn test_allocate_release_reuses_address() {
    let mut heap = heap();

    let first = heap.allocate(100).unwrap();
    heap.release(first);
    let second = heap.allocate(100).unwrap();

    assert_eq!(first, second);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_allocate_release_restores_layout() {
    for size in [1, 16, 100, 2000, 4080] {
      let mut heap = heap();
      let before = heap.blocks().collect::<Vec<_>>();

      let payload = heap.allocate(size).unwrap();
      heap.release(payload);

      assert_eq!(heap.blocks().collect::<Vec<_>>(), before, "size {size}");
    }
  }

  // P1 and P2 come out of the initial chunk. Releasing P1 finds both
  // neighbours allocated, so the cursor is re-anchored on P1 and the next
  // search starts there under either policy.
  #[test]
  fn test_reuse_after_release_next_fit() {
    let mut heap = heap();

    let p1 = heap.allocate(16).unwrap();
    let p2 = heap.allocate(16).unwrap();
    assert_eq!(p2.offset(), p1.offset() + 32);

    heap.release(p1);
    assert_eq!(heap.allocate(16).unwrap(), p1);
  }

  #[test]
  fn test_reuse_after_release_first_fit() {
    let arena = MemArena::with_capacity(1 << 16).unwrap();
    let config = HeapConfig::new().with_search(SearchPolicy::FirstFit);
    let mut heap = Heap::with_config(arena, config).unwrap();

    let p1 = heap.allocate(16).unwrap();
    let _p2 = heap.allocate(16).unwrap();

    heap.release(p1);
    assert_eq!(heap.allocate(16).unwrap(), p1);
  }

  #[test]
  fn test_large_request_grows_by_its_own_size() {
    let mut heap = heap();
    let before = heap.arena().size();

    let payload = heap.allocate(10_000).unwrap();

    assert_eq!(heap.arena().size() - before, adjusted_size(10_000).unwrap());
    // the initial chunk was free and merged with the new space
    assert_eq!(payload.offset(), 32);

    let last = heap.blocks().last().unwrap();
    assert_eq!(last.offset + last.size, heap.arena().size());
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_grow_with_allocated_tail() {
    let mut heap = heap();

    let whole = heap.allocate(4080).unwrap();
    let next = heap.allocate(16).unwrap();

    assert_eq!(heap.usable_size(whole), 4080);
    assert_eq!(next.offset(), 32 + 4096);
    assert_eq!(heap.arena().size(), 32 + 2 * 4096);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_out_of_memory_leaves_heap_intact() {
    let arena = MemArena::with_capacity(1).unwrap();
    let config = HeapConfig::new().with_chunk_size(1024);
    let mut heap = Heap::with_config(arena, config).unwrap();

    let payload = heap.allocate(100).unwrap();
    fill(&mut heap, payload, 100);
    let before = heap.blocks().collect::<Vec<_>>();

    assert!(matches!(
      heap.allocate(1 << 20),
      Err(AllocError::OutOfMemory(_))
    ));
    assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
    assert!(is_filled(&heap, payload, 100));
    assert_eq!(heap.check(), Ok(()));

    let small = heap.allocate(100).unwrap();
    assert_ne!(small, payload);
  }

  #[test]
  fn test_resize_null_allocates() {
    let mut heap = heap();

    let payload = heap.resize(None, 50).unwrap().unwrap();

    assert!(heap.usable_size(payload) >= 50);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_resize_to_zero_releases() {
    let mut heap = heap();
    let before = heap.blocks().collect::<Vec<_>>();

    let payload = heap.allocate(50).unwrap();

    assert_eq!(heap.resize(Some(payload), 0).unwrap(), None);
    assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
  }

  #[test]
  fn test_resize_smaller_keeps_block() {
    let mut heap = heap();

    let payload = heap.allocate(200).unwrap();
    let usable = heap.usable_size(payload);

    assert_eq!(heap.resize(Some(payload), 10).unwrap(), Some(payload));
    assert_eq!(heap.usable_size(payload), usable);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_resize_absorbs_free_successor() {
    let mut heap = heap();

    let payload = heap.allocate(64).unwrap();
    let successor = heap.allocate(64).unwrap();
    let _guard = heap.allocate(16).unwrap();
    fill(&mut heap, payload, 64);

    heap.release(successor);
    let resized = heap.resize(Some(payload), 100).unwrap();

    assert_eq!(resized, Some(payload));
    assert_eq!(heap.usable_size(payload), 80 + 80 - DSIZE);
    assert!(is_filled(&heap, payload, 64));
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_resize_in_place_moves_cursor_off_absorbed_block() {
    let mut heap = heap();

    let payload = heap.allocate(64).unwrap();

    // the free remainder right after `payload` is where the cursor sits
    heap.cursor = heap.cursor.next(heap.arena.as_slice());
    let resized = heap.resize(Some(payload), 4000).unwrap();

    assert_eq!(resized, Some(payload));
    assert_eq!(heap.cursor, payload.block());
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_resize_relocates() {
    let mut heap = heap();

    let payload = heap.allocate(64).unwrap();
    let _neighbour = heap.allocate(64).unwrap();
    fill(&mut heap, payload, 64);

    let moved = heap.resize(Some(payload), 200).unwrap().unwrap();

    assert_ne!(moved, payload);
    assert!(heap.usable_size(moved) >= 200);
    assert!(is_filled(&heap, moved, 64));
    assert!(
      heap
        .blocks()
        .any(|block| block.offset == payload.offset() && !block.allocated)
    );
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_resize_failure_keeps_old_block() {
    let arena = MemArena::with_capacity(1).unwrap();
    let config = HeapConfig::new().with_chunk_size(1024);
    let mut heap = Heap::with_config(arena, config).unwrap();

    let payload = heap.allocate(100).unwrap();
    let _neighbour = heap.allocate(16).unwrap();
    fill(&mut heap, payload, 100);

    assert!(matches!(
      heap.resize(Some(payload), 1 << 20),
      Err(AllocError::OutOfMemory(_))
    ));
    assert!(is_filled(&heap, payload, 100));
    assert!(
      heap
        .blocks()
        .any(|block| block.offset == payload.offset() && block.allocated)
    );
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_reset() {
    let mut heap = heap();
    let fresh = heap.blocks().collect::<Vec<_>>();

    for size in [10, 5000, 300] {
      heap.allocate(size).unwrap();
    }
    heap.reset().unwrap();

    assert_eq!(heap.blocks().collect::<Vec<_>>(), fresh);
    assert_eq!(heap.arena().size(), 32 + 4096);
    assert_eq!(heap.check(), Ok(()));
  }
}
