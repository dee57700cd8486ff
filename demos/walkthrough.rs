use rheap::{Arena, Heap, HeapConfig, MemArena, Payload};
use tracing::Level;

/// Prints every block between the prologue and the epilogue.
fn print_blocks(
  heap: &Heap,
  label: &str,
) {
  let stats = heap.stats();
  println!(
    "[{}] committed = {} bytes, {} blocks ({} free, largest free = {})",
    label, stats.committed, stats.blocks, stats.free_blocks, stats.largest_free,
  );

  for block in heap.blocks() {
    println!(
      "    {:>6} .. {:>6}  {:>5} bytes  {}",
      block.offset,
      block.offset + block.size,
      block.size,
      if block.allocated { "allocated" } else { "free" },
    );
  }
}

fn print_alloc(
  heap: &Heap,
  size: usize,
  payload: Payload,
) {
  println!(
    "Allocated {} bytes, offset = {}, address = {:?}, usable = {}",
    size,
    payload.offset(),
    heap.payload(payload).as_ptr(),
    heap.usable_size(payload),
  );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt().with_max_level(Level::TRACE).init();

  let arena = MemArena::new()?;
  println!(
    "Arena reserved at {:?}, capacity = {} bytes, page size = {}",
    arena.lo(),
    arena.capacity(),
    arena.page_size(),
  );

  let mut heap = Heap::with_config(arena, HeapConfig::default())?;
  print_blocks(&heap, "start");

  // --------------------------------------------------------------------
  // 1) Two small allocations carved from the first chunk.
  // --------------------------------------------------------------------
  let first = heap.allocate(16)?;
  print_alloc(&heap, 16, first);
  let second = heap.allocate(100)?;
  print_alloc(&heap, 100, second);
  heap.payload_mut(second)[..4].copy_from_slice(&0xDEADBEEFu32.to_ne_bytes());
  print_blocks(&heap, "1");

  // --------------------------------------------------------------------
  // 2) Release the first block and allocate again: the search starts at
  //    the freed block, so the address is reused.
  // --------------------------------------------------------------------
  heap.release(first);
  let third = heap.allocate(8)?;
  print_alloc(&heap, 8, third);
  let reused = if third == first {
    "Yes, it reused the freed block"
  } else {
    "No, it allocated somewhere else"
  };
  println!("[2] third == first? {}", reused);

  // --------------------------------------------------------------------
  // 3) A request larger than one chunk grows the arena by its own size.
  // --------------------------------------------------------------------
  let before = heap.arena().size();
  let big = heap.allocate(64 * 1024)?;
  print_alloc(&heap, 64 * 1024, big);
  println!("[3] arena grew by {} bytes", heap.arena().size() - before);
  print_blocks(&heap, "3");

  // --------------------------------------------------------------------
  // 4) Grow `second`; the first word travels with it.
  // --------------------------------------------------------------------
  if let Some(moved) = heap.resize(Some(second), 1000)? {
    let mut word = [0u8; 4];
    word.copy_from_slice(&heap.payload(moved)[..4]);
    println!(
      "[4] resized {} -> {}, first word = 0x{:X}",
      second.offset(),
      moved.offset(),
      u32::from_ne_bytes(word),
    );
  }

  heap.check()?;
  print_blocks(&heap, "end");

  Ok(())
}
