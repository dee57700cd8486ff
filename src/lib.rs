//! # rheap - An Implicit Free-List Heap
//!
//! This crate provides a general purpose **boundary-tag allocator** that
//! manages one contiguous, growable byte range (an [`Arena`]). Every block
//! carries its own size and allocated flag in a header and a footer word,
//! so the heap needs no metadata outside the arena itself.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                            ARENA                                     │
//!   │                                                                      │
//!   │  ┌───┬────────┬────────────┬──────────────┬──────────┬────────┬───┐  │
//!   │  │pad│prologue│ A1 (alloc) │  free block  │ A2       │  free  │ E │  │
//!   │  └───┴────────┴────────────┴──────────────┴──────────┴────────┴───┘  │
//!   │                ▲                                                ▲    │
//!   │                │                                                │    │
//!   │           first block                                     epilogue   │
//!   │                                                          (size 0)    │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Free blocks are found by walking block to block.
//!   Freed blocks merge with free neighbours immediately.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rheap
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── arena      - Arena trait and the mmap-backed MemArena
//!   ├── block      - Header/footer encoding and block stepping (internal)
//!   ├── free       - find-fit, place and coalesce (internal)
//!   ├── heap       - Heap: allocate, release, resize
//!   ├── check      - Block listing, stats and the consistency checker
//!   ├── config     - HeapConfig and SearchPolicy
//!   └── error      - AllocError
//! ```
//!
//! A narrated walkthrough lives in `demos/walkthrough.rs` rather than the
//! usual `examples/` directory; it is still registered as a cargo example:
//!
//! ```text
//!   cargo run --example walkthrough
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rheap::{Heap, MemArena};
//!
//! let mut heap = Heap::new(MemArena::new()?)?;
//!
//! // Allocate 64 bytes and use them
//! let payload = heap.allocate(64)?;
//! heap.payload_mut(payload)[..5].copy_from_slice(b"hello");
//!
//! // Grow it; the first bytes travel with the block
//! let payload = heap.resize(Some(payload), 512)?.unwrap();
//! assert_eq!(&heap.payload(payload)[..5], b"hello");
//!
//! // Give it back
//! heap.release(payload);
//! assert_eq!(heap.check(), Ok(()));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## How It Works
//!
//! Each block is framed by two identical words:
//!
//! ```text
//!   Single Block:
//!   ┌──────────┬────────────────────────────────┬──────────┐
//!   │  header  │           payload              │  footer  │
//!   │  size|a  │                                │  size|a  │
//!   │  8 bytes │     size - 16 bytes usable     │  8 bytes │
//!   └──────────┴────────────────────────────────┴──────────┘
//!              ▲
//!              └── Payload returned to the caller (16-byte aligned)
//! ```
//!
//! - **Allocate** rounds the request up to a block size, searches for a
//!   free block (next-fit by default), and splits off the tail when it can
//!   hold a minimum block. On a miss the arena grows by the larger of the
//!   block size and one chunk.
//! - **Release** clears the flag and merges with free neighbours: the
//!   header of the next block and the footer of the previous block are
//!   enough to find both.
//! - **Resize** never shrinks, absorbs a free successor when that is
//!   enough, and otherwise moves the payload.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization; wrap the heap yourself
//! - **Caller contract**: releasing or resizing a foreign or already
//!   released payload corrupts the heap and is not detected
//! - **Unix-only**: [`MemArena`] requires `libc` and `mmap` (POSIX systems)

pub mod align;
pub mod arena;
mod block;
mod check;
pub mod config;
pub mod error;
mod free;
mod heap;

pub use arena::{Arena, ArenaError, MemArena};
pub use block::{ALIGNMENT, MIN_BLOCK_SIZE};
pub use check::{BlockInfo, HeapError, HeapStats};
pub use config::{HeapConfig, SearchPolicy};
pub use error::AllocError;
pub use heap::{Heap, Payload};
