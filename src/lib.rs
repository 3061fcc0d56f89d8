//! # rmalloc - A First-Fit Heap Allocator
//!
//! This crate provides a `malloc`/`calloc`/`free`/`realloc` style heap that
//! takes address space from the operating system with `sbrk(2)`, partitions it
//! into variable-sized blocks and merges freed neighbors back together.
//!
//! ## Overview
//!
//! The heap grows in fixed increments (64000 bytes by default). Whatever has
//! been obtained but not handed out yet sits in one trailing free block, the
//! *frontier*, which is split on every allocation that nothing else can serve:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         HEAP MEMORY                                  │
//!   │                                                                      │
//!   │   ┌─────┬─────┬─────┬─────┬───────────────────────────────────────┐  │
//!   │   │ A1  │ F   │ A2  │ A3  │            Frontier                   │  │
//!   │   └─────┴─────┴─────┴─────┴───────────────────────────────────────┘  │
//!   │           ▲                                                     ▲    │
//!   │           │                                                     │    │
//!   │       free hole,                                           Program   │
//!   │     reused first-fit                                        Break    │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Allocation: first free block with room for the request and a header,
//!   otherwise the frontier, growing the heap until the frontier is enough.
//!   Release: the block turns free and merges with free neighbors.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rmalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Block record, BlockState, HEADER_SIZE
//!   ├── grower     - HeapGrower trait, Sbrk, Region
//!   ├── arena      - Increment-sized growth and raw memory access
//!   ├── directory  - First-fit search, split, coalesce, address resolution
//!   ├── heap       - Heap: allocate, allocate_zeroed, release, resize
//!   ├── trace      - Per-call records (DEBUG_MALLOC) and sinks
//!   ├── config     - HeapConfig and environment loading
//!   ├── stats      - HeapStats
//!   └── error      - HeapError, ConfigError
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rmalloc::Heap;
//!
//! fn main() {
//!     let mut heap = Heap::system();
//!
//!     // Allocate memory for a u64
//!     let ptr = heap.allocate(8).unwrap().cast::<u64>();
//!
//!     unsafe {
//!         ptr.write(42);
//!         println!("Value: {}", ptr.read());
//!     }
//!
//!     // Grow it into an array, possibly moving it
//!     let array = heap.resize(Some(ptr.cast()), 8 * 16).unwrap();
//!
//!     // Free the memory
//!     heap.release(Some(array));
//! }
//! ```
//!
//! Any [`HeapGrower`] can stand in for the program break. [`Region`] serves
//! increments out of a fixed buffer:
//!
//! ```rust
//! use rmalloc::{Heap, Region};
//!
//! let mut heap = Heap::with_grower(Region::with_capacity(64000));
//!
//! let a = heap.allocate(100).unwrap();
//! assert_eq!(heap.usable_size(a), Some(112));
//!
//! heap.release(Some(a));
//! assert_eq!(heap.stats().blocks, 1);
//! heap.validate().unwrap();
//! ```
//!
//! ## How It Works
//!
//! Each block reserves [`HEADER_SIZE`] bytes ahead of its payload. The block
//! records themselves live in a directory on the side, indexed by payload
//! address, so a bad pointer handed to `release` or `resize` is looked up and
//! rejected instead of being trusted:
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │   Reserved Header     │         User Data              │
//!   │                       │                                │
//!   │   HEADER_SIZE bytes   │  ┌──────────────────────────┐  │
//!   │                       │  │                          │  │
//!   │  record in directory: │  │  size bytes, multiple    │  │
//!   │  address, state,      │  │  of 16                   │  │
//!   │  prev, next           │  │                          │  │
//!   │                       │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! ## Diagnostics
//!
//! With `DEBUG_MALLOC` set, [`Heap::system`] writes one line per call to
//! stderr without allocating:
//!
//! ```text
//!   MALLOC: malloc(100) => (ptr=0x5581d2c3e030, size=112)
//!   MALLOC: free(0x5581d2c3e030) => (ptr=0x5581d2c3e030, size=112)
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Never shrinks**: Memory is not returned to the OS
//! - **Fixed alignment**: Every payload is 16-byte aligned, no more
//! - **Unix-only**: [`Sbrk`] requires `libc` and `sbrk` (POSIX systems)

pub mod align;
pub mod arena;
pub mod block;
pub mod config;
pub mod directory;
pub mod error;
pub mod grower;
mod heap;
pub mod stats;
pub mod trace;

pub use block::HEADER_SIZE;
pub use config::HeapConfig;
pub use error::{ConfigError, HeapError};
pub use grower::{Exhausted, HeapGrower, Region, Sbrk};
pub use heap::{BlockView, Heap};
pub use stats::HeapStats;
pub use trace::{Call, NoTrace, Outcome, StderrTrace, Trace, TraceRecord, TracingTrace};
