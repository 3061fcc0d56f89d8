use std::{io::Read, ptr::NonNull};

use clap::Parser;
use rmalloc::{Heap, HeapConfig, Sbrk, TracingTrace};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "heap_walk", about = "Step through rmalloc against the real program break")]
struct Cli {
  /// Bytes requested from sbrk per heap growth
  #[arg(long, default_value_t = HeapConfig::DEFAULT_INCREMENT)]
  increment: usize,

  /// Run every step without waiting for ENTER
  #[arg(long)]
  no_pause: bool,
}

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed(pause: bool) {
  if !pause {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break and what the heap holds.
fn print_state(
  label: &str,
  heap: &Heap<Sbrk, TracingTrace>,
) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    Sbrk::program_break(),
  );
  println!("[{}] {}", label, heap.stats());
}

fn print_blocks(heap: &Heap<Sbrk, TracingTrace>) {
  for block in heap.blocks() {
    println!(
      "    {:#x} size={:<6} {}",
      block.address,
      block.size,
      if block.free { "free" } else { "allocated" }
    );
  }
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
    .init();

  let cli = Cli::parse();
  let pause = !cli.no_pause;

  let config = HeapConfig::default().with_increment(cli.increment);
  let mut heap = Heap::new(Sbrk::new(), TracingTrace, &config);

  // Initial heap state
  print_state("start", &heap);
  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 1) Allocate space for a u32. The first call obtains one increment.
  // --------------------------------------------------------------------
  let first_block = heap.allocate(size_of::<u32>()).expect("out of memory");
  println!("\n[1] Allocate u32");
  print_state("1", &heap);

  let first_ptr = first_block.cast::<u32>();
  unsafe { first_ptr.write(0xDEADBEEF) };
  println!("[1] Value written to first_block = 0x{:X}", unsafe { first_ptr.read() });

  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 2) Allocate 12 bytes; the heap rounds every request up to 16.
  // --------------------------------------------------------------------
  let second_block = heap.allocate(12).expect("out of memory");
  println!("\n[2] Allocate [u8; 12]");
  println!("[2] Usable size = {:?}", heap.usable_size(second_block));

  unsafe { second_block.write_bytes(0xAB, 12) };
  println!("[2] Initialized second block with 0xAB");

  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 3) Allocate a zeroed [u64; 8] and check the alignment.
  // --------------------------------------------------------------------
  let third_block = heap.allocate_zeroed(8, size_of::<u64>()).expect("out of memory");
  println!("\n[3] Allocate zeroed [u64; 8] (observe alignment)");

  let addr_third = third_block.as_ptr() as usize;
  println!("[3] Address = {:#X}, addr % 16 = {}", addr_third, addr_third % 16);
  print_blocks(&heap);

  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 4) Free the first block. It becomes a hole between live blocks.
  // --------------------------------------------------------------------
  heap.release(Some(first_block));
  println!("\n[4] Released first_block at {:?}", first_block);
  print_blocks(&heap);

  // Releasing it again is reported and otherwise ignored.
  heap.release(Some(first_block));

  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 5) Grow the second block. Its right neighbor is live, so it moves.
  // --------------------------------------------------------------------
  let moved = heap.resize(Some(second_block), 100).expect("out of memory");
  println!(
    "\n[5] Resize second block to 100 bytes: {:?} -> {:?}",
    second_block, moved
  );
  let bytes = unsafe { std::slice::from_raw_parts(moved.as_ptr(), 12) };
  println!("[5] First 12 bytes kept: {}", bytes.iter().all(|&b| b == 0xAB));
  print_blocks(&heap);

  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 6) Allocate a small block to see the first-fit search reuse a hole.
  // --------------------------------------------------------------------
  let reuse: NonNull<u8> = heap.allocate(2).expect("out of memory");
  println!("\n[6] Allocate [u8; 2] (check reuse of freed space)");
  println!(
    "[6] reused a hole before the frontier? {}",
    if reuse.as_ptr() < third_block.as_ptr() { "Yes" } else { "No" }
  );

  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 7) Allocate a large block to observe heap growth.
  // --------------------------------------------------------------------
  print_state("before large alloc", &heap);

  let big_block = heap.allocate(4 * cli.increment).expect("out of memory");
  println!("\n[7] Allocate {} bytes", 4 * cli.increment);

  print_state("after large alloc", &heap);
  block_until_enter_pressed(pause);

  // --------------------------------------------------------------------
  // 8) Free everything; the heap folds back into the frontier.
  // --------------------------------------------------------------------
  for ptr in [big_block, reuse, moved, third_block] {
    heap.release(Some(ptr));
  }
  print_state("8", &heap);
  print_blocks(&heap);

  match heap.validate() {
    Ok(()) => println!("\n[8] Heap is consistent. The OS reclaims the break at exit."),
    Err(err) => println!("\n[8] {err}"),
  }
}
