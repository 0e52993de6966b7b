use std::{env, io::Read};

use brkalloc::{HEADER_SIZE, alloc_shared, free_shared, program_break, shared_stats};

/// Waits until the user presses ENTER, unless `--no-wait` was given.
/// Useful when you want to inspect memory state with tools like `pmap` or
/// `gdb` while the program break moves.
fn block_until_enter_pressed(wait: bool) {
  if !wait {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    program_break(),
  );
}

fn print_alloc(
  size: usize,
  addr: *mut u8,
) {
  let stats = shared_stats();
  println!(
    "Allocated {} bytes, address = {:?}, program break = {:?}, free blocks = {} ({} bytes)",
    size,
    addr,
    program_break(),
    stats.free_blocks,
    stats.free_bytes,
  );
}

fn print_free(addr: *mut u8) {
  let stats = shared_stats();
  println!(
    "Freed {:?}, program break = {:?}, free blocks = {} ({} bytes, largest {})",
    addr,
    program_break(),
    stats.free_blocks,
    stats.free_bytes,
    stats.largest_free,
  );
}

fn main() {
  let wait = !env::args().any(|arg| arg == "--no-wait");

  println!("Header size: {} bytes", HEADER_SIZE);
  print_program_break("start");
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 1) Two allocations on an empty heap: both grow the segment.
  // --------------------------------------------------------------------
  let first = alloc_shared(40);
  println!("\n[1] Allocate 40 bytes");
  print_alloc(40, first);

  let second = alloc_shared(40);
  println!("[1] Allocate 40 more bytes");
  print_alloc(40, second);

  unsafe {
    first.write_bytes(0xAB, 40);
  }
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 2) Free the first block: it becomes the only free block.
  // --------------------------------------------------------------------
  unsafe { free_shared(first) };
  println!("\n[2] Free first block");
  print_free(first);
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 3) Same size again: the freed block is an exact fit.
  // --------------------------------------------------------------------
  let third = alloc_shared(40);
  println!("\n[3] Allocate 40 bytes (check reuse of freed block)");
  print_alloc(40, third);
  println!(
    "[3] third == first? {}",
    if third == first {
      "Yes, best fit reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 4) Three neighbours freed one by one collapse into one free block.
  // --------------------------------------------------------------------
  let a = alloc_shared(64);
  let b = alloc_shared(64);
  let c = alloc_shared(64);
  unsafe {
    free_shared(a);
    free_shared(c);
    free_shared(b);
  }
  println!("\n[4] Freed three 64-byte neighbours (a, c, then b)");
  print_free(b);
  block_until_enter_pressed(wait);

  // --------------------------------------------------------------------
  // 5) A large block grows the program break.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let big = alloc_shared(64 * 1024);
  println!("\n[5] Allocate large 64 KiB block");
  print_alloc(64 * 1024, big);
  print_program_break("after large alloc");
  block_until_enter_pressed(wait);

  unsafe {
    free_shared(big);
    free_shared(second);
    free_shared(third);
  }

  // --------------------------------------------------------------------
  // 6) End of demo. The break never moves back down.
  // --------------------------------------------------------------------
  print_program_break("end");
  println!("\n[6] End of example. Process will exit and the OS will reclaim all memory.");
}
