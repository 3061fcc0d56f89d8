//! Sources of raw heap memory.

use std::{
  alloc::{self, Layout},
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};

use crate::align::{ALIGNMENT, is_aligned};

/// Something that hands out contiguous address space in increments, like `sbrk(2)`.
///
/// # Safety
///
/// A returned pointer must be aligned to [`ALIGNMENT`] and valid for reads
/// and writes of `increment` bytes. The memory belongs exclusively to the
/// caller for as long as the grower is alive. A failed call must not move
/// the boundary.
///
/// Each region must start at or above the end of every region returned
/// before it. The heap refuses a region that breaks this order.
pub unsafe trait HeapGrower {
  /// Extends the boundary by `increment` bytes and returns the previous boundary.
  fn grow(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>>;
}

/// Grows the process data segment through `sbrk(2)`.
///
/// Only one `Sbrk` should be driving the program break at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

impl Sbrk {
  pub fn new() -> Self {
    Self
  }

  /// Current program break.
  pub fn program_break() -> *mut c_void {
    unsafe { sbrk(0) }
  }

  /// Moves the break by `increment` and returns the old break.
  fn extend(increment: usize) -> Option<usize> {
    let increment = intptr_t::try_from(increment).ok()?;
    let address = unsafe { sbrk(increment) };

    if address == usize::MAX as *mut c_void {
      return None;
    }

    Some(address as usize)
  }
}

unsafe impl HeapGrower for Sbrk {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    // Other code in the process may have left the break anywhere, so the
    // padding up to the next boundary rides along in the same call.
    let current = Self::program_break() as usize;
    let padding = crate::align!(current) - current;

    let start = Self::extend(increment.checked_add(padding)?)? + padding;

    NonNull::new(start as *mut u8)
  }
}

/// A fixed buffer handed out front to back, reporting exhaustion once full.
///
/// Useful for embedding the heap inside memory obtained elsewhere, and for
/// running it without touching the real program break.
#[derive(Debug)]
pub struct Region {
  base: Option<NonNull<u8>>,
  layout: Layout,
  used: usize,
}

impl Region {
  pub fn with_capacity(capacity: usize) -> Self {
    let capacity = crate::align!(capacity);
    let layout = Layout::from_size_align(capacity, ALIGNMENT).unwrap_or(Layout::new::<()>());

    let base = if layout.size() == 0 {
      None
    } else {
      NonNull::new(unsafe { alloc::alloc(layout) })
    };

    Self {
      base,
      layout,
      used: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    match self.base {
      Some(_) => self.layout.size(),
      None => 0,
    }
  }

  pub fn remaining(&self) -> usize {
    self.capacity() - self.used
  }
}

unsafe impl HeapGrower for Region {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    let base = self.base?;

    if increment > self.remaining() || !is_aligned(increment) {
      return None;
    }

    let address = unsafe { base.add(self.used) };
    self.used += increment;

    Some(address)
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    if let Some(base) = self.base {
      unsafe { alloc::dealloc(base.as_ptr(), self.layout) };
    }
  }
}

/// Hands out nothing. Every growth fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct Exhausted;

unsafe impl HeapGrower for Exhausted {
  fn grow(
    &mut self,
    _increment: usize,
  ) -> Option<NonNull<u8>> {
    None
  }
}
