//! Address space obtained from the grower, and the only code that touches it.

use std::{ops::Range, ptr};

use crate::{
  error::{HeapError, Result},
  grower::HeapGrower,
};

/// Where a successful growth landed relative to what the arena already had.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
  /// First region ever obtained.
  Fresh { start: usize },
  /// Contiguous with the previous end; the frontier just gets longer.
  Extended,
  /// Something else moved the boundary in between; a new run starts at `start`.
  Detached { start: usize },
}

pub struct Arena<G> {
  grower: G,
  increment: usize,
  regions: Vec<Range<usize>>,
  obtained: usize,
  growths: usize,
}

impl<G: HeapGrower> Arena<G> {
  pub fn new(
    grower: G,
    increment: usize,
  ) -> Self {
    Self {
      grower,
      increment,
      regions: Vec::new(),
      obtained: 0,
      growths: 0,
    }
  }

  /// Requests one increment. Either the whole increment arrives or nothing changes.
  ///
  /// A region below the current end is refused and never used.
  pub fn grow(&mut self) -> Result<Growth> {
    let start = self
      .grower
      .grow(self.increment)
      .ok_or(HeapError::OutOfMemory {
        requested: self.increment,
      })?
      .as_ptr() as usize;
    let end = start + self.increment;

    let growth = match self.regions.last() {
      None => Growth::Fresh { start },
      Some(last) if last.end == start => Growth::Extended,
      Some(last) if last.end < start => Growth::Detached { start },
      Some(last) => {
        tracing::warn!(start, end = last.end, "grower went backwards, region dropped");
        return Err(HeapError::Unordered {
          start,
          end: last.end,
        });
      }
    };

    if growth == Growth::Extended {
      if let Some(last) = self.regions.last_mut() {
        last.end = end;
      }
    } else {
      self.regions.push(start..end);
    }

    self.obtained += self.increment;
    self.growths += 1;

    tracing::trace!(start, increment = self.increment, ?growth, "arena grown");

    Ok(growth)
  }

  pub fn is_initialized(&self) -> bool {
    !self.regions.is_empty()
  }

  pub fn increment(&self) -> usize {
    self.increment
  }

  /// Total bytes ever obtained from the grower.
  pub fn obtained(&self) -> usize {
    self.obtained
  }

  pub fn growths(&self) -> usize {
    self.growths
  }

  pub fn regions(&self) -> &[Range<usize>] {
    &self.regions
  }

  pub fn grower(&self) -> &G {
    &self.grower
  }

  /// Whether `[address, address + len)` lies inside one obtained region.
  pub fn contains(
    &self,
    address: usize,
    len: usize,
  ) -> bool {
    let Some(end) = address.checked_add(len) else {
      return false;
    };

    self
      .regions
      .iter()
      .any(|region| region.start <= address && end <= region.end)
  }

  fn check(
    &self,
    address: usize,
    len: usize,
  ) -> Result<()> {
    if self.contains(address, len) {
      Ok(())
    } else {
      Err(HeapError::OutOfBounds { address, len })
    }
  }

  pub fn zero(
    &mut self,
    address: usize,
    len: usize,
  ) -> Result<()> {
    self.check(address, len)?;

    // SAFETY: the range lies inside memory the grower handed to this arena.
    unsafe { ptr::write_bytes(address as *mut u8, 0, len) };

    Ok(())
  }

  pub fn copy(
    &mut self,
    from: usize,
    to: usize,
    len: usize,
  ) -> Result<()> {
    self.check(from, len)?;
    self.check(to, len)?;

    // SAFETY: both ranges lie inside memory owned by this arena; `copy` tolerates overlap.
    unsafe { ptr::copy(from as *const u8, to as *mut u8, len) };

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::ptr::NonNull;

  use super::*;
  use crate::grower::{Exhausted, Region};

  /// Hands out increments from a buffer, skipping a gap before every other one.
  struct Gappy {
    region: Region,
    calls: usize,
  }

  unsafe impl HeapGrower for Gappy {
    fn grow(
      &mut self,
      increment: usize,
    ) -> Option<NonNull<u8>> {
      self.calls += 1;
      if self.calls % 2 == 0 {
        self.region.grow(64)?;
      }
      self.region.grow(increment)
    }
  }

  #[test]
  fn test_growth_kinds() {
    let mut arena = Arena::new(
      Gappy {
        region: Region::with_capacity(4096),
        calls: 0,
      },
      256,
    );

    assert!(!arena.is_initialized());

    let Growth::Fresh { start } = arena.grow().unwrap() else {
      panic!("first growth should be fresh");
    };
    assert_eq!(arena.grow().unwrap(), Growth::Detached { start: start + 256 + 64 });
    assert_eq!(arena.grow().unwrap(), Growth::Extended);

    assert_eq!(arena.obtained(), 768);
    assert_eq!(arena.growths(), 3);
    assert_eq!(arena.regions(), &[start..start + 256, start + 320..start + 832]);
  }

  /// Hands out the upper half of a buffer first, then the lower half.
  struct Descending {
    halves: Vec<NonNull<u8>>,
    _region: Region,
  }

  impl Descending {
    fn new(increment: usize) -> Self {
      let mut region = Region::with_capacity(2 * increment);
      let low = region.grow(increment).unwrap();
      let high = region.grow(increment).unwrap();

      Self {
        halves: vec![low, high],
        _region: region,
      }
    }
  }

  unsafe impl HeapGrower for Descending {
    fn grow(
      &mut self,
      _increment: usize,
    ) -> Option<NonNull<u8>> {
      self.halves.pop()
    }
  }

  #[test]
  fn test_lower_region_is_refused() {
    let mut arena = Arena::new(Descending::new(256), 256);

    let Growth::Fresh { start: high } = arena.grow().unwrap() else {
      panic!("first growth should be fresh");
    };

    assert_eq!(
      arena.grow(),
      Err(HeapError::Unordered {
        start: high - 256,
        end: high + 256
      })
    );
    assert_eq!(arena.regions(), &[high..high + 256]);
    assert_eq!(arena.obtained(), 256);
    assert_eq!(arena.growths(), 1);
  }

  #[test]
  fn test_failed_growth_changes_nothing() {
    let mut arena = Arena::new(Exhausted, 64000);

    assert_eq!(arena.grow(), Err(HeapError::OutOfMemory { requested: 64000 }));
    assert_eq!(arena.obtained(), 0);
    assert_eq!(arena.growths(), 0);
    assert!(!arena.is_initialized());
  }

  #[test]
  fn test_zero_and_copy_stay_in_bounds() {
    let mut arena = Arena::new(Region::with_capacity(1024), 512);
    let Growth::Fresh { start } = arena.grow().unwrap() else {
      panic!("first growth should be fresh");
    };

    unsafe { ptr::write_bytes(start as *mut u8, 0xAB, 64) };
    arena.copy(start, start + 128, 64).unwrap();
    arena.zero(start, 32).unwrap();

    let bytes = unsafe { std::slice::from_raw_parts(start as *const u8, 192) };
    assert!(bytes[..32].iter().all(|&b| b == 0));
    assert!(bytes[32..64].iter().all(|&b| b == 0xAB));
    assert!(bytes[128..192].iter().all(|&b| b == 0xAB));

    assert_eq!(
      arena.zero(start + 500, 64),
      Err(HeapError::OutOfBounds {
        address: start + 500,
        len: 64
      })
    );
    assert!(arena.copy(start, usize::MAX - 8, 64).is_err());
    assert!(!arena.contains(start - 1, 1));
  }
}
