use std::ptr::NonNull;

use crate::{
  align,
  arena::Arena,
  block::BlockId,
  config::HeapConfig,
  directory::BlockDirectory,
  error::{HeapError, Result},
  grower::{HeapGrower, Sbrk},
  stats::HeapStats,
  trace::{Call, NoTrace, Outcome, StderrTrace, Trace, TraceRecord},
};

/// A block as seen from outside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockView {
  pub address: usize,
  pub size: usize,
  pub free: bool,
}

/// First-fit heap over memory obtained from a [`HeapGrower`].
///
/// All state lives in this value; operations take `&mut self`, so a heap has
/// exactly one user at a time and trace sinks cannot call back into it.
pub struct Heap<G = Sbrk, T = StderrTrace> {
  arena: Arena<G>,
  directory: BlockDirectory,
  trace: T,
}

impl Heap<Sbrk, StderrTrace> {
  /// Heap over the program break, tracing to stderr when `DEBUG_MALLOC` is set.
  ///
  /// An unparsable `MALLOC_INCREMENT` falls back to the default increment.
  pub fn system() -> Self {
    let config = HeapConfig::from_env().unwrap_or_default();
    Self::new(Sbrk::new(), StderrTrace::new(config.debug), &config)
  }
}

impl<G: HeapGrower> Heap<G, NoTrace> {
  pub fn with_grower(grower: G) -> Self {
    Self::new(grower, NoTrace, &HeapConfig::default())
  }
}

impl<G: HeapGrower, T: Trace> Heap<G, T> {
  pub fn new(
    grower: G,
    trace: T,
    config: &HeapConfig,
  ) -> Self {
    Self {
      arena: Arena::new(grower, config.increment),
      directory: BlockDirectory::new(),
      trace,
    }
  }

  /// `malloc`: a block of at least `size` bytes, or `None` for zero bytes or
  /// when the grower is exhausted.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    let result = self.allocate_block(size);
    self.finish(Call::Malloc { size }, result)
  }

  /// `calloc`: `count * elem_size` zeroed bytes. An overflowing product fails.
  pub fn allocate_zeroed(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> Option<NonNull<u8>> {
    let result = self.allocate_zeroed_block(count, elem_size);
    self.finish(Call::Calloc { count, elem_size }, result)
  }

  /// `free`: returns the allocation at `ptr` to the heap.
  ///
  /// `None` is ignored. A pointer the heap did not hand out, or already took
  /// back, is reported and otherwise ignored.
  pub fn release(
    &mut self,
    ptr: Option<NonNull<u8>>,
  ) {
    let Some(ptr) = ptr else {
      return;
    };
    let address = ptr.as_ptr() as usize;

    let outcome = match self.release_block(address) {
      Ok(size) => Outcome::Released { ptr: address, size },
      Err(err) => Outcome::from(&err),
    };

    self.trace.record(&TraceRecord::new(Call::Free { ptr: address }, outcome));
  }

  /// `realloc`: resizes the allocation at `ptr`, in place when it can.
  ///
  /// `None` allocates; a zero `size` releases and returns `None`. When the
  /// allocation has to move and no memory is left, the original stays valid
  /// and `None` comes back.
  pub fn resize(
    &mut self,
    ptr: Option<NonNull<u8>>,
    size: usize,
  ) -> Option<NonNull<u8>> {
    let address = ptr.map_or(0, |ptr| ptr.as_ptr() as usize);
    let call = Call::Realloc { ptr: address, size };

    if ptr.is_none() {
      let result = self.allocate_block(size);
      return self.finish(call, result);
    }

    if size == 0 {
      let outcome = match self.release_block(address) {
        Ok(size) => Outcome::Released { ptr: address, size },
        Err(err) => Outcome::from(&err),
      };
      self.trace.record(&TraceRecord::new(call, outcome));
      return None;
    }

    let result = self.reallocate(address, size).map(Some);
    self.finish(call, result)
  }

  /// Payload capacity of the live allocation at `ptr`.
  pub fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> Option<usize> {
    self
      .owned(ptr.as_ptr() as usize)
      .ok()
      .map(|id| self.directory.block(id).size())
  }

  pub fn blocks(&self) -> impl Iterator<Item = BlockView> + '_ {
    self.directory.iter().map(|(_, block)| BlockView {
      address: block.address,
      size: block.size(),
      free: block.is_free(),
    })
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      obtained: self.arena.obtained(),
      growths: self.arena.growths(),
      ..HeapStats::default()
    };

    for block in self.blocks() {
      stats.blocks += 1;
      if block.free {
        stats.free_blocks += 1;
        stats.free_bytes += block.size;
      } else {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += block.size;
      }
    }

    if let Some(frontier) = self.directory.frontier() {
      stats.frontier = self.directory.block(frontier).size();
    }

    stats
  }

  /// Checks the block directory against the arena.
  pub fn validate(&self) -> Result<()> {
    self.directory.validate(self.arena.obtained())
  }

  pub fn increment(&self) -> usize {
    self.arena.increment()
  }

  pub fn grower(&self) -> &G {
    self.arena.grower()
  }

  pub fn tracer(&self) -> &T {
    &self.trace
  }

  pub fn tracer_mut(&mut self) -> &mut T {
    &mut self.trace
  }

  fn allocate_block(
    &mut self,
    size: usize,
  ) -> Result<Option<BlockId>> {
    if size == 0 {
      return Ok(None);
    }

    let size = align::round_up(size).ok_or(HeapError::OutOfMemory { requested: size })?;

    if !self.arena.is_initialized() {
      let growth = self.arena.grow()?;
      self.directory.absorb(growth, self.arena.increment())?;
    }

    self.directory.find_fit(&mut self.arena, size).map(Some)
  }

  fn allocate_zeroed_block(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> Result<Option<BlockId>> {
    let total = count.checked_mul(elem_size).ok_or(HeapError::Overflow)?;

    let Some(id) = self.allocate_block(total)? else {
      return Ok(None);
    };

    let block = self.directory.block(id);
    let (address, size) = (block.address, block.size());

    if let Err(err) = self.arena.zero(address, size) {
      self.directory.release(id);
      return Err(err);
    }

    Ok(Some(id))
  }

  /// Resolves `address` to a block that is currently handed out.
  fn owned(
    &self,
    address: usize,
  ) -> Result<BlockId> {
    self
      .directory
      .resolve(address)
      .filter(|&id| !self.directory.block(id).is_free())
      .ok_or(HeapError::InvalidPointer(address))
  }

  /// Frees the block owning `address` and returns the capacity it had.
  fn release_block(
    &mut self,
    address: usize,
  ) -> Result<usize> {
    let id = self.owned(address)?;
    let size = self.directory.block(id).size();

    self.directory.release(id);

    Ok(size)
  }

  fn reallocate(
    &mut self,
    address: usize,
    size: usize,
  ) -> Result<BlockId> {
    let size = align::round_up(size).ok_or(HeapError::OutOfMemory { requested: size })?;
    let id = self.owned(address)?;
    let current = self.directory.block(id).size();

    if current >= size {
      self.directory.shrink_in_place(id, size)?;
      return Ok(id);
    }

    if self.directory.grow_in_place(id, size)? {
      return Ok(id);
    }

    let moved = self.directory.find_fit(&mut self.arena, size)?;
    let (from, to) = (
      self.directory.block(id).address,
      self.directory.block(moved).address,
    );

    if let Err(err) = self.arena.copy(from, to, current.min(size)) {
      self.directory.release(moved);
      return Err(err);
    }

    self.directory.release(id);

    Ok(moved)
  }

  /// Records the call and turns its result into what the caller sees.
  fn finish(
    &mut self,
    call: Call,
    result: Result<Option<BlockId>>,
  ) -> Option<NonNull<u8>> {
    let (outcome, ptr) = match result {
      Ok(Some(id)) => {
        let block = self.directory.block(id);
        (
          Outcome::Granted {
            ptr: block.address,
            size: block.size(),
          },
          NonNull::new(block.address as *mut u8),
        )
      }
      Ok(None) => (Outcome::Null, None),
      Err(err) => (Outcome::from(&err), None),
    };

    self.trace.record(&TraceRecord::new(call, outcome));

    ptr
  }
}
