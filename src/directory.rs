//! Address-ordered sequence of every block carved out of the arena.
//!
//! Records are kept in a slot vector and linked by [`BlockId`]; a side index
//! maps payload addresses back to blocks. The last block is the frontier:
//! always free, it stands for arena space that has not been partitioned yet.
//!
//! ```text
//!   head                                                   frontier
//!    │                                                        │
//!    ▼                                                        ▼
//!   ┌────┬────────┬────┬────────────┬────┬──────┬────┬─────────────────┐
//!   │ hdr│ alloc  │ hdr│    free    │ hdr│alloc │ hdr│   unpartitioned │
//!   └────┴────────┴────┴────────────┴────┴──────┴────┴─────────────────┘
//!        ▲                                                            ▲
//!     address                                                  arena end
//! ```

use std::collections::BTreeMap;

use crate::{
  align::is_aligned,
  arena::{Arena, Growth},
  block::{Block, BlockId, BlockState, HEADER_SIZE},
  error::{HeapError, Result},
  grower::HeapGrower,
};

#[derive(Debug, Default)]
pub struct BlockDirectory {
  slots: Vec<Block>,
  vacant: Vec<BlockId>,
  index: BTreeMap<usize, BlockId>,
  head: Option<BlockId>,
  frontier: Option<BlockId>,
}

impl BlockDirectory {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn block(
    &self,
    id: BlockId,
  ) -> &Block {
    &self.slots[id.index()]
  }

  fn block_mut(
    &mut self,
    id: BlockId,
  ) -> &mut Block {
    &mut self.slots[id.index()]
  }

  pub fn head(&self) -> Option<BlockId> {
    self.head
  }

  pub fn frontier(&self) -> Option<BlockId> {
    self.frontier
  }

  /// Number of live blocks, frontier included.
  pub fn len(&self) -> usize {
    self.index.len()
  }

  pub fn is_empty(&self) -> bool {
    self.index.is_empty()
  }

  pub fn iter(&self) -> Blocks<'_> {
    Blocks {
      directory: self,
      cursor: self.head,
    }
  }

  /// Stores `block` in a free slot. Fails only when the id space is used up.
  fn insert(
    &mut self,
    block: Block,
  ) -> Result<BlockId> {
    let address = block.address;

    let id = match self.vacant.pop() {
      Some(id) => {
        *self.block_mut(id) = block;
        id
      }
      None => {
        let id = BlockId::new(self.slots.len()).ok_or(HeapError::OutOfMemory {
          requested: HEADER_SIZE,
        })?;
        self.slots.push(block);
        id
      }
    };

    self.index.insert(address, id);
    Ok(id)
  }

  fn remove(
    &mut self,
    id: BlockId,
  ) {
    let address = self.block(id).address;
    self.index.remove(&address);
    self.vacant.push(id);
  }

  /// Folds arena space from a successful growth into the sequence.
  pub fn absorb(
    &mut self,
    growth: Growth,
    increment: usize,
  ) -> Result<()> {
    match growth {
      Growth::Extended => {
        let frontier = self
          .frontier
          .ok_or(HeapError::Corrupted("extended an arena without a frontier"))?;
        let block = self.block_mut(frontier);
        block.set_size(block.size() + increment);
      }
      Growth::Fresh { start } | Growth::Detached { start } => {
        let tail = self.frontier;
        let block = Block::new(
          start + HEADER_SIZE,
          BlockState::Free {
            size: increment - HEADER_SIZE,
          },
          tail,
          None,
        );
        let id = self.insert(block)?;

        match tail {
          Some(tail) => self.block_mut(tail).next = Some(id),
          None => self.head = Some(id),
        }
        self.frontier = Some(id);
      }
    }

    Ok(())
  }

  /// First-fit search for a block that can hold `size` bytes, growing the arena on a miss.
  ///
  /// The chosen block comes back allocated and split down to `size`.
  pub fn find_fit<G: HeapGrower>(
    &mut self,
    arena: &mut Arena<G>,
    size: usize,
  ) -> Result<BlockId> {
    let needed = size.checked_add(HEADER_SIZE).ok_or(HeapError::Overflow)?;

    let mut cursor = self.head;
    while let Some(id) = cursor {
      if Some(id) == self.frontier {
        break;
      }

      let block = self.block(id);
      if block.is_free() && block.size() >= needed {
        self.split(id, size)?;
        return Ok(id);
      }

      cursor = block.next;
    }

    loop {
      if let Some(frontier) = self.frontier {
        if self.block(frontier).size() >= needed {
          self.split(frontier, size)?;
          return Ok(frontier);
        }
      }

      let growth = arena.grow()?;
      self.absorb(growth, arena.increment())?;
    }
  }

  /// Marks `id` allocated at `size` bytes, carving the excess into a free tail.
  ///
  /// Excess smaller than a header stays inside the block. Returns the tail, if any.
  /// On error nothing has changed.
  pub fn split(
    &mut self,
    id: BlockId,
    size: usize,
  ) -> Result<Option<BlockId>> {
    let Block { address, next, .. } = *self.block(id);
    let capacity = self.block(id).size();
    let leftover = capacity.saturating_sub(size);

    if leftover < HEADER_SIZE {
      self.block_mut(id).state = BlockState::Allocated { size: capacity };
      return Ok(None);
    }

    let tail = self.insert(Block::new(
      address + size + HEADER_SIZE,
      BlockState::Free {
        size: leftover - HEADER_SIZE,
      },
      Some(id),
      next,
    ))?;

    if let Some(next) = next {
      self.block_mut(next).prev = Some(tail);
    }

    let block = self.block_mut(id);
    block.next = Some(tail);
    block.state = BlockState::Allocated { size };

    if self.frontier == Some(id) {
      self.frontier = Some(tail);
    }

    Ok(Some(tail))
  }

  /// Unlinks the block after `id` and adds its whole footprint to `id`.
  fn merge_next(
    &mut self,
    id: BlockId,
  ) {
    let Some(next_id) = self.block(id).next else {
      return;
    };
    let next = self.block(next_id).clone();

    let block = self.block_mut(id);
    block.set_size(block.size() + HEADER_SIZE + next.size());
    block.next = next.next;

    if let Some(after) = next.next {
      self.block_mut(after).prev = Some(id);
    }

    self.remove(next_id);

    if self.frontier == Some(next_id) {
      self.frontier = Some(id);
    }
  }

  fn mergeable(
    &self,
    left: BlockId,
    right: BlockId,
  ) -> bool {
    let (left, right) = (self.block(left), self.block(right));
    left.is_free() && right.is_free() && left.touches(right)
  }

  /// One merging pass over the free block `id` and its two neighbors.
  ///
  /// Returns the block that now holds `id`'s space and whether anything merged.
  pub fn coalesce(
    &mut self,
    id: BlockId,
  ) -> (BlockId, bool) {
    let mut survivor = id;
    let mut merged = false;

    if let Some(next) = self.block(id).next {
      if self.mergeable(id, next) {
        self.merge_next(id);
        merged = true;
      }
    }

    if let Some(prev) = self.block(id).prev {
      if self.mergeable(prev, id) {
        self.merge_next(prev);
        survivor = prev;
        merged = true;
      }
    }

    (survivor, merged)
  }

  /// Repeats [`coalesce`](Self::coalesce) until no neighbor of the survivor is free.
  pub fn coalesce_fully(
    &mut self,
    id: BlockId,
  ) -> BlockId {
    let mut id = id;

    loop {
      let (survivor, merged) = self.coalesce(id);
      id = survivor;

      if !merged {
        return id;
      }
    }
  }

  /// Frees `id` and merges it into its free neighbors.
  pub fn release(
    &mut self,
    id: BlockId,
  ) -> BlockId {
    self.block_mut(id).mark_free();
    self.coalesce_fully(id)
  }

  /// Maps a payload address to the block that contains it.
  ///
  /// Matches an exact payload address, or an address strictly between a
  /// block's payload and the next block's payload.
  pub fn resolve(
    &self,
    ptr: usize,
  ) -> Option<BlockId> {
    let (&address, &id) = self.index.range(..=ptr).next_back()?;

    if address == ptr {
      return Some(id);
    }

    let next = self.block(id).next?;
    (ptr < self.block(next).address).then_some(id)
  }

  /// Shrinks the allocated block `id` to `size`, returning the excess to the free pool.
  pub fn shrink_in_place(
    &mut self,
    id: BlockId,
    size: usize,
  ) -> Result<()> {
    if let Some(tail) = self.split(id, size)? {
      self.coalesce_fully(tail);
    }

    Ok(())
  }

  /// Grows the allocated block `id` to `size` by taking over its free right neighbor.
  ///
  /// A neighbor that is the frontier must also leave room for the frontier's
  /// own header, so the sequence never loses its frontier.
  pub fn grow_in_place(
    &mut self,
    id: BlockId,
    size: usize,
  ) -> Result<bool> {
    let Some(next_id) = self.block(id).next else {
      return Ok(false);
    };

    let (block, next) = (self.block(id), self.block(next_id));
    if !next.is_free() || !block.touches(next) {
      return Ok(false);
    }

    let combined = block.size() + HEADER_SIZE + next.size();
    let needed = if self.frontier == Some(next_id) {
      size.checked_add(HEADER_SIZE)
    } else {
      Some(size)
    };

    if needed.is_none_or(|needed| combined < needed) {
      return Ok(false);
    }

    // Swallowing the frontier briefly makes `id` the frontier; the split
    // below always has room for a header then and hands it to the tail.
    // The merge frees a slot, so the split cannot run out of ids.
    self.merge_next(id);
    self.shrink_in_place(id, size)?;

    Ok(true)
  }

  /// Checks every structural invariant against the arena's bookkeeping.
  pub fn validate(
    &self,
    obtained: usize,
  ) -> Result<()> {
    let mut seen = 0;
    let mut footprint = 0usize;
    let mut prev: Option<(BlockId, &Block)> = None;

    for (id, block) in self.iter() {
      seen += 1;
      if seen > self.index.len() {
        return Err(HeapError::Corrupted("block sequence is longer than the index"));
      }

      if self.index.get(&block.address) != Some(&id) {
        return Err(HeapError::Corrupted("block missing from the address index"));
      }

      if !is_aligned(block.address) {
        return Err(HeapError::Corrupted("misaligned payload address"));
      }

      if Some(id) != self.frontier && !is_aligned(block.size()) {
        return Err(HeapError::Corrupted("block size is not a multiple of the alignment"));
      }

      if block.prev != prev.map(|(prev_id, _)| prev_id) {
        return Err(HeapError::Corrupted("broken back link"));
      }

      if let Some((_, prev)) = prev {
        if prev.end() + HEADER_SIZE > block.address {
          return Err(HeapError::Corrupted("block addresses do not increase"));
        }

        if prev.is_free() && block.is_free() && prev.touches(block) {
          return Err(HeapError::Corrupted("adjacent free blocks"));
        }
      }

      footprint += block.size() + HEADER_SIZE;
      prev = Some((id, block));
    }

    if seen != self.index.len() {
      return Err(HeapError::Corrupted("index holds unreachable blocks"));
    }

    if footprint != obtained {
      return Err(HeapError::Corrupted("block footprint differs from arena size"));
    }

    match (self.frontier, prev) {
      (None, None) => Ok(()),
      (Some(frontier), Some((last, block))) if frontier == last && block.is_free() => Ok(()),
      _ => Err(HeapError::Corrupted("frontier is not the last free block")),
    }
  }
}

/// Blocks in address order, starting from the head.
pub struct Blocks<'a> {
  directory: &'a BlockDirectory,
  cursor: Option<BlockId>,
}

impl<'a> Iterator for Blocks<'a> {
  type Item = (BlockId, &'a Block);

  fn next(&mut self) -> Option<Self::Item> {
    let id = self.cursor?;
    let block = self.directory.block(id);
    self.cursor = block.next;
    Some((id, block))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grower::{Exhausted, Region};

  const INCREMENT: usize = 4096;

  fn fixture(capacity: usize) -> (BlockDirectory, Arena<Region>) {
    (
      BlockDirectory::new(),
      Arena::new(Region::with_capacity(capacity), INCREMENT),
    )
  }

  fn states(directory: &BlockDirectory) -> Vec<BlockState> {
    directory.iter().map(|(_, block)| block.state).collect()
  }

  #[test]
  fn test_first_fit_initializes_frontier() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let id = directory.find_fit(&mut arena, 64).unwrap();

    assert_eq!(directory.head(), Some(id));
    assert_eq!(
      states(&directory),
      vec![
        BlockState::Allocated { size: 64 },
        BlockState::Free {
          size: INCREMENT - 64 - 2 * HEADER_SIZE
        },
      ]
    );
    assert_eq!(arena.growths(), 1);
    directory.validate(arena.obtained()).unwrap();
  }

  #[test]
  fn test_first_fit_prefers_earliest_hole() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let a = directory.find_fit(&mut arena, 256).unwrap();
    let _b = directory.find_fit(&mut arena, 32).unwrap();
    let c = directory.find_fit(&mut arena, 256).unwrap();
    let _d = directory.find_fit(&mut arena, 32).unwrap();

    directory.release(a);
    directory.release(c);

    let reused = directory.find_fit(&mut arena, 64).unwrap();
    assert_eq!(reused, a);
    assert_eq!(directory.block(reused).size(), 64);
    directory.validate(arena.obtained()).unwrap();
  }

  #[test]
  fn test_exact_hole_is_skipped() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let a = directory.find_fit(&mut arena, 64).unwrap();
    let _b = directory.find_fit(&mut arena, 64).unwrap();
    let hole = directory.block(a).address;
    directory.release(a);

    // A hole must fit the request plus a header to be chosen.
    let next = directory.find_fit(&mut arena, 64).unwrap();
    assert_ne!(directory.block(next).address, hole);

    let smaller = directory.find_fit(&mut arena, 64 - HEADER_SIZE).unwrap();
    assert_eq!(directory.block(smaller).address, hole);
  }

  #[test]
  fn test_growth_on_miss() {
    let (mut directory, mut arena) = fixture(INCREMENT * 4);

    directory.find_fit(&mut arena, 16).unwrap();
    let big = directory.find_fit(&mut arena, INCREMENT * 2).unwrap();

    assert_eq!(arena.growths(), 3);
    assert_eq!(directory.block(big).size(), INCREMENT * 2);
    directory.validate(arena.obtained()).unwrap();
  }

  #[test]
  fn test_out_of_memory_leaves_state_valid() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    directory.find_fit(&mut arena, 128).unwrap();
    let before = states(&directory);

    assert_eq!(
      directory.find_fit(&mut arena, INCREMENT),
      Err(HeapError::OutOfMemory {
        requested: INCREMENT
      })
    );
    assert_eq!(states(&directory), before);
    directory.validate(arena.obtained()).unwrap();

    let mut empty = BlockDirectory::new();
    let mut nothing = Arena::new(Exhausted, INCREMENT);
    assert!(empty.find_fit(&mut nothing, 16).is_err());
    assert!(empty.is_empty());
  }

  #[test]
  fn test_split_absorbs_small_leftover() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let id = directory.find_fit(&mut arena, 128).unwrap();
    directory.find_fit(&mut arena, 16).unwrap();
    directory.release(id);

    assert_eq!(directory.split(id, 128 - 16), Ok(None));
    assert_eq!(directory.block(id).state, BlockState::Allocated { size: 128 });
  }

  #[test]
  fn test_coalesce_both_neighbors() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let a = directory.find_fit(&mut arena, 32).unwrap();
    let b = directory.find_fit(&mut arena, 32).unwrap();
    let c = directory.find_fit(&mut arena, 32).unwrap();
    let _guard = directory.find_fit(&mut arena, 32).unwrap();

    directory.release(a);
    directory.release(c);
    assert_eq!(directory.len(), 5);

    let survivor = directory.release(b);
    assert_eq!(survivor, a);
    assert_eq!(directory.block(a).size(), 3 * 32 + 2 * HEADER_SIZE);
    assert_eq!(directory.len(), 3);
    directory.validate(arena.obtained()).unwrap();
  }

  #[test]
  fn test_coalesce_into_frontier() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let a = directory.find_fit(&mut arena, 112).unwrap();
    let survivor = directory.release(a);

    assert_eq!(directory.frontier(), Some(survivor));
    assert_eq!(directory.len(), 1);
    assert_eq!(directory.block(survivor).size(), INCREMENT - HEADER_SIZE);
  }

  #[test]
  fn test_coalesce_fully_handles_runs() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let ids: Vec<_> = (0..4)
      .map(|_| directory.find_fit(&mut arena, 48).unwrap())
      .collect();

    // Force a run of free blocks that were never merged.
    for &id in &ids[..3] {
      directory.block_mut(id).mark_free();
    }
    let (_, merged) = directory.coalesce(ids[1]);
    assert!(merged);

    directory.block_mut(ids[3]).mark_free();
    let survivor = directory.coalesce_fully(ids[3]);

    assert_eq!(directory.len(), 1);
    assert_eq!(directory.frontier(), Some(survivor));
    directory.validate(arena.obtained()).unwrap();
  }

  #[test]
  fn test_resolve() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let a = directory.find_fit(&mut arena, 64).unwrap();
    let b = directory.find_fit(&mut arena, 64).unwrap();
    let (a_addr, b_addr) = (directory.block(a).address, directory.block(b).address);

    assert_eq!(directory.resolve(a_addr), Some(a));
    assert_eq!(directory.resolve(a_addr + 10), Some(a));
    assert_eq!(directory.resolve(b_addr - 1), Some(a));
    assert_eq!(directory.resolve(b_addr), Some(b));
    assert_eq!(directory.resolve(a_addr - 1), None);

    // Nothing follows the frontier, so only its exact address resolves.
    let frontier = directory.frontier().unwrap();
    let f_addr = directory.block(frontier).address;
    assert_eq!(directory.resolve(f_addr), Some(frontier));
    assert_eq!(directory.resolve(f_addr + 16), None);
  }

  #[test]
  fn test_grow_in_place() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let a = directory.find_fit(&mut arena, 64).unwrap();
    let b = directory.find_fit(&mut arena, 128).unwrap();
    let _c = directory.find_fit(&mut arena, 64).unwrap();
    directory.release(b);

    assert_eq!(directory.grow_in_place(a, 64 + HEADER_SIZE + 64), Ok(true));
    assert_eq!(directory.block(a).size(), 64 + HEADER_SIZE + 64);
    assert_eq!(directory.grow_in_place(a, 1024), Ok(false));
    directory.validate(arena.obtained()).unwrap();
  }

  #[test]
  fn test_grow_in_place_keeps_frontier() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let a = directory.find_fit(&mut arena, 64).unwrap();
    let frontier_size = directory.block(directory.frontier().unwrap()).size();
    let all = 64 + HEADER_SIZE + frontier_size;

    assert_eq!(directory.grow_in_place(a, all), Ok(false));
    assert_eq!(directory.grow_in_place(a, all - HEADER_SIZE), Ok(true));

    let frontier = directory.frontier().unwrap();
    assert_ne!(frontier, a);
    assert_eq!(directory.block(frontier).size(), 0);
    directory.validate(arena.obtained()).unwrap();
  }

  #[test]
  fn test_shrink_in_place_merges_tail() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let a = directory.find_fit(&mut arena, 256).unwrap();
    directory.shrink_in_place(a, 64).unwrap();

    assert_eq!(directory.block(a).size(), 64);
    assert_eq!(directory.len(), 2);
    directory.validate(arena.obtained()).unwrap();
  }

  #[test]
  fn test_detached_growth_starts_new_frontier() {
    let mut directory = BlockDirectory::new();

    directory
      .absorb(Growth::Fresh { start: 0x10000 }, INCREMENT)
      .unwrap();
    let first = directory.frontier().unwrap();
    directory
      .absorb(Growth::Detached { start: 0x40000 }, INCREMENT)
      .unwrap();
    let second = directory.frontier().unwrap();

    assert_ne!(first, second);
    assert!(directory.block(first).is_free());
    assert_eq!(directory.block(second).address, 0x40000 + HEADER_SIZE);

    // Free but not adjacent, so they stay apart.
    assert_eq!(directory.coalesce_fully(second), second);
    assert_eq!(directory.len(), 2);
    directory.validate(2 * INCREMENT).unwrap();
  }

  #[test]
  fn test_validate_catches_adjacent_free_blocks() {
    let (mut directory, mut arena) = fixture(INCREMENT);

    let a = directory.find_fit(&mut arena, 64).unwrap();
    directory.find_fit(&mut arena, 64).unwrap();
    directory.block_mut(a).mark_free();
    directory.validate(arena.obtained()).unwrap();

    let b = directory.block(a).next.unwrap();
    directory.block_mut(b).mark_free();
    assert_eq!(
      directory.validate(arena.obtained()),
      Err(HeapError::Corrupted("adjacent free blocks"))
    );
    assert!(directory.validate(arena.obtained() + 16).is_err());
  }
}
