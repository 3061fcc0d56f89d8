use std::mem;

use crate::align;

/// Bytes of arena space reserved ahead of every payload.
///
/// Block metadata lives in the directory, not in the arena, but each block
/// still occupies the footprint of its record so payloads stay aligned and
/// the arena accounting is the same as with in-band headers.
pub const HEADER_SIZE: usize = align!(mem::size_of::<Block>());

/// Index of a block record inside the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
  /// `None` once `index` no longer fits the id width.
  pub(crate) fn new(index: usize) -> Option<Self> {
    u32::try_from(index).ok().map(Self)
  }

  pub(crate) fn index(self) -> usize {
    self.0 as usize
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
  Free { size: usize },
  Allocated { size: usize },
}

#[derive(Debug, Clone)]
pub struct Block {
  /// Start of the payload, `HEADER_SIZE` bytes past the start of the block.
  pub address: usize,
  pub state: BlockState,
  pub prev: Option<BlockId>,
  pub next: Option<BlockId>,
}

impl Block {
  pub fn new(
    address: usize,
    state: BlockState,
    prev: Option<BlockId>,
    next: Option<BlockId>,
  ) -> Self {
    Self {
      address,
      state,
      prev,
      next,
    }
  }

  pub fn size(&self) -> usize {
    match self.state {
      BlockState::Free { size } | BlockState::Allocated { size } => size,
    }
  }

  pub fn is_free(&self) -> bool {
    matches!(self.state, BlockState::Free { .. })
  }

  pub fn set_size(
    &mut self,
    size: usize,
  ) {
    self.state = match self.state {
      BlockState::Free { .. } => BlockState::Free { size },
      BlockState::Allocated { .. } => BlockState::Allocated { size },
    };
  }

  pub fn mark_free(&mut self) {
    self.state = BlockState::Free { size: self.size() };
  }

  /// First byte of the reserved header area.
  pub fn start(&self) -> usize {
    self.address - HEADER_SIZE
  }

  /// One past the last payload byte.
  pub fn end(&self) -> usize {
    self.address + self.size()
  }

  /// Whether `other` begins exactly where this block ends.
  pub fn touches(
    &self,
    other: &Block,
  ) -> bool {
    self.end() == other.start()
  }
}
