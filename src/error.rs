use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
  /// The grower could not supply another increment.
  #[error("out of memory: {requested} bytes could not be obtained")]
  OutOfMemory { requested: usize },

  /// The address does not belong to a live allocation.
  #[error("invalid pointer: {0:#x}")]
  InvalidPointer(usize),

  /// A size computation does not fit in `usize`.
  #[error("size computation overflowed")]
  Overflow,

  /// The grower returned memory below space the arena already holds.
  #[error("grower returned {start:#x}, below the arena end {end:#x}")]
  Unordered { start: usize, end: usize },

  #[error("range {address:#x}+{len} is outside the arena")]
  OutOfBounds { address: usize, len: usize },

  /// A structural invariant of the block directory does not hold.
  #[error("heap corrupted: {0}")]
  Corrupted(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("invalid heap increment: {0}")]
  InvalidIncrement(String),
}

pub type Result<T> = std::result::Result<T, HeapError>;
