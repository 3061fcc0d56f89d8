use std::fmt;

/// Point-in-time summary of a heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes obtained from the grower so far.
  pub obtained: usize,
  /// Successful growth calls.
  pub growths: usize,
  /// Live blocks, frontier included.
  pub blocks: usize,
  pub free_blocks: usize,
  /// Payload bytes in free blocks, frontier included.
  pub free_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  /// Payload bytes left in the frontier.
  pub frontier: usize,
}

impl HeapStats {
  /// Bytes spent on block headers.
  pub fn overhead(&self) -> usize {
    self.obtained - self.free_bytes - self.allocated_bytes
  }
}

impl fmt::Display for HeapStats {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "obtained={} growths={} blocks={} allocated={}/{}B free={}/{}B frontier={}B",
      self.obtained,
      self.growths,
      self.blocks,
      self.allocated_blocks,
      self.allocated_bytes,
      self.free_blocks,
      self.free_bytes,
      self.frontier,
    )
  }
}
