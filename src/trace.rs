//! Per-call diagnostic records and the sinks that consume them.
//!
//! Every public heap operation produces one [`TraceRecord`] and hands it to
//! the heap's [`Trace`] sink once the block directory is consistent again.
//! Sinks only ever see a copy of the record; they hold no reference into the
//! heap and cannot re-enter it.
//!
//! ```text
//!   MALLOC: malloc(100) => (ptr=0x55d0c3a2f030, size=112)
//!   MALLOC: free(0x55d0c3a2f030) => (ptr=0x55d0c3a2f030, size=112)
//!   MALLOC: free(0xdead) => invalid pointer
//! ```

use std::fmt::{self, Write};

use libc::{STDERR_FILENO, c_void};

use crate::error::HeapError;

/// Longest line [`StderrTrace`] emits, newline included. Longer lines are cut.
pub const MAX_TRACE_LEN: usize = 128;

/// The public call being traced, with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
  Malloc { size: usize },
  Calloc { count: usize, elem_size: usize },
  Free { ptr: usize },
  Realloc { ptr: usize, size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// A block was handed out; `size` is its full payload capacity.
  Granted { ptr: usize, size: usize },
  /// Nothing was allocated and nothing went wrong.
  Null,
  Released { ptr: usize, size: usize },
  InvalidPointer,
  OutOfMemory,
  Overflow,
  /// The directory failed a consistency check; the call was abandoned.
  Corrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
  pub call: Call,
  pub outcome: Outcome,
}

impl TraceRecord {
  pub fn new(
    call: Call,
    outcome: Outcome,
  ) -> Self {
    Self { call, outcome }
  }

  pub fn is_failure(&self) -> bool {
    matches!(
      self.outcome,
      Outcome::InvalidPointer | Outcome::OutOfMemory | Outcome::Overflow | Outcome::Corrupted
    )
  }
}

impl fmt::Display for Call {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match *self {
      Call::Malloc { size } => write!(f, "malloc({size})"),
      Call::Calloc { count, elem_size } => write!(f, "calloc({count}, {elem_size})"),
      Call::Free { ptr } => write!(f, "free({ptr:#x})"),
      Call::Realloc { ptr, size } => write!(f, "realloc({ptr:#x}, {size})"),
    }
  }
}

impl fmt::Display for Outcome {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match *self {
      Outcome::Granted { ptr, size } | Outcome::Released { ptr, size } => {
        write!(f, "(ptr={ptr:#x}, size={size})")
      }
      Outcome::Null => f.write_str("(ptr=0x0, size=0)"),
      Outcome::InvalidPointer => f.write_str("invalid pointer"),
      Outcome::OutOfMemory => f.write_str("out of memory"),
      Outcome::Overflow => f.write_str("overflow"),
      Outcome::Corrupted => f.write_str("heap corrupted"),
    }
  }
}

impl fmt::Display for TraceRecord {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "MALLOC: {} => {}", self.call, self.outcome)
  }
}

impl From<&HeapError> for Outcome {
  fn from(err: &HeapError) -> Self {
    match err {
      HeapError::OutOfMemory { .. } | HeapError::Unordered { .. } => Outcome::OutOfMemory,
      HeapError::InvalidPointer(_) => Outcome::InvalidPointer,
      HeapError::Overflow => Outcome::Overflow,
      HeapError::OutOfBounds { .. } | HeapError::Corrupted(_) => Outcome::Corrupted,
    }
  }
}

/// Receives one record per public heap operation.
pub trait Trace {
  fn record(
    &mut self,
    record: &TraceRecord,
  );
}

/// Drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrace;

impl Trace for NoTrace {
  fn record(
    &mut self,
    _record: &TraceRecord,
  ) {
  }
}

/// Keeps every record, mostly for inspection in tests.
impl Trace for Vec<TraceRecord> {
  fn record(
    &mut self,
    record: &TraceRecord,
  ) {
    self.push(*record);
  }
}

/// Adapts a closure into a sink.
pub struct FnTrace<F>(pub F);

impl<F> Trace for FnTrace<F>
where
  F: FnMut(&TraceRecord),
{
  fn record(
    &mut self,
    record: &TraceRecord,
  ) {
    (self.0)(record)
  }
}

/// Writes each record as one line to standard error without allocating.
///
/// Safe to use from a heap that backs the process allocator: the line is
/// formatted into a stack buffer and handed straight to `write(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTrace {
  enabled: bool,
}

impl StderrTrace {
  pub fn new(enabled: bool) -> Self {
    Self { enabled }
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }
}

impl Trace for StderrTrace {
  fn record(
    &mut self,
    record: &TraceRecord,
  ) {
    if !self.enabled {
      return;
    }

    let line = LineBuffer::format(record);
    let bytes = line.as_bytes();

    unsafe {
      libc::write(STDERR_FILENO, bytes.as_ptr() as *const c_void, bytes.len());
    }
  }
}

/// Fixed-size line buffer that silently truncates.
struct LineBuffer {
  buf: [u8; MAX_TRACE_LEN],
  len: usize,
}

impl LineBuffer {
  fn new() -> Self {
    Self {
      buf: [0; MAX_TRACE_LEN],
      len: 0,
    }
  }

  fn format(record: &TraceRecord) -> Self {
    let mut line = Self::new();

    let _ = write!(line, "{record}");
    line.finish();

    line
  }

  fn finish(&mut self) {
    self.buf[self.len] = b'\n';
    self.len += 1;
  }

  fn as_bytes(&self) -> &[u8] {
    &self.buf[..self.len]
  }
}

impl fmt::Write for LineBuffer {
  fn write_str(
    &mut self,
    s: &str,
  ) -> fmt::Result {
    // One byte stays free for the newline.
    let room = MAX_TRACE_LEN - 1 - self.len;
    let take = room.min(s.len());

    self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
    self.len += take;

    Ok(())
  }
}

/// Forwards records to `tracing` as structured events.
///
/// Subscribers usually allocate while formatting, so this sink is for heaps
/// that are not serving the process allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTrace;

impl Trace for TracingTrace {
  fn record(
    &mut self,
    record: &TraceRecord,
  ) {
    if record.is_failure() {
      tracing::warn!(call = %record.call, outcome = %record.outcome, "{record}");
    } else {
      tracing::debug!(call = %record.call, outcome = %record.outcome, "{record}");
    }
  }
}
