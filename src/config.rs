use std::{env, ffi::OsString};

use crate::{
  align::{self, ALIGNMENT},
  block::HEADER_SIZE,
  error::ConfigError,
};

/// Presence of this variable turns on the per-call trace lines.
pub const DEBUG_ENV: &str = "DEBUG_MALLOC";

/// Overrides the growth increment, in bytes.
pub const INCREMENT_ENV: &str = "MALLOC_INCREMENT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
  /// Bytes requested from the grower per growth. Always aligned.
  pub increment: usize,
  pub debug: bool,
}

impl HeapConfig {
  pub const DEFAULT_INCREMENT: usize = 64000;

  /// Smallest increment that still leaves room for one header and one granule.
  pub const MIN_INCREMENT: usize = HEADER_SIZE + ALIGNMENT;

  pub fn with_increment(
    mut self,
    increment: usize,
  ) -> Self {
    self.increment = align::round_up(increment)
      .unwrap_or(usize::MAX & !(ALIGNMENT - 1))
      .max(Self::MIN_INCREMENT);
    self
  }

  pub fn with_debug(
    mut self,
    debug: bool,
  ) -> Self {
    self.debug = debug;
    self
  }

  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|key| env::var_os(key))
  }

  /// Builds a config from an arbitrary variable lookup.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<OsString>,
  {
    let mut config = Self::default().with_debug(lookup(DEBUG_ENV).is_some());

    if let Some(raw) = lookup(INCREMENT_ENV) {
      let raw = raw.to_string_lossy();
      let increment: usize = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidIncrement(raw.to_string()))?;

      if increment == 0 {
        return Err(ConfigError::InvalidIncrement(raw.to_string()));
      }

      config = config.with_increment(increment);
    }

    Ok(config)
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      increment: Self::DEFAULT_INCREMENT,
      debug: false,
    }
  }
}
