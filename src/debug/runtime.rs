use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;

/// Prefix shared by every environment toggle read by this crate.
pub const TOGGLE_PREFIX: &str = "GRIDCHECK_";

/// Parsed runtime configuration toggles sourced from `GRIDCHECK_*` environment variables.
///
/// Values are captured once (via [`RuntimeToggles::from_env`]) and then reused for the
/// lifetime of a client. Callers can also construct instances manually to override
/// environment-derived behavior when embedding the library.
#[derive(Debug, Clone, Default)]
pub struct RuntimeToggles {
  raw: HashMap<String, String>,
}

impl RuntimeToggles {
  /// Parse all `GRIDCHECK_*` environment variables into a toggle map.
  pub fn from_env() -> Self {
    let raw = std::env::vars()
      .filter(|(k, _)| k.starts_with(TOGGLE_PREFIX))
      .collect::<HashMap<_, _>>();
    Self { raw }
  }

  /// Construct a toggle set from a provided map of key/value pairs.
  pub fn from_map(raw: HashMap<String, String>) -> Self {
    Self { raw }
  }

  /// Returns the raw string value for a toggle, if set.
  pub fn get(&self, key: &str) -> Option<&str> {
    self.raw.get(key).map(String::as_str)
  }

  /// Returns the trimmed string value for a toggle, ignoring empty values.
  pub fn string(&self, key: &str) -> Option<String> {
    self
      .get(key)
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .map(str::to_string)
  }

  /// Parse a toggle as `usize`, returning `None` when unset or unparseable.
  pub fn usize(&self, key: &str) -> Option<usize> {
    self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
  }

  /// Parse a toggle as `u64`, returning `None` when unset or unparseable.
  pub fn u64(&self, key: &str) -> Option<u64> {
    self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
  }
}

static DEFAULT_TOGGLES: OnceLock<Arc<RuntimeToggles>> = OnceLock::new();

/// Returns the process-wide toggles captured from the environment on first use.
pub fn runtime_toggles() -> Arc<RuntimeToggles> {
  DEFAULT_TOGGLES
    .get_or_init(|| Arc::new(RuntimeToggles::from_env()))
    .clone()
}
