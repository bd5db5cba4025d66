//! Client configuration
//!
//! [`ClientConfig`] enumerates every tuning knob of the client with its default.
//! Values can be set through the builder methods or overridden from
//! `GRIDCHECK_*` environment variables via [`ClientConfig::from_env`].

use crate::debug::runtime::{runtime_toggles, RuntimeToggles};
use std::time::Duration;

/// Default number of tests that may open concurrently.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Render submissions allowed in flight per unit of open-test concurrency.
pub const DEFAULT_RENDER_CONCURRENCY_FACTOR: usize = 5;

/// Tuning for a [`crate::GridClient`].
///
/// # Example
///
/// ```rust
/// use gridcheck::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new()
///     .with_concurrency(3)
///     .with_render_status_timeout(Duration::from_secs(60));
/// assert_eq!(config.render_concurrency(), 15);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
  /// Size of the open-test gate.
  pub concurrency: usize,
  /// Multiplier applied to `concurrency` to size the render gate.
  pub render_concurrency_factor: usize,
  /// Delay between two render-status polls.
  pub render_status_interval: Duration,
  /// Upper bound on the time spent waiting for one render.
  pub render_status_timeout: Duration,
  /// Extra attempts made after a transient fetch failure.
  pub fetch_retries: u32,
  /// Delay between fetch attempts.
  pub fetch_retry_delay: Duration,
  /// Timeout applied to each network fetch.
  pub fetch_timeout: Duration,
  /// User agent sent on resource fetches instead of the grid's table entry.
  pub user_agent: Option<String>,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      concurrency: DEFAULT_CONCURRENCY,
      render_concurrency_factor: DEFAULT_RENDER_CONCURRENCY_FACTOR,
      render_status_interval: Duration::from_millis(500),
      render_status_timeout: Duration::from_secs(120),
      fetch_retries: 2,
      fetch_retry_delay: Duration::from_millis(100),
      fetch_timeout: Duration::from_secs(30),
      user_agent: None,
    }
  }
}

impl ClientConfig {
  /// Create a configuration with default settings
  pub fn new() -> Self {
    Self::default()
  }

  /// Defaults overridden by the process environment.
  pub fn from_env() -> Self {
    Self::default().with_toggles(&runtime_toggles())
  }

  /// Apply `GRIDCHECK_*` overrides from the given toggles.
  pub fn with_toggles(mut self, toggles: &RuntimeToggles) -> Self {
    if let Some(v) = toggles.usize("GRIDCHECK_CONCURRENCY") {
      self.concurrency = v;
    }
    if let Some(v) = toggles.usize("GRIDCHECK_RENDER_CONCURRENCY_FACTOR") {
      self.render_concurrency_factor = v;
    }
    if let Some(v) = toggles.u64("GRIDCHECK_RENDER_STATUS_INTERVAL_MS") {
      self.render_status_interval = Duration::from_millis(v);
    }
    if let Some(v) = toggles.u64("GRIDCHECK_RENDER_STATUS_TIMEOUT_MS") {
      self.render_status_timeout = Duration::from_millis(v);
    }
    if let Some(v) = toggles.u64("GRIDCHECK_FETCH_RETRIES") {
      self.fetch_retries = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = toggles.u64("GRIDCHECK_FETCH_TIMEOUT_MS") {
      self.fetch_timeout = Duration::from_millis(v);
    }
    if let Some(ua) = toggles.string("GRIDCHECK_USER_AGENT") {
      self.user_agent = Some(ua);
    }
    self
  }

  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency;
    self
  }

  pub fn with_render_concurrency_factor(mut self, factor: usize) -> Self {
    self.render_concurrency_factor = factor;
    self
  }

  pub fn with_render_status_interval(mut self, interval: Duration) -> Self {
    self.render_status_interval = interval;
    self
  }

  pub fn with_render_status_timeout(mut self, timeout: Duration) -> Self {
    self.render_status_timeout = timeout;
    self
  }

  pub fn with_fetch_retries(mut self, retries: u32) -> Self {
    self.fetch_retries = retries;
    self
  }

  pub fn with_fetch_retry_delay(mut self, delay: Duration) -> Self {
    self.fetch_retry_delay = delay;
    self
  }

  pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
    self.fetch_timeout = timeout;
    self
  }

  pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
    self.user_agent = Some(user_agent.into());
    self
  }

  /// Size of the open-test gate (never zero).
  pub fn open_concurrency(&self) -> usize {
    self.concurrency.max(1)
  }

  /// Size of the render gate (never zero).
  pub fn render_concurrency(&self) -> usize {
    self
      .open_concurrency()
      .saturating_mul(self.render_concurrency_factor.max(1))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn render_gate_scales_with_open_concurrency() {
    let config = ClientConfig::new()
      .with_concurrency(2)
      .with_render_concurrency_factor(4);
    assert_eq!(config.open_concurrency(), 2);
    assert_eq!(config.render_concurrency(), 8);
  }

  #[test]
  fn zero_sizes_are_clamped() {
    let config = ClientConfig::new()
      .with_concurrency(0)
      .with_render_concurrency_factor(0);
    assert_eq!(config.open_concurrency(), 1);
    assert_eq!(config.render_concurrency(), 1);
  }

  #[test]
  fn toggles_override_defaults() {
    let mut raw = HashMap::new();
    raw.insert("GRIDCHECK_CONCURRENCY".to_string(), "4".to_string());
    raw.insert(
      "GRIDCHECK_RENDER_STATUS_TIMEOUT_MS".to_string(),
      "2500".to_string(),
    );
    raw.insert("GRIDCHECK_USER_AGENT".to_string(), "gridcheck-ci/1.0".to_string());
    let config = ClientConfig::new().with_toggles(&RuntimeToggles::from_map(raw));
    assert_eq!(config.concurrency, 4);
    assert_eq!(config.render_status_timeout, Duration::from_millis(2500));
    assert_eq!(config.user_agent.as_deref(), Some("gridcheck-ci/1.0"));
    assert_eq!(config.fetch_retries, 2);
  }
}
