//! Diff backend seam
//!
//! A [`DiffSession`] is one open test on the visual-diff backend for one
//! browser. The orchestrator opens it, feeds it one screenshot per step in
//! step order, and closes or aborts it at the end of the test.

use crate::check::settings::{MatchLevel, ResolvedAccessibilityRegion, ResolvedFloatingRegion};
use crate::error::Result;
use crate::render::grid::DeviceSize;
use crate::render::request::Region;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Placeholder in a results URL template replaced by a unique token per render.
pub const RANDOM_PLACEHOLDER: &str = "__random__";

/// Everything the diff backend needs to compare one step's screenshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckArgs {
  pub step: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tag: Option<String>,
  pub url: String,
  pub render_id: String,
  pub screenshot_url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dom_url: Option<String>,
  /// Top-left corner of the captured target within the page.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_location: Option<Region>,
  pub ignore: Vec<Region>,
  pub layout: Vec<Region>,
  pub strict: Vec<Region>,
  pub content: Vec<Region>,
  pub accessibility: Vec<ResolvedAccessibilityRegion>,
  pub floating: Vec<ResolvedFloatingRegion>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub match_level: Option<MatchLevel>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub use_dom: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub enable_patterns: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ignore_displacements: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
  pub as_expected: bool,
}

/// Final state of one browser's test on the diff backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default)]
  pub steps: usize,
  #[serde(default)]
  pub mismatches: usize,
  #[serde(default)]
  pub is_aborted: bool,
}

/// One browser's test on the diff backend.
#[async_trait]
pub trait DiffSession: Send + Sync {
  /// Open the test; awaited before the first step is delivered.
  async fn open(&self) -> Result<()>;

  async fn check_window(&self, args: CheckArgs) -> Result<MatchResult>;

  /// Environment detected by the grid, e.g. `useragent:<string>`.
  async fn set_inferred_environment(&self, environment: String) -> Result<()>;

  async fn set_viewport_size(&self, size: DeviceSize) -> Result<()>;

  async fn close(&self) -> Result<TestResults>;

  async fn abort(&self) -> Result<TestResults>;

  /// Template of the URL the grid posts results to; may contain [`RANDOM_PLACEHOLDER`].
  fn results_url(&self) -> Option<String> {
    None
  }
}

/// Webhook for one render: the results URL with its placeholder filled in.
pub fn webhook_from_template(template: &str, token: &str) -> String {
  template.replace(RANDOM_PLACEHOLDER, token)
}
