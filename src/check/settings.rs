//! Configuration of one check-window step.
//!
//! Every recognized option is an explicit field. Options that may be left
//! unset (as opposed to set to `false`) are `Option`s so the diff backend can
//! fall back to its own defaults.

use crate::error::ValidationError;
use crate::render::request::{Region, SizeMode};
use serde::{Deserialize, Serialize};

/// What the step captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
  #[default]
  Window,
  /// Needs a selector or an explicit region.
  Region,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchLevel {
  None,
  Layout,
  Content,
  Strict,
  Exact,
}

/// A region given either as a selector (resolved by the grid) or as coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionTarget {
  Selector(String),
  Rect(Region),
}

impl From<&str> for RegionTarget {
  fn from(selector: &str) -> Self {
    RegionTarget::Selector(selector.to_string())
  }
}

impl From<String> for RegionTarget {
  fn from(selector: String) -> Self {
    RegionTarget::Selector(selector)
  }
}

impl From<Region> for RegionTarget {
  fn from(region: Region) -> Self {
    RegionTarget::Rect(region)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessibilityRegion {
  pub target: RegionTarget,
  pub accessibility_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloatingOffsets {
  pub max_up_offset: u32,
  pub max_down_offset: u32,
  pub max_left_offset: u32,
  pub max_right_offset: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloatingRegion {
  pub target: RegionTarget,
  pub offsets: FloatingOffsets,
}

/// Accessibility region with coordinates resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAccessibilityRegion {
  #[serde(flatten)]
  pub region: Region,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub accessibility_type: Option<String>,
}

/// Floating region with coordinates resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFloatingRegion {
  #[serde(flatten)]
  pub region: Region,
  #[serde(flatten)]
  pub offsets: FloatingOffsets,
}

/// Match regions of a step with every selector replaced by what the grid found.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedRegions {
  /// Regions of the target selector, when the step targets one.
  pub target: Vec<Region>,
  pub ignore: Vec<Region>,
  pub layout: Vec<Region>,
  pub strict: Vec<Region>,
  pub content: Vec<Region>,
  pub accessibility: Vec<ResolvedAccessibilityRegion>,
  pub floating: Vec<ResolvedFloatingRegion>,
}

/// Settings of one check-window step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CheckSettings {
  pub name: Option<String>,
  pub target: Target,
  pub fully: Option<bool>,
  pub selector: Option<String>,
  pub region: Option<Region>,
  pub ignore: Vec<RegionTarget>,
  pub layout: Vec<RegionTarget>,
  pub strict: Vec<RegionTarget>,
  pub content: Vec<RegionTarget>,
  pub accessibility: Vec<AccessibilityRegion>,
  pub floating: Vec<FloatingRegion>,
  pub send_dom: Option<bool>,
  pub match_level: Option<MatchLevel>,
  pub use_dom: Option<bool>,
  pub enable_patterns: Option<bool>,
  pub ignore_displacements: Option<bool>,
  pub script_hooks: Option<serde_json::Value>,
  /// Free-form render options forwarded to the grid.
  pub render_options: Option<serde_json::Value>,
}

impl CheckSettings {
  /// Capture the browser window.
  pub fn window() -> Self {
    Self::default()
  }

  /// Capture the element(s) matching `selector`.
  pub fn selector(selector: impl Into<String>) -> Self {
    Self {
      target: Target::Region,
      selector: Some(selector.into()),
      ..Self::default()
    }
  }

  /// Capture a fixed rectangle.
  pub fn region(region: Region) -> Self {
    Self {
      target: Target::Region,
      region: Some(region),
      ..Self::default()
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn fully(mut self, fully: bool) -> Self {
    self.fully = Some(fully);
    self
  }

  pub fn ignore(mut self, region: impl Into<RegionTarget>) -> Self {
    self.ignore.push(region.into());
    self
  }

  pub fn layout(mut self, region: impl Into<RegionTarget>) -> Self {
    self.layout.push(region.into());
    self
  }

  pub fn strict(mut self, region: impl Into<RegionTarget>) -> Self {
    self.strict.push(region.into());
    self
  }

  pub fn content(mut self, region: impl Into<RegionTarget>) -> Self {
    self.content.push(region.into());
    self
  }

  pub fn accessibility(mut self, region: impl Into<RegionTarget>, accessibility_type: Option<String>) -> Self {
    self.accessibility.push(AccessibilityRegion {
      target: region.into(),
      accessibility_type,
    });
    self
  }

  pub fn floating(mut self, region: impl Into<RegionTarget>, offsets: FloatingOffsets) -> Self {
    self.floating.push(FloatingRegion {
      target: region.into(),
      offsets,
    });
    self
  }

  pub fn with_send_dom(mut self, send_dom: bool) -> Self {
    self.send_dom = Some(send_dom);
    self
  }

  pub fn with_match_level(mut self, match_level: MatchLevel) -> Self {
    self.match_level = Some(match_level);
    self
  }

  pub fn with_script_hooks(mut self, hooks: serde_json::Value) -> Self {
    self.script_hooks = Some(hooks);
    self
  }

  pub fn with_render_options(mut self, options: serde_json::Value) -> Self {
    self.render_options = Some(options);
    self
  }

  fn is_fully(&self) -> bool {
    self.fully.unwrap_or(false)
  }

  pub fn size_mode(&self) -> SizeMode {
    match self.target {
      Target::Window if self.is_fully() => SizeMode::FullPage,
      Target::Window => SizeMode::Viewport,
      Target::Region => match (&self.selector, &self.region) {
        (Some(_), _) if self.is_fully() => SizeMode::FullSelector,
        (Some(_), _) => SizeMode::Selector,
        (None, Some(_)) => SizeMode::Region,
        (None, None) => SizeMode::Viewport,
      },
    }
  }

  /// Selector sent as the capture target, if any.
  pub fn target_selector(&self) -> Option<&str> {
    match self.target {
      Target::Region => self.selector.as_deref(),
      Target::Window => None,
    }
  }

  /// Rectangle sent as the capture target, if any.
  pub fn target_region(&self) -> Option<Region> {
    match (self.target, &self.selector) {
      (Target::Region, None) => self.region,
      _ => None,
    }
  }

  fn region_groups(&self) -> [(&'static str, Vec<&RegionTarget>); 6] {
    [
      ("ignore", self.ignore.iter().collect()),
      ("layout", self.layout.iter().collect()),
      ("strict", self.strict.iter().collect()),
      ("content", self.content.iter().collect()),
      (
        "accessibility",
        self.accessibility.iter().map(|r| &r.target).collect(),
      ),
      ("floating", self.floating.iter().map(|r| &r.target).collect()),
    ]
  }

  /// Selectors the grid must locate: the target selector first, then the
  /// ignore, layout, strict, content, accessibility and floating selectors.
  pub fn selectors_to_find_regions_for(&self) -> Vec<String> {
    let mut selectors: Vec<String> = self.target_selector().map(str::to_string).into_iter().collect();
    for (_, group) in self.region_groups() {
      selectors.extend(group.into_iter().filter_map(|target| match target {
        RegionTarget::Selector(selector) => Some(selector.clone()),
        RegionTarget::Rect(_) => None,
      }));
    }
    selectors
  }

  /// Split the grid's per-selector regions back into their groups.
  ///
  /// `selector_regions` is aligned with [`Self::selectors_to_find_regions_for`];
  /// missing entries resolve to no region.
  pub fn resolve_regions(&self, selector_regions: &[Vec<Region>]) -> ResolvedRegions {
    let mut found = selector_regions.iter();
    let mut next = || found.next().cloned().unwrap_or_default();
    let mut expand = |target: &RegionTarget| match target {
      RegionTarget::Selector(_) => next(),
      RegionTarget::Rect(region) => vec![*region],
    };

    let mut resolved = ResolvedRegions::default();
    if self.target_selector().is_some() {
      resolved.target = expand(&RegionTarget::Selector(String::new()));
    }
    resolved.ignore = self.ignore.iter().flat_map(&mut expand).collect();
    resolved.layout = self.layout.iter().flat_map(&mut expand).collect();
    resolved.strict = self.strict.iter().flat_map(&mut expand).collect();
    resolved.content = self.content.iter().flat_map(&mut expand).collect();
    for region in &self.accessibility {
      for found in expand(&region.target) {
        resolved.accessibility.push(ResolvedAccessibilityRegion {
          region: found,
          accessibility_type: region.accessibility_type.clone(),
        });
      }
    }
    for region in &self.floating {
      for found in expand(&region.target) {
        resolved.floating.push(ResolvedFloatingRegion {
          region: found,
          offsets: region.offsets,
        });
      }
    }
    resolved
  }

  /// Reject settings that cannot be rendered, before any network activity.
  pub fn validate(&self) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidCheckSettings { reason };

    if self.target == Target::Region {
      match (&self.selector, &self.region) {
        (None, None) => {
          return Err(invalid(
            "region target needs a selector or a region".to_string(),
          ))
        }
        (Some(selector), _) if selector.trim().is_empty() => {
          return Err(invalid("target selector is empty".to_string()))
        }
        (None, Some(region)) if region.width <= 0.0 || region.height <= 0.0 => {
          return Err(invalid("target region must have a positive size".to_string()))
        }
        _ => {}
      }
    }

    for (index, region) in self.accessibility.iter().enumerate() {
      if let RegionTarget::Selector(selector) = &region.target {
        if selector.trim().is_empty() {
          return Err(ValidationError::InvalidAccessibilityRegion {
            index,
            reason: "selector is empty".to_string(),
          });
        }
      }
    }

    for (group, targets) in self.region_groups() {
      for target in targets {
        if matches!(target, RegionTarget::Selector(s) if s.trim().is_empty()) {
          return Err(invalid(format!("empty selector in {group} regions")));
        }
      }
    }
    Ok(())
  }
}
