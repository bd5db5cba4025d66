//! Render requests and the browser configurations they target.
//!
//! [`RenderRequestBuilder`] is a pure mapping: one [`RenderRequest`] per
//! [`BrowserConfig`], sharing the page URL, size mode, target selector/region,
//! script hooks, selectors to resolve and render options. No network access.

use crate::dom::AssembledDom;
use crate::dom::RGridDom;
use crate::error::{Result, ValidationError};
use crate::resource::graph::ResourceMap;
use crate::resource::HashObject;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Browser name assumed for iOS device renders.
pub const IOS_BROWSER_NAME: &str = "safari";
/// Platform assumed for iOS device renders.
pub const IOS_PLATFORM: &str = "ios";
/// Browser name used when a configuration does not name one.
pub const DEFAULT_BROWSER_NAME: &str = "chrome";

/// What part of the page the grid should capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeMode {
  #[default]
  Viewport,
  FullPage,
  Region,
  Selector,
  FullSelector,
}

/// Axis-aligned rectangle in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Region {
  #[serde(default)]
  pub x: f64,
  #[serde(default)]
  pub y: f64,
  #[serde(default)]
  pub width: f64,
  #[serde(default)]
  pub height: f64,
}

impl Region {
  pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenOrientation {
  Portrait,
  Landscape,
}

/// Chrome device emulation: either a named device or explicit metrics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulationInfo {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub device_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub width: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub height: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub device_scale_factor: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mobile: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub screen_orientation: Option<ScreenOrientation>,
}

impl EmulationInfo {
  pub fn device(name: impl Into<String>) -> Self {
    Self {
      device_name: Some(name.into()),
      ..Self::default()
    }
  }

  pub fn metrics(width: u32, height: u32, device_scale_factor: f64) -> Self {
    Self {
      width: Some(width),
      height: Some(height),
      device_scale_factor: Some(device_scale_factor),
      ..Self::default()
    }
  }

  pub fn with_mobile(mut self, mobile: bool) -> Self {
    self.mobile = Some(mobile);
    self
  }

  pub fn with_orientation(mut self, orientation: ScreenOrientation) -> Self {
    self.screen_orientation = Some(orientation);
    self
  }
}

/// Real iOS device rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IosDeviceInfo {
  #[serde(rename = "name")]
  pub device_name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub screen_orientation: Option<ScreenOrientation>,
  #[serde(rename = "version", skip_serializing_if = "Option::is_none")]
  pub ios_version: Option<String>,
}

impl IosDeviceInfo {
  pub fn new(device_name: impl Into<String>) -> Self {
    Self {
      device_name: device_name.into(),
      screen_orientation: None,
      ios_version: None,
    }
  }

  pub fn with_orientation(mut self, orientation: ScreenOrientation) -> Self {
    self.screen_orientation = Some(orientation);
    self
  }

  pub fn with_version(mut self, version: impl Into<String>) -> Self {
    self.ios_version = Some(version.into());
    self
  }
}

/// One browser/viewport combination a step is rendered on.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrowserConfig {
  pub name: Option<String>,
  pub platform: Option<String>,
  pub width: Option<u32>,
  pub height: Option<u32>,
  pub emulation: Option<EmulationInfo>,
  pub ios_device: Option<IosDeviceInfo>,
}

impl BrowserConfig {
  /// Desktop browser with an explicit viewport.
  pub fn desktop(name: impl Into<String>, width: u32, height: u32) -> Self {
    Self {
      name: Some(name.into()),
      width: Some(width),
      height: Some(height),
      ..Self::default()
    }
  }

  pub fn chrome_emulation(emulation: EmulationInfo) -> Self {
    Self {
      name: Some(DEFAULT_BROWSER_NAME.to_string()),
      emulation: Some(emulation),
      ..Self::default()
    }
  }

  pub fn ios_device(device: IosDeviceInfo) -> Self {
    Self {
      ios_device: Some(device),
      ..Self::default()
    }
  }

  pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
    self.platform = Some(platform.into());
    self
  }

  /// Browser name sent to the grid; iOS devices default to Safari.
  pub fn browser_name(&self) -> Option<&str> {
    match (&self.name, &self.ios_device) {
      (Some(name), _) => Some(name.as_str()),
      (None, Some(_)) => Some(IOS_BROWSER_NAME),
      (None, None) => None,
    }
  }

  pub fn platform(&self) -> Option<&str> {
    match (&self.platform, &self.ios_device) {
      (Some(platform), _) => Some(platform.as_str()),
      (None, Some(_)) => Some(IOS_PLATFORM),
      (None, None) => None,
    }
  }

  /// Key of this browser in the grid's user-agent table.
  pub fn user_agent_key(&self) -> String {
    self
      .browser_name()
      .unwrap_or(DEFAULT_BROWSER_NAME)
      .to_ascii_lowercase()
  }

  /// Viewport known up front (desktop size or emulation metrics).
  pub fn viewport_size(&self) -> Option<(u32, u32)> {
    if let (Some(width), Some(height)) = (self.width, self.height) {
      return Some((width, height));
    }
    let emulation = self.emulation.as_ref()?;
    Some((emulation.width?, emulation.height?))
  }

  /// Reject configurations the grid cannot render.
  pub fn validate(&self, index: usize) -> std::result::Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidBrowser {
      index,
      reason: reason.to_string(),
    };
    match (&self.emulation, &self.ios_device) {
      (Some(_), Some(_)) => Err(invalid("chrome emulation and an iOS device cannot be combined")),
      (Some(emulation), None) => match &emulation.device_name {
        Some(name) if name.trim().is_empty() => Err(invalid("emulated device name is empty")),
        Some(_) => Ok(()),
        None => match (emulation.width, emulation.height) {
          (Some(w), Some(h)) if w > 0 && h > 0 => Ok(()),
          _ => Err(invalid(
            "emulation needs a device name or a positive width and height",
          )),
        },
      },
      (None, Some(device)) if device.device_name.trim().is_empty() => {
        Err(invalid("iOS device name is empty"))
      }
      (None, Some(_)) => Ok(()),
      (None, None) => match (self.width, self.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok(()),
        _ => Err(invalid("viewport width and height must be positive")),
      },
    }
  }
}

/// Validate a browser list as a whole.
pub fn validate_browsers(browsers: &[BrowserConfig]) -> std::result::Result<(), ValidationError> {
  if browsers.is_empty() {
    return Err(ValidationError::NoBrowsers);
  }
  browsers
    .iter()
    .enumerate()
    .try_for_each(|(index, browser)| browser.validate(index))
}

/// Capture parameters sent with each request.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderInfo {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub width: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub height: Option<u32>,
  pub size_mode: SizeMode,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub selector: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub region: Option<Region>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub emulation_info: Option<EmulationInfo>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ios_device_info: Option<IosDeviceInfo>,
}

/// One (page, browser) render job.
#[derive(Debug, Clone)]
pub struct RenderRequest {
  pub webhook: Option<String>,
  pub url: String,
  pub dom: RGridDom,
  /// Every resource the bundle references, frames included.
  pub resources: ResourceMap,
  pub render_info: RenderInfo,
  pub browser_name: Option<String>,
  pub platform: Option<String>,
  pub script_hooks: Option<serde_json::Value>,
  pub selectors_to_find_regions_for: Vec<String>,
  pub send_dom: bool,
  /// Assigned by the grid on first submission.
  pub render_id: Option<String>,
  pub options: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct BrowserWire<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  name: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  platform: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequestWire<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  webhook: Option<&'a str>,
  url: &'a str,
  dom: HashObject,
  resources: BTreeMap<&'a str, HashObject>,
  render_info: &'a RenderInfo,
  browser: BrowserWire<'a>,
  #[serde(skip_serializing_if = "Option::is_none")]
  script_hooks: Option<&'a serde_json::Value>,
  selectors_to_find_regions_for: &'a [String],
  send_dom: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  render_id: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  options: Option<&'a serde_json::Value>,
}

impl Serialize for RenderRequest {
  fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    RenderRequestWire {
      webhook: self.webhook.as_deref(),
      url: &self.url,
      dom: self.dom.hash_object(),
      resources: self
        .resources
        .iter()
        .map(|(url, r)| (url.as_str(), r.hash_object()))
        .collect(),
      render_info: &self.render_info,
      browser: BrowserWire {
        name: self.browser_name.as_deref(),
        platform: self.platform.as_deref(),
      },
      script_hooks: self.script_hooks.as_ref(),
      selectors_to_find_regions_for: &self.selectors_to_find_regions_for,
      send_dom: self.send_dom,
      render_id: self.render_id.as_deref(),
      options: self.options.as_ref(),
    }
    .serialize(serializer)
  }
}

/// Shared parameters of a step, applied to every browser.
#[derive(Debug, Clone, Default)]
pub struct RenderRequestBuilder {
  url: Option<String>,
  webhook: Option<String>,
  size_mode: SizeMode,
  selector: Option<String>,
  region: Option<Region>,
  script_hooks: Option<serde_json::Value>,
  selectors_to_find_regions_for: Vec<String>,
  send_dom: bool,
  options: Option<serde_json::Value>,
}

impl RenderRequestBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Page URL; defaults to the URL of the assembled DOM.
  pub fn with_url(mut self, url: impl Into<String>) -> Self {
    self.url = Some(url.into());
    self
  }

  pub fn with_webhook(mut self, webhook: impl Into<String>) -> Self {
    self.webhook = Some(webhook.into());
    self
  }

  pub fn with_size_mode(mut self, size_mode: SizeMode) -> Self {
    self.size_mode = size_mode;
    self
  }

  pub fn with_selector(mut self, selector: Option<String>) -> Self {
    self.selector = selector;
    self
  }

  pub fn with_region(mut self, region: Option<Region>) -> Self {
    self.region = region;
    self
  }

  pub fn with_script_hooks(mut self, hooks: Option<serde_json::Value>) -> Self {
    self.script_hooks = hooks;
    self
  }

  pub fn with_selectors_to_find_regions_for(mut self, selectors: Vec<String>) -> Self {
    self.selectors_to_find_regions_for = selectors;
    self
  }

  pub fn with_send_dom(mut self, send_dom: bool) -> Self {
    self.send_dom = send_dom;
    self
  }

  pub fn with_options(mut self, options: Option<serde_json::Value>) -> Self {
    self.options = options;
    self
  }

  /// One request per browser, index-aligned with `browsers`.
  pub fn build(&self, assembled: &AssembledDom, browsers: &[BrowserConfig]) -> Result<Vec<RenderRequest>> {
    validate_browsers(browsers)?;
    let url = self
      .url
      .clone()
      .unwrap_or_else(|| assembled.dom.url().to_string());

    Ok(
      browsers
        .iter()
        .map(|browser| RenderRequest {
          webhook: self.webhook.clone(),
          url: url.clone(),
          dom: assembled.dom.clone(),
          resources: assembled.all_resources.clone(),
          render_info: RenderInfo {
            width: browser.width,
            height: browser.height,
            size_mode: self.size_mode,
            selector: self.selector.clone(),
            region: self.region,
            emulation_info: browser.emulation.clone(),
            ios_device_info: browser.ios_device.clone(),
          },
          browser_name: browser.browser_name().map(str::to_string),
          platform: browser.platform().map(str::to_string),
          script_hooks: self.script_hooks.clone(),
          selectors_to_find_regions_for: self.selectors_to_find_regions_for.clone(),
          send_dom: self.send_dom,
          render_id: None,
          options: self.options.clone(),
        })
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dom::CdtNode;
  use crate::error::Error;
  use crate::resource::Resource;

  fn assembled() -> AssembledDom {
    let css = Resource::from_content("https://a.test/app.css", Some("text/css".into()), b"a{}".to_vec());
    let mut resources = ResourceMap::new();
    resources.insert(css.url().to_string(), css);
    AssembledDom {
      dom: RGridDom::new(
        "https://a.test/",
        vec![CdtNode::element("HTML", vec![], vec![])],
        resources.clone(),
      ),
      all_resources: resources,
    }
  }

  #[test]
  fn one_request_per_browser() {
    let browsers = vec![
      BrowserConfig::desktop("firefox", 800, 600),
      BrowserConfig::chrome_emulation(EmulationInfo::device("Pixel 4")),
    ];
    let requests = RenderRequestBuilder::new()
      .with_size_mode(SizeMode::FullPage)
      .build(&assembled(), &browsers)
      .unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, "https://a.test/");
    assert_eq!(requests[0].render_info.width, Some(800));
    assert_eq!(requests[0].browser_name.as_deref(), Some("firefox"));
    assert_eq!(
      requests[1].render_info.emulation_info,
      Some(EmulationInfo::device("Pixel 4"))
    );
    assert!(requests.iter().all(|r| r.render_id.is_none()));
  }

  #[test]
  fn ios_devices_default_to_safari_on_ios() {
    let browsers = vec![BrowserConfig::ios_device(IosDeviceInfo::new("iPhone 12"))];
    let requests = RenderRequestBuilder::new()
      .build(&assembled(), &browsers)
      .unwrap();
    assert_eq!(requests[0].browser_name.as_deref(), Some(IOS_BROWSER_NAME));
    assert_eq!(requests[0].platform.as_deref(), Some(IOS_PLATFORM));

    let explicit = BrowserConfig {
      name: Some("webkit".into()),
      ..BrowserConfig::ios_device(IosDeviceInfo::new("iPad"))
    };
    assert_eq!(explicit.browser_name(), Some("webkit"));
    assert_eq!(explicit.platform(), Some(IOS_PLATFORM));
  }

  #[test]
  fn invalid_browsers_are_rejected() {
    let err = RenderRequestBuilder::new()
      .build(&assembled(), &[])
      .unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::NoBrowsers)));

    assert!(BrowserConfig::desktop("chrome", 0, 600).validate(0).is_err());
    assert!(BrowserConfig::chrome_emulation(EmulationInfo::device(" "))
      .validate(1)
      .is_err());
    assert!(BrowserConfig::chrome_emulation(EmulationInfo::default())
      .validate(1)
      .is_err());
    assert!(BrowserConfig::chrome_emulation(EmulationInfo::metrics(375, 667, 2.0))
      .validate(1)
      .is_ok());
    assert_eq!(
      BrowserConfig::ios_device(IosDeviceInfo::new("")).validate(3),
      Err(ValidationError::InvalidBrowser {
        index: 3,
        reason: "iOS device name is empty".to_string()
      })
    );
  }

  #[test]
  fn serializes_hash_objects_instead_of_content() {
    let requests = RenderRequestBuilder::new()
      .with_webhook("https://hooks.test/r1")
      .with_selector(Some("#main".into()))
      .with_size_mode(SizeMode::Selector)
      .with_selectors_to_find_regions_for(vec!["#main".into(), ".ad".into()])
      .build(&assembled(), &[BrowserConfig::desktop("chrome", 1024, 768)])
      .unwrap();
    let value = serde_json::to_value(&requests[0]).unwrap();
    assert_eq!(value["webhook"], "https://hooks.test/r1");
    assert_eq!(value["renderInfo"]["sizeMode"], "selector");
    assert_eq!(value["renderInfo"]["selector"], "#main");
    assert_eq!(value["browser"]["name"], "chrome");
    assert!(value["browser"].get("platform").is_none());
    assert_eq!(value["resources"]["https://a.test/app.css"]["hashFormat"], "sha256");
    assert!(value["dom"]["hash"].is_string());
    assert_eq!(value["selectorsToFindRegionsFor"][1], ".ad");
    assert_eq!(value["sendDom"], false);
    assert!(value.get("renderId").is_none());
  }
}
