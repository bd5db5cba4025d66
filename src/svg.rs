//! Dependency discovery for SVG documents.
//!
//! An SVG can pull in other resources through `href`/`xlink:href` attributes
//! (`<image>`, `<use>`, `<feImage>`), through `url(...)` presentation
//! attributes, and through CSS in `style` attributes or `<style>` elements.

use crate::css::loader::extract_css_urls;
use crate::error::{ResourceError, Result};
use roxmltree::{Document, ParsingOptions};
use std::borrow::Cow;
use std::collections::HashSet;

/// Collect the raw (unresolved) URLs referenced by an SVG document.
///
/// Fragment-only references are kept in the output; they are dropped when
/// resolved against the document URL.
pub fn extract_svg_urls(svg: &[u8]) -> Result<Vec<String>> {
  let text = match std::str::from_utf8(svg) {
    Ok(text) => Cow::Borrowed(text),
    Err(_) => String::from_utf8_lossy(svg),
  };

  let mut options = ParsingOptions::default();
  options.allow_dtd = true;
  let doc = Document::parse_with_options(&text, options).map_err(|e| {
    ResourceError::ExtractionFailed {
      url: String::new(),
      reason: e.to_string(),
    }
  })?;

  let mut out = Vec::new();
  for node in doc.descendants() {
    if node.is_element() {
      for attr in node.attributes() {
        let value = attr.value();
        if attr.name() == "href" {
          let trimmed = value.trim();
          if !trimmed.is_empty() {
            out.push(trimmed.to_string());
          }
        } else if attr.name() == "style" || value.contains("url(") {
          out.extend(extract_css_urls(value));
        }
      }
      if node.tag_name().name() == "style" {
        let css: String = node
          .children()
          .filter_map(|child| child.text())
          .collect();
        out.extend(extract_css_urls(&css));
      }
    }
  }

  let mut seen = HashSet::new();
  out.retain(|url| seen.insert(url.clone()));
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn collects_image_and_use_hrefs() {
    let svg = br##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">
      <image href="photo.jpg" width="10" height="10"/>
      <use xlink:href="sprites.svg#icon"/>
      <use href="#local"/>
    </svg>"##;
    assert_eq!(
      extract_svg_urls(svg).unwrap(),
      vec!["photo.jpg", "sprites.svg#icon", "#local"]
    );
  }

  #[test]
  fn collects_css_references_from_style() {
    let svg = br#"<svg xmlns="http://www.w3.org/2000/svg">
      <style>@font-face { font-family: F; src: url(font.woff); } .a { fill: url(pattern.svg#p); }</style>
      <rect style="filter: url(filters.svg#blur)" width="1" height="1"/>
      <circle fill="url(#grad)" r="1"/>
    </svg>"#;
    assert_eq!(
      extract_svg_urls(svg).unwrap(),
      vec!["font.woff", "pattern.svg#p", "filters.svg#blur", "#grad"]
    );
  }

  #[test]
  fn tolerates_doctype() {
    let svg = br#"<?xml version="1.0"?>
      <!DOCTYPE svg PUBLIC "-//W3C//DTD SVG 1.1//EN" "http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd">
      <svg xmlns="http://www.w3.org/2000/svg"><image href="a.png"/></svg>"#;
    assert_eq!(extract_svg_urls(svg).unwrap(), vec!["a.png"]);
  }

  #[test]
  fn malformed_svg_is_an_error() {
    assert!(extract_svg_urls(b"<svg><image href='a.png'>").is_err());
  }
}
