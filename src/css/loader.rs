//! Helpers for discovering the URLs a stylesheet depends on.
//!
//! These utilities resolve stylesheet references against a base URL and walk
//! cssparser tokens to collect every `url(...)` reference and `@import` target,
//! including references nested inside other functions and blocks.

use cssparser::{Parser, ParserInput, Token};
use std::borrow::Cow;
use std::collections::HashSet;
use url::Url;

/// Resolve a possibly-relative `href` against a base URL.
///
/// Supports protocol-relative URLs (`//example.com`), `data:` URLs (returned
/// as-is) and absolute URLs. Fragment-only references and script/mail schemes
/// resolve to `None`.
pub fn resolve_href(base: &str, href: &str) -> Option<String> {
  let href = href.trim();
  if href.is_empty() {
    return None;
  }

  // CSS authors sometimes escape path characters with backslashes. The WHATWG URL parser
  // treats `\` as a path separator for special schemes; keep a stable percent-encoded form.
  let href = if href.contains('\\') {
    Cow::Owned(href.replace('\\', "%5C"))
  } else {
    Cow::Borrowed(href)
  };

  // Fragment-only hrefs (e.g. SVG `#gradient`) point back into the same document.
  if href.starts_with('#') {
    return None;
  }

  if href.starts_with("data:") {
    return Some(href.to_string());
  }

  let href_lower = href.to_ascii_lowercase();
  if href_lower.starts_with("javascript:")
    || href_lower.starts_with("vbscript:")
    || href_lower.starts_with("mailto:")
  {
    return None;
  }

  if let Ok(abs) = Url::parse(href.as_ref()) {
    return Some(abs.to_string());
  }

  Url::parse(base)
    .ok()?
    .join(href.as_ref())
    .ok()
    .map(|u| u.to_string())
}

/// Resolve every href against `base`, dropping the ones that do not resolve.
///
/// Fragments are stripped so `sprites.svg#a` and `sprites.svg#b` name one resource.
pub fn absolutize_urls(base: &str, hrefs: &[String]) -> Vec<String> {
  let mut seen = HashSet::new();
  hrefs
    .iter()
    .filter_map(|href| resolve_href(base, href))
    .map(strip_fragment)
    .filter(|url| seen.insert(url.clone()))
    .collect()
}

fn strip_fragment(url: String) -> String {
  if url.starts_with("data:") {
    return url;
  }
  match Url::parse(&url) {
    Ok(mut parsed) if parsed.fragment().is_some() => {
      parsed.set_fragment(None);
      parsed.to_string()
    }
    _ => url,
  }
}

/// Collect the raw (unresolved) URLs referenced by a stylesheet.
///
/// Returns `url(...)` arguments (quoted or not) and `@import` string targets in
/// source order, without duplicates. Empty references are skipped.
pub fn extract_css_urls(css: &str) -> Vec<String> {
  let mut input = ParserInput::new(css);
  let mut parser = Parser::new(&mut input);
  let mut out = Vec::new();
  collect_css_urls(&mut parser, &mut out);

  let mut seen = HashSet::new();
  out.retain(|url| seen.insert(url.clone()));
  out
}

fn push_reference(out: &mut Vec<String>, raw: &str) {
  let trimmed = raw.trim();
  if !trimmed.is_empty() {
    out.push(trimmed.to_string());
  }
}

fn collect_css_urls<'i, 't>(parser: &mut Parser<'i, 't>, out: &mut Vec<String>) {
  let mut in_import_prelude = false;
  loop {
    let token = match parser.next_including_whitespace_and_comments() {
      Ok(t) => t.clone(),
      Err(_) => break,
    };

    match token {
      Token::WhiteSpace(_) | Token::Comment(_) => {}
      Token::AtKeyword(ref name) => {
        in_import_prelude = name.eq_ignore_ascii_case("import");
      }
      Token::QuotedString(ref value) if in_import_prelude => {
        push_reference(out, value.as_ref());
        in_import_prelude = false;
      }
      Token::UnquotedUrl(ref value) => {
        push_reference(out, value.as_ref());
        in_import_prelude = false;
      }
      Token::Function(ref name) if name.eq_ignore_ascii_case("url") => {
        let _ = parser.parse_nested_block(|nested| {
          while let Ok(inner) = nested.next() {
            if let Token::QuotedString(value) | Token::UnquotedUrl(value) = inner {
              push_reference(out, value.as_ref());
            }
          }
          Ok::<_, cssparser::ParseError<'i, ()>>(())
        });
        in_import_prelude = false;
      }
      Token::Function(_)
      | Token::ParenthesisBlock
      | Token::SquareBracketBlock
      | Token::CurlyBracketBlock => {
        let _ = parser.parse_nested_block(|nested| {
          collect_css_urls(nested, out);
          Ok::<_, cssparser::ParseError<'i, ()>>(())
        });
        in_import_prelude = false;
      }
      _ => {
        in_import_prelude = false;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolves_relative_http_links() {
    let base = "https://example.com/a/b/page.html";
    let href = "../styles/site.css";
    let resolved = resolve_href(base, href).expect("resolved");
    assert_eq!(resolved, "https://example.com/a/styles/site.css");
  }

  #[test]
  fn resolves_protocol_relative_links() {
    let base = "https://example.com/index.html";
    let href = "//cdn.example.com/main.css";
    let resolved = resolve_href(base, href).expect("resolved");
    assert_eq!(resolved, "https://cdn.example.com/main.css");
  }

  #[test]
  fn ignores_fragments_and_script_urls() {
    let base = "https://example.com/index.html";
    assert_eq!(resolve_href(base, "#clip"), None);
    assert_eq!(resolve_href(base, "javascript:void(0)"), None);
    assert_eq!(resolve_href(base, "   "), None);
    assert_eq!(
      resolve_href(base, "data:image/png;base64,AAAA").as_deref(),
      Some("data:image/png;base64,AAAA")
    );
  }

  #[test]
  fn extracts_quoted_and_unquoted_urls() {
    let css = r#"
      body { background: url("images/bg.png") no-repeat; }
      .icon { background-image: url(icons/a.svg); }
      .x { mask: url('mask.png'); }
    "#;
    assert_eq!(
      extract_css_urls(css),
      vec!["images/bg.png", "icons/a.svg", "mask.png"]
    );
  }

  #[test]
  fn extracts_imports_and_font_faces() {
    let css = r#"
      @import "reset.css";
      @import url(theme.css) screen;
      @font-face { font-family: X; src: url(fonts/x.woff2) format("woff2"), url(fonts/x.woff) format("woff"); }
    "#;
    assert_eq!(
      extract_css_urls(css),
      vec!["reset.css", "theme.css", "fonts/x.woff2", "fonts/x.woff"]
    );
  }

  #[test]
  fn ignores_plain_strings_and_empty_urls() {
    let css = r#"
      .a::before { content: "not-a-url.png"; }
      .b { background: url(""); }
      .c { background: #fff url() repeat; }
    "#;
    assert!(extract_css_urls(css).is_empty());
  }

  #[test]
  fn finds_urls_nested_in_functions_and_media_blocks() {
    let css = r#"
      @media (min-width: 10px) {
        .a { background-image: image-set(url(a-1x.png) 1x, url(a-2x.png) 2x); }
      }
      @supports (display: grid) { .b { cursor: url(cursor.cur), auto; } }
    "#;
    assert_eq!(
      extract_css_urls(css),
      vec!["a-1x.png", "a-2x.png", "cursor.cur"]
    );
  }

  #[test]
  fn deduplicates_references() {
    let css = ".a{background:url(x.png)} .b{background:url('x.png')}";
    assert_eq!(extract_css_urls(css), vec!["x.png"]);
  }

  #[test]
  fn absolutize_resolves_against_stylesheet_url() {
    let urls = absolutize_urls(
      "https://example.com/styles/main.css",
      &["images/bg.png".to_string(), "#frag".to_string(), "/root.png".to_string()],
    );
    assert_eq!(
      urls,
      vec![
        "https://example.com/styles/images/bg.png",
        "https://example.com/root.png"
      ]
    );
  }

  #[test]
  fn absolutize_drops_fragments() {
    let urls = absolutize_urls(
      "https://example.com/img/page.svg",
      &[
        "sprites.svg#icon".to_string(),
        "sprites.svg".to_string(),
        "filters.svg#blur".to_string(),
        "data:image/svg+xml,<svg><use href='#a'/></svg>".to_string(),
      ],
    );
    assert_eq!(
      urls,
      vec![
        "https://example.com/img/sprites.svg",
        "https://example.com/img/filters.svg",
        "data:image/svg+xml,<svg><use href='#a'/></svg>",
      ]
    );
  }
}
