//! Resource model and network fetching abstraction
//!
//! A [`Resource`] is one fetched page dependency (stylesheet, image, font, nested
//! frame document) identified by its URL. It either carries content (and the
//! SHA-256 hash of that content) or an HTTP error status code, never both.
//!
//! Network access goes through the [`NetworkFetcher`] trait so that the rest of
//! the crate stays agnostic about how bytes are retrieved, enabling:
//!
//! - Mocking for tests
//! - Alternative HTTP stacks
//! - Offline replays
//!
//! # Example
//!
//! ```rust,ignore
//! use gridcheck::resource::{FetchOptions, HttpFetcher, NetworkFetcher};
//!
//! let fetcher = HttpFetcher::new();
//! let response = fetcher.fetch("https://example.com/app.css", &FetchOptions::default()).await?;
//! println!("Got {} bytes", response.body.len());
//! ```

pub mod cache;
pub mod fetch;
pub mod graph;

pub use cache::ResourceCache;
pub use fetch::ResourceFetcher;

use crate::error::{Error, ResourceError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default User-Agent string used by HTTP fetchers
pub const DEFAULT_USER_AGENT: &str =
  "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 gridcheck/0.1";

/// Default Accept-Language header value
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Hash format reported to the grid for every contentful resource.
pub const HASH_FORMAT: &str = "sha256";

/// Status code substituted for resources whose fetch failed without a response.
pub const GATEWAY_TIMEOUT: u16 = 504;

// ============================================================================
// Core types
// ============================================================================

/// How a resource's content must be processed to discover further URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingKind {
  Css,
  Svg,
}

impl ProcessingKind {
  /// Classify a content type; `None` means the resource has no dependencies.
  pub fn from_content_type(content_type: Option<&str>) -> Option<Self> {
    let ct = content_type?.to_ascii_lowercase();
    if ct.contains("text/css") {
      Some(Self::Css)
    } else if ct.contains("image/svg") {
      Some(Self::Svg)
    } else {
      None
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ResourceBody {
  /// Content is `None` when only the hash is known (e.g. restored from cache).
  Content {
    hash: String,
    bytes: Option<Arc<Vec<u8>>>,
  },
  Error {
    status: u16,
  },
}

/// One resolved page dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
  url: String,
  content_type: Option<String>,
  body: ResourceBody,
}

impl Resource {
  /// Create a contentful resource, hashing its bytes.
  pub fn from_content(url: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
    let hash = sha256_hex(&bytes);
    Self {
      url: url.into(),
      content_type,
      body: ResourceBody::Content {
        hash,
        bytes: Some(Arc::new(bytes)),
      },
    }
  }

  /// Create a resource whose content is known only by hash.
  pub fn from_hash(url: impl Into<String>, content_type: Option<String>, hash: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      content_type,
      body: ResourceBody::Content {
        hash: hash.into(),
        bytes: None,
      },
    }
  }

  /// Create an error-coded resource.
  pub fn error(url: impl Into<String>, status: u16) -> Self {
    Self {
      url: url.into(),
      content_type: None,
      body: ResourceBody::Error { status },
    }
  }

  /// Reassemble a resource from cached parts without re-hashing.
  pub(crate) fn from_parts(
    url: impl Into<String>,
    content_type: Option<String>,
    hash: impl Into<String>,
    bytes: Option<Arc<Vec<u8>>>,
  ) -> Self {
    Self {
      url: url.into(),
      content_type,
      body: ResourceBody::Content {
        hash: hash.into(),
        bytes,
      },
    }
  }

  /// Content handle shared with caches.
  pub(crate) fn shared_content(&self) -> Option<Arc<Vec<u8>>> {
    match &self.body {
      ResourceBody::Content { bytes, .. } => bytes.clone(),
      ResourceBody::Error { .. } => None,
    }
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn content_type(&self) -> Option<&str> {
    self.content_type.as_deref()
  }

  /// Raw content, when held in memory.
  pub fn content(&self) -> Option<&[u8]> {
    match &self.body {
      ResourceBody::Content {
        bytes: Some(bytes), ..
      } => Some(bytes.as_slice()),
      _ => None,
    }
  }

  /// True when the resource holds non-empty content.
  pub fn has_content(&self) -> bool {
    self.content().is_some_and(|c| !c.is_empty())
  }

  /// Lower-hex SHA-256 of the content; `None` for error-coded resources.
  pub fn hash(&self) -> Option<&str> {
    match &self.body {
      ResourceBody::Content { hash, .. } => Some(hash),
      ResourceBody::Error { .. } => None,
    }
  }

  pub fn error_status_code(&self) -> Option<u16> {
    match self.body {
      ResourceBody::Error { status } => Some(status),
      ResourceBody::Content { .. } => None,
    }
  }

  /// Category used to decide whether dependent URLs must be extracted.
  pub fn processing_kind(&self) -> Option<ProcessingKind> {
    if self.error_status_code().is_some() {
      return None;
    }
    ProcessingKind::from_content_type(self.content_type())
  }

  /// True for resources that must be re-parsed (CSS/SVG) and so keep their content cached.
  pub fn requires_processing(&self) -> bool {
    self.processing_kind().is_some()
  }

  /// Copy of this resource with its content dropped (hash retained).
  pub fn without_content(&self) -> Self {
    let body = match &self.body {
      ResourceBody::Content { hash, .. } => ResourceBody::Content {
        hash: hash.clone(),
        bytes: None,
      },
      other => other.clone(),
    };
    Self {
      url: self.url.clone(),
      content_type: self.content_type.clone(),
      body,
    }
  }

  /// Descriptor sent to the grid in place of the content.
  pub fn hash_object(&self) -> HashObject {
    match &self.body {
      ResourceBody::Content { hash, .. } => HashObject::Hash {
        hash_format: HASH_FORMAT.to_string(),
        hash: hash.clone(),
        content_type: self.content_type.clone(),
      },
      ResourceBody::Error { status } => HashObject::Error {
        error_status_code: *status,
      },
    }
  }
}

/// Wire descriptor of a resource: its content hash or its error status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HashObject {
  Hash {
    #[serde(rename = "hashFormat")]
    hash_format: String,
    hash: String,
    #[serde(rename = "contentType", skip_serializing_if = "Option::is_none", default)]
    content_type: Option<String>,
  },
  Error {
    #[serde(rename = "errorStatusCode")]
    error_status_code: u16,
  },
}

/// Resource content captured client-side and handed to the resolver as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResource {
  pub content_type: Option<String>,
  pub value: Vec<u8>,
}

impl RawResource {
  pub fn new(content_type: Option<String>, value: Vec<u8>) -> Self {
    Self {
      content_type,
      value,
    }
  }

  pub fn into_resource(self, url: impl Into<String>) -> Resource {
    Resource::from_content(url, self.content_type, self.value)
  }
}

/// Lower-hex SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
  format!("{:x}", Sha256::digest(bytes))
}

/// True for URLs the fetcher is allowed to request.
pub fn is_fetchable_url(url: &str) -> bool {
  url::Url::parse(url)
    .map(|u| matches!(u.scheme(), "http" | "https"))
    .unwrap_or(false)
}

// ============================================================================
// NetworkFetcher trait
// ============================================================================

/// Per-request fetch options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
  /// User-Agent header override
  pub user_agent: Option<String>,
}

impl FetchOptions {
  pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
    self.user_agent = Some(user_agent.into());
    self
  }
}

/// Raw response of a network fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Trait for issuing one network request for a resource URL.
///
/// A non-success status is *not* an error: implementations return it in
/// [`HttpResponse::status`]. Errors are reserved for requests that produced no
/// response at all (DNS failure, connection reset, timeout).
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow sharing across tasks.
#[async_trait]
pub trait NetworkFetcher: Send + Sync {
  /// Fetch the given http(s) URL.
  async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<HttpResponse>;
}

// Allow Arc<dyn NetworkFetcher> to be used as NetworkFetcher
#[async_trait]
impl<T: NetworkFetcher + ?Sized> NetworkFetcher for Arc<T> {
  async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<HttpResponse> {
    (**self).fetch(url, options).await
  }
}

// ============================================================================
// HttpFetcher - Default implementation
// ============================================================================

/// Default HTTP resource fetcher
///
/// Fetches resources over HTTP/HTTPS with configurable timeouts and user agent.
/// Requests run on tokio's blocking pool since the underlying client is synchronous.
///
/// # Example
///
/// ```rust,ignore
/// use gridcheck::resource::HttpFetcher;
/// use std::time::Duration;
///
/// let fetcher = HttpFetcher::new()
///     .with_timeout(Duration::from_secs(60))
///     .with_user_agent("MyApp/1.0");
/// ```
#[derive(Debug, Clone)]
pub struct HttpFetcher {
  timeout: Duration,
  user_agent: String,
  accept_language: String,
  max_size: usize,
}

impl HttpFetcher {
  /// Create a new HttpFetcher with default settings
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the request timeout
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Set the default User-Agent header
  pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
    self.user_agent = user_agent.into();
    self
  }

  /// Set the Accept-Language header
  pub fn with_accept_language(mut self, accept_language: impl Into<String>) -> Self {
    self.accept_language = accept_language.into();
    self
  }

  /// Set the maximum response size in bytes
  pub fn with_max_size(mut self, max_size: usize) -> Self {
    self.max_size = max_size;
    self
  }

  fn fetch_blocking(&self, url: &str, user_agent: &str) -> Result<HttpResponse> {
    let config = ureq::Agent::config_builder()
      .timeout_global(Some(self.timeout))
      .http_status_as_error(false)
      .build();
    let agent: ureq::Agent = config.into();

    let mut response = agent
      .get(url)
      .header("User-Agent", user_agent)
      .header("Accept-Language", &self.accept_language)
      .call()
      .map_err(|e| fetch_failed(url, e))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get("content-type")
      .and_then(|h| h.to_str().ok())
      .map(|s| s.to_string())
      .or_else(|| guess_content_type_from_path(url));

    let body = response
      .body_mut()
      .with_config()
      .limit(self.max_size as u64)
      .read_to_vec()
      .map_err(|e| fetch_failed(url, e))?;

    Ok(HttpResponse {
      status,
      content_type,
      body,
    })
  }
}

impl Default for HttpFetcher {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      user_agent: DEFAULT_USER_AGENT.to_string(),
      accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
      max_size: 50 * 1024 * 1024, // 50MB default limit
    }
  }
}

#[async_trait]
impl NetworkFetcher for HttpFetcher {
  async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<HttpResponse> {
    if !is_fetchable_url(url) {
      return Err(Error::Resource(ResourceError::InvalidUrl {
        url: url.to_string(),
        reason: "only http and https URLs are fetched".to_string(),
      }));
    }
    let this = self.clone();
    let target = url.to_string();
    let user_agent = options
      .user_agent
      .clone()
      .unwrap_or_else(|| self.user_agent.clone());
    tokio::task::spawn_blocking(move || this.fetch_blocking(&target, &user_agent))
      .await
      .map_err(|e| fetch_failed(url, e))?
  }
}

fn fetch_failed(url: &str, err: impl std::fmt::Display) -> Error {
  Error::Resource(ResourceError::FetchFailed {
    url: url.to_string(),
    reason: err.to_string(),
  })
}

// ============================================================================
// Helper functions
// ============================================================================

/// Guess content-type from the URL path extension
pub(crate) fn guess_content_type_from_path(path: &str) -> Option<String> {
  let path = path.split(['?', '#']).next().unwrap_or(path);
  let ext = Path::new(path)
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_lowercase())?;

  let mime = match ext.as_str() {
    "png" => "image/png",
    "jpg" | "jpeg" => "image/jpeg",
    "gif" => "image/gif",
    "webp" => "image/webp",
    "svg" => "image/svg+xml",
    "ico" => "image/x-icon",
    "bmp" => "image/bmp",
    "css" => "text/css",
    "html" | "htm" => "text/html",
    "js" => "application/javascript",
    "json" => "application/json",
    "woff" => "font/woff",
    "woff2" => "font/woff2",
    "ttf" => "font/ttf",
    "otf" => "font/otf",
    _ => return None,
  };

  Some(mime.to_string())
}

// ============================================================================
// Tests
// ============================================================================
