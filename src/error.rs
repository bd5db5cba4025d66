//! Error types for gridcheck
//!
//! This module provides error types for every stage of a visual check:
//! - Resource errors (fetching, extraction of dependent URLs)
//! - Render errors (grid protocol violations, failed renders)
//! - Validation errors (step and browser configuration)
//! - Transport errors (grid / diff backend communication)
//!
//! All errors use the `thiserror` crate for minimal boilerplate and
//! proper error trait implementations. Every error is `Clone` so that a
//! single fatal error can be observed by all concurrent steps of a test.

use thiserror::Error;

/// Result type alias for gridcheck operations
///
/// # Examples
///
/// ```
/// use gridcheck::Result;
///
/// fn submit() -> Result<()> {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for gridcheck
///
/// Each variant wraps a more specific error type for that subsystem.
///
/// # Examples
///
/// ```
/// use gridcheck::Error;
/// use gridcheck::error::ValidationError;
///
/// fn check() -> Result<(), Error> {
///     Err(Error::Validation(ValidationError::NoBrowsers))
/// }
/// ```
#[derive(Error, Debug, Clone)]
pub enum Error {
  /// Resource fetching or processing error
  #[error("Resource error: {0}")]
  Resource(#[from] ResourceError),

  /// Render grid protocol or render failure
  #[error("Render error: {0}")]
  Render(#[from] RenderError),

  /// Invalid step or browser configuration
  #[error("Validation error: {0}")]
  Validation(#[from] ValidationError),

  /// Communication failure with the grid or the diff backend
  #[error("Transport error: {0}")]
  Transport(#[from] TransportError),

  /// Generic error for miscellaneous issues
  #[error("{0}")]
  Other(String),
}

/// Errors raised while fetching or processing a page resource.
///
/// Note that HTTP error statuses are *not* errors: they are encoded on the
/// resource itself via its error status code.
#[derive(Error, Debug, Clone)]
pub enum ResourceError {
  /// The URL could not be parsed or is not fetchable
  #[error("Invalid resource URL '{url}': {reason}")]
  InvalidUrl { url: String, reason: String },

  /// The network fetch failed without producing a response
  #[error("Failed to fetch '{url}': {reason}")]
  FetchFailed { url: String, reason: String },

  /// Dependent URLs could not be extracted from the resource content
  #[error("Failed to extract dependencies from '{url}': {reason}")]
  ExtractionFailed { url: String, reason: String },

  /// Resource has no content available for upload
  #[error("Resource '{url}' has no content")]
  MissingContent { url: String },
}

/// Errors that occur while rendering on the grid
///
/// # Examples
///
/// ```
/// use gridcheck::error::RenderError;
///
/// let error = RenderError::Failed {
///     render_id: "abc".to_string(),
///     reason: "selector not found".to_string(),
/// };
/// println!("{}", error);
/// ```
#[derive(Error, Debug, Clone)]
pub enum RenderError {
  /// The grid asked for more resources after they were already uploaded
  #[error("Unexpected error while taking screenshot: {message}")]
  Unrecoverable { message: String },

  /// The grid reported an ERROR status for a render
  #[error("Failed to render screenshot (render id {render_id}): {reason}")]
  Failed { render_id: String, reason: String },

  /// The render did not reach a terminal status in time
  #[error("Failed to render screenshot (render id {render_id}): timed out after {elapsed_ms}ms")]
  Timeout { render_id: String, elapsed_ms: u64 },

  /// The grid returned a response that does not match the request batch
  #[error("Malformed grid response: {message}")]
  MalformedResponse { message: String },
}

/// Errors in caller-supplied configuration, reported before any network activity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
  /// A test needs at least one browser
  #[error("No browsers configured")]
  NoBrowsers,

  /// A browser configuration is unusable
  #[error("Invalid browser configuration at index {index}: {reason}")]
  InvalidBrowser { index: usize, reason: String },

  /// An accessibility region is unusable
  #[error("Invalid accessibility region at index {index}: {reason}")]
  InvalidAccessibilityRegion { index: usize, reason: String },

  /// A target or region-selector setting is unusable
  #[error("Invalid check settings: {reason}")]
  InvalidCheckSettings { reason: String },
}

/// Errors that occur while talking to a remote service.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
  /// Request could not be sent or the response could not be read
  #[error("Request to '{endpoint}' failed: {reason}")]
  RequestFailed { endpoint: String, reason: String },

  /// The service answered with a non-success status
  #[error("Request to '{endpoint}' returned status {status}")]
  Status { endpoint: String, status: u16 },

  /// The response body could not be decoded
  #[error("Invalid response from '{endpoint}': {reason}")]
  Decode { endpoint: String, reason: String },

  /// The diff backend rejected an operation
  #[error("Diff session error: {message}")]
  Session { message: String },
}

/// Outcome of waiting for one render that did not produce a screenshot.
///
/// Cancellation is kept apart from failures: a cancelled wait is never
/// reported to the diff backend.
#[derive(Error, Debug, Clone)]
pub enum PollError {
  /// The test was stopped while waiting
  #[error("Render wait for {render_id} was cancelled")]
  Cancelled { render_id: String },

  /// No terminal status arrived in time
  #[error("Render {render_id} did not finish within {elapsed_ms}ms")]
  Timeout { render_id: String, elapsed_ms: u64 },

  /// The grid reported an ERROR status
  #[error("Render {render_id} failed: {reason}")]
  RenderFailed { render_id: String, reason: String },

  /// The status request itself failed
  #[error("Render status transport failed: {0}")]
  Transport(Error),
}

impl PollError {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, PollError::Cancelled { .. })
  }
}

impl From<PollError> for Error {
  fn from(err: PollError) -> Self {
    match err {
      PollError::Transport(inner) => inner,
      PollError::Timeout {
        render_id,
        elapsed_ms,
      } => Error::Render(RenderError::Timeout {
        render_id,
        elapsed_ms,
      }),
      PollError::RenderFailed { render_id, reason } => {
        Error::Render(RenderError::Failed { render_id, reason })
      }
      PollError::Cancelled { render_id } => Error::Other(format!("render {render_id} cancelled")),
    }
  }
}

impl Error {
  /// Returns true for errors that stop every browser of a test.
  pub fn is_unrecoverable(&self) -> bool {
    matches!(self, Error::Render(RenderError::Unrecoverable { .. }))
  }
}
