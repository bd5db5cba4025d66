//! Render grid transport
//!
//! [`RenderGrid`] is the seam between the render pipeline and the remote
//! rendering service. [`HttpRenderGrid`] implements it over HTTP+JSON.

use super::request::{Region, RenderRequest};
use crate::error::{Error, ResourceError, Result, TransportError};
use crate::resource::{Resource, HASH_FORMAT};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use ureq::http::Method;

/// Header carrying the grid access token.
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// Status of a render as reported by the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderStatus {
  NeedMoreResources,
  Rendering,
  Rendered,
  Error,
  /// Queued, or any status this client does not know.
  #[default]
  #[serde(other)]
  Pending,
}

impl RenderStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, RenderStatus::Rendered | RenderStatus::Error)
  }
}

/// Grid answer to one submitted render request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningRender {
  #[serde(default)]
  pub render_id: Option<String>,
  #[serde(default)]
  pub render_status: Option<RenderStatus>,
  /// URLs the grid does not hold yet. `None` means "not specified".
  #[serde(default)]
  pub need_more_resources: Option<Vec<String>>,
  #[serde(default)]
  pub need_more_dom: bool,
}

impl RunningRender {
  pub fn status(&self) -> RenderStatus {
    self.render_status.unwrap_or_default()
  }

  pub fn needs_more_resources(&self) -> bool {
    self.status() == RenderStatus::NeedMoreResources
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSize {
  pub width: u32,
  pub height: u32,
}

/// Status poll result for one render.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStatusResult {
  #[serde(default)]
  pub render_id: Option<String>,
  #[serde(default)]
  pub status: Option<RenderStatus>,
  #[serde(default)]
  pub error: Option<String>,
  #[serde(default)]
  pub image_location: Option<String>,
  #[serde(default)]
  pub dom_location: Option<String>,
  #[serde(default)]
  pub user_agent: Option<String>,
  #[serde(default)]
  pub device_size: Option<DeviceSize>,
  /// One list of regions per entry of the request's `selectorsToFindRegionsFor`.
  #[serde(default)]
  pub selector_regions: Option<Vec<Vec<Region>>>,
}

impl RenderStatusResult {
  pub fn status(&self) -> RenderStatus {
    self.status.unwrap_or_default()
  }
}

/// Remote rendering service.
#[async_trait]
pub trait RenderGrid: Send + Sync {
  /// Submit a batch; the answer is index-aligned with `requests`.
  async fn render(&self, requests: &[RenderRequest]) -> Result<Vec<RunningRender>>;

  /// Current status of each render id, index-aligned.
  async fn render_status(&self, render_ids: &[String]) -> Result<Vec<RenderStatusResult>>;

  /// Upload one resource's content for a render.
  async fn put_resource(&self, render_id: &str, resource: &Resource) -> Result<()>;

  /// Browser name to user-agent string table.
  async fn user_agents(&self) -> Result<HashMap<String, String>>;
}

#[async_trait]
impl<T: RenderGrid + ?Sized> RenderGrid for Arc<T> {
  async fn render(&self, requests: &[RenderRequest]) -> Result<Vec<RunningRender>> {
    (**self).render(requests).await
  }

  async fn render_status(&self, render_ids: &[String]) -> Result<Vec<RenderStatusResult>> {
    (**self).render_status(render_ids).await
  }

  async fn put_resource(&self, render_id: &str, resource: &Resource) -> Result<()> {
    (**self).put_resource(render_id, resource).await
  }

  async fn user_agents(&self) -> Result<HashMap<String, String>> {
    (**self).user_agents().await
  }
}

/// [`RenderGrid`] over the grid's HTTP API.
///
/// Requests run on tokio's blocking pool since the underlying client is synchronous.
#[derive(Debug, Clone)]
pub struct HttpRenderGrid {
  base_url: String,
  access_token: String,
  timeout: Duration,
}

impl HttpRenderGrid {
  pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      access_token: access_token.into(),
      timeout: Duration::from_secs(60),
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  fn endpoint_url(&self, endpoint: &str) -> String {
    format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint)
  }

  fn send_blocking(
    &self,
    method: Method,
    endpoint: &str,
    content_type: Option<&str>,
    body: Vec<u8>,
  ) -> Result<Vec<u8>> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
      .timeout_global(Some(self.timeout))
      .http_status_as_error(false)
      .build()
      .into();

    let mut builder = ureq::http::Request::builder()
      .method(method)
      .uri(self.endpoint_url(endpoint))
      .header(AUTH_HEADER, &self.access_token);
    if let Some(content_type) = content_type {
      builder = builder.header("Content-Type", content_type);
    }
    let request = builder
      .body(body)
      .map_err(|e| request_failed(endpoint, e))?;

    let mut response = agent.run(request).map_err(|e| request_failed(endpoint, e))?;
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
      return Err(Error::Transport(TransportError::Status {
        endpoint: endpoint.to_string(),
        status,
      }));
    }
    response
      .body_mut()
      .read_to_vec()
      .map_err(|e| request_failed(endpoint, e))
  }

  async fn send(
    &self,
    method: Method,
    endpoint: String,
    content_type: Option<String>,
    body: Vec<u8>,
  ) -> Result<Vec<u8>> {
    let this = self.clone();
    let target = endpoint.clone();
    tokio::task::spawn_blocking(move || {
      this.send_blocking(method, &target, content_type.as_deref(), body)
    })
    .await
    .map_err(|e| request_failed(&endpoint, e))?
  }

  async fn send_json<T: Serialize + ?Sized + Sync, R: DeserializeOwned>(
    &self,
    method: Method,
    endpoint: &str,
    payload: &T,
  ) -> Result<R> {
    let body = serde_json::to_vec(payload).map_err(|e| decode_failed(endpoint, e))?;
    let bytes = self
      .send(
        method,
        endpoint.to_string(),
        Some("application/json".to_string()),
        body,
      )
      .await?;
    serde_json::from_slice(&bytes).map_err(|e| decode_failed(endpoint, e))
  }
}

#[async_trait]
impl RenderGrid for HttpRenderGrid {
  async fn render(&self, requests: &[RenderRequest]) -> Result<Vec<RunningRender>> {
    debug!(count = requests.len(), "submitting render batch");
    self.send_json(Method::POST, "render", requests).await
  }

  async fn render_status(&self, render_ids: &[String]) -> Result<Vec<RenderStatusResult>> {
    self.send_json(Method::POST, "render-status", render_ids).await
  }

  async fn put_resource(&self, render_id: &str, resource: &Resource) -> Result<()> {
    let (Some(hash), Some(content)) = (resource.hash(), resource.content()) else {
      return Err(Error::Resource(ResourceError::MissingContent {
        url: resource.url().to_string(),
      }));
    };
    let endpoint = format!("resources/{HASH_FORMAT}/{hash}?render-id={render_id}");
    debug!(url = resource.url(), render_id, "uploading resource");
    self
      .send(
        Method::PUT,
        endpoint,
        Some(
          resource
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string(),
        ),
        content.to_vec(),
      )
      .await
      .map(|_| ())
  }

  async fn user_agents(&self) -> Result<HashMap<String, String>> {
    let bytes = self
      .send(Method::GET, "user-agents".to_string(), None, Vec::new())
      .await?;
    serde_json::from_slice(&bytes).map_err(|e| decode_failed("user-agents", e))
  }
}

fn request_failed(endpoint: &str, err: impl std::fmt::Display) -> Error {
  Error::Transport(TransportError::RequestFailed {
    endpoint: endpoint.to_string(),
    reason: err.to_string(),
  })
}

fn decode_failed(endpoint: &str, err: impl std::fmt::Display) -> Error {
  Error::Transport(TransportError::Decode {
    endpoint: endpoint.to_string(),
    reason: err.to_string(),
  })
}
