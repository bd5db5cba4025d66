#![allow(dead_code)]

use async_trait::async_trait;
use gridcheck::error::{ResourceError, TransportError};
use gridcheck::render::grid::{DeviceSize, RenderGrid, RenderStatus, RenderStatusResult, RunningRender};
use gridcheck::render::RenderRequest;
use gridcheck::resource::{FetchOptions, HttpResponse, NetworkFetcher};
use gridcheck::session::{CheckArgs, DiffSession, MatchResult, TestResults};
use gridcheck::{Error, PageSnapshot, Resource, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Serves canned responses by URL and counts network calls per URL.
#[derive(Clone, Default)]
pub struct MapFetcher {
  map: HashMap<String, HttpResponse>,
  counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl MapFetcher {
  pub fn with(mut self, url: &str, status: u16, content_type: &str, body: &[u8]) -> Self {
    self.map.insert(
      url.to_string(),
      HttpResponse {
        status,
        content_type: Some(content_type.to_string()),
        body: body.to_vec(),
      },
    );
    self
  }

  pub fn with_css(self, url: &str, css: &str) -> Self {
    self.with(url, 200, "text/css", css.as_bytes())
  }

  pub fn with_image(self, url: &str) -> Self {
    self.with(url, 200, "image/png", url.as_bytes())
  }

  pub fn with_status(self, url: &str, status: u16) -> Self {
    self.with(url, status, "text/html", b"")
  }

  pub fn count(&self, url: &str) -> usize {
    self.counts.lock().unwrap().get(url).copied().unwrap_or(0)
  }

  pub fn total(&self) -> usize {
    self.counts.lock().unwrap().values().sum()
  }
}

#[async_trait]
impl NetworkFetcher for MapFetcher {
  async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<HttpResponse> {
    *self.counts.lock().unwrap().entry(url.to_string()).or_default() += 1;
    tokio::task::yield_now().await;
    self.map.get(url).cloned().ok_or_else(|| {
      Error::Resource(ResourceError::FetchFailed {
        url: url.to_string(),
        reason: "connection refused".to_string(),
      })
    })
  }
}

/// Scripted render grid.
///
/// Each `render` call consumes one entry of `rounds` (statuses per request
/// index; missing entries mean RENDERING). A render becomes RENDERED after
/// the number of status polls configured for its page URL (default 1).
#[derive(Default)]
pub struct MockGrid {
  pub rounds: Mutex<VecDeque<Vec<RenderStatus>>>,
  pub batch_sizes: Mutex<Vec<usize>>,
  pub puts: Mutex<Vec<(String, String)>>,
  pub polls_needed: Mutex<HashMap<String, usize>>,
  pub rendered_order: Mutex<Vec<String>>,
  pub user_agent_calls: AtomicUsize,
  pub fail_render: Mutex<bool>,
  pub fail_status: Mutex<bool>,
  pub failing_browsers: Mutex<HashSet<String>>,
  renders: Mutex<HashMap<String, (String, Option<String>)>>,
  polls: Mutex<HashMap<String, usize>>,
  next_id: AtomicUsize,
}

impl MockGrid {
  pub fn with_rounds(rounds: Vec<Vec<RenderStatus>>) -> Self {
    Self {
      rounds: Mutex::new(rounds.into()),
      ..Self::default()
    }
  }

  pub fn needs_polls(self, page_url: &str, polls: usize) -> Self {
    self
      .polls_needed
      .lock()
      .unwrap()
      .insert(page_url.to_string(), polls);
    self
  }

  pub fn fails_on(self, browser: &str) -> Self {
    self
      .failing_browsers
      .lock()
      .unwrap()
      .insert(browser.to_string());
    self
  }

  pub fn render_calls(&self) -> usize {
    self.batch_sizes.lock().unwrap().len()
  }

  pub fn put_urls(&self) -> Vec<String> {
    self.puts.lock().unwrap().iter().map(|(_, url)| url.clone()).collect()
  }
}

#[async_trait]
impl RenderGrid for MockGrid {
  async fn render(&self, requests: &[RenderRequest]) -> Result<Vec<RunningRender>> {
    tokio::task::yield_now().await;
    self.batch_sizes.lock().unwrap().push(requests.len());
    if *self.fail_render.lock().unwrap() {
      return Err(Error::Transport(TransportError::Status {
        endpoint: "render".to_string(),
        status: 503,
      }));
    }
    let statuses = self.rounds.lock().unwrap().pop_front().unwrap_or_default();
    let mut renders = self.renders.lock().unwrap();
    Ok(
      requests
        .iter()
        .enumerate()
        .map(|(index, request)| {
          let render_id = request.render_id.clone().unwrap_or_else(|| {
            format!("render-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
          });
          renders.insert(
            render_id.clone(),
            (request.url.clone(), request.browser_name.clone()),
          );
          RunningRender {
            render_id: Some(render_id),
            render_status: Some(statuses.get(index).copied().unwrap_or(RenderStatus::Rendering)),
            need_more_resources: None,
            need_more_dom: false,
          }
        })
        .collect(),
    )
  }

  async fn render_status(&self, render_ids: &[String]) -> Result<Vec<RenderStatusResult>> {
    tokio::task::yield_now().await;
    if *self.fail_status.lock().unwrap() {
      return Err(Error::Transport(TransportError::Status {
        endpoint: "render-status".to_string(),
        status: 503,
      }));
    }
    let renders = self.renders.lock().unwrap();
    let mut polls = self.polls.lock().unwrap();
    Ok(
      render_ids
        .iter()
        .map(|render_id| {
          let Some((url, browser)) = renders.get(render_id) else {
            return RenderStatusResult {
              status: Some(RenderStatus::Error),
              error: Some("unknown render".to_string()),
              ..RenderStatusResult::default()
            };
          };
          if browser
            .as_ref()
            .is_some_and(|b| self.failing_browsers.lock().unwrap().contains(b))
          {
            return RenderStatusResult {
              render_id: Some(render_id.clone()),
              status: Some(RenderStatus::Error),
              error: Some("selector not found".to_string()),
              ..RenderStatusResult::default()
            };
          }
          let count = polls.entry(render_id.clone()).or_default();
          *count += 1;
          let needed = self.polls_needed.lock().unwrap().get(url).copied().unwrap_or(1);
          if *count < needed {
            return RenderStatusResult {
              status: Some(RenderStatus::Rendering),
              ..RenderStatusResult::default()
            };
          }
          if *count == needed {
            self.rendered_order.lock().unwrap().push(url.clone());
          }
          RenderStatusResult {
            render_id: Some(render_id.clone()),
            status: Some(RenderStatus::Rendered),
            image_location: Some(format!("https://img.test/{render_id}.png")),
            user_agent: browser.as_ref().map(|b| format!("agent-{b}")),
            device_size: Some(DeviceSize {
              width: 800,
              height: 600,
            }),
            ..RenderStatusResult::default()
          }
        })
        .collect(),
    )
  }

  async fn put_resource(&self, render_id: &str, resource: &Resource) -> Result<()> {
    self
      .puts
      .lock()
      .unwrap()
      .push((render_id.to_string(), resource.url().to_string()));
    Ok(())
  }

  async fn user_agents(&self) -> Result<HashMap<String, String>> {
    self.user_agent_calls.fetch_add(1, Ordering::SeqCst);
    Ok(HashMap::from([
      ("chrome".to_string(), "table-chrome".to_string()),
      ("firefox".to_string(), "table-firefox".to_string()),
    ]))
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
  Open(usize),
  Environment(usize, String),
  Viewport(usize),
  Check { index: usize, step: usize, url: String },
  Close(usize),
  Abort(usize),
}

/// Diff session that appends every call to a log shared by all browsers.
pub struct RecordingSession {
  index: usize,
  log: Arc<Mutex<Vec<SessionEvent>>>,
}

impl RecordingSession {
  pub fn sessions(count: usize) -> (Vec<Arc<dyn DiffSession>>, Arc<Mutex<Vec<SessionEvent>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sessions = (0..count)
      .map(|index| {
        Arc::new(RecordingSession {
          index,
          log: Arc::clone(&log),
        }) as Arc<dyn DiffSession>
      })
      .collect();
    (sessions, log)
  }

  fn record(&self, event: SessionEvent) {
    self.log.lock().unwrap().push(event);
  }

  fn checks(&self) -> usize {
    self
      .log
      .lock()
      .unwrap()
      .iter()
      .filter(|e| matches!(e, SessionEvent::Check { index, .. } if *index == self.index))
      .count()
  }
}

#[async_trait]
impl DiffSession for RecordingSession {
  async fn open(&self) -> Result<()> {
    self.record(SessionEvent::Open(self.index));
    Ok(())
  }

  async fn check_window(&self, args: CheckArgs) -> Result<MatchResult> {
    self.record(SessionEvent::Check {
      index: self.index,
      step: args.step,
      url: args.url,
    });
    Ok(MatchResult { as_expected: true })
  }

  async fn set_inferred_environment(&self, environment: String) -> Result<()> {
    self.record(SessionEvent::Environment(self.index, environment));
    Ok(())
  }

  async fn set_viewport_size(&self, _size: DeviceSize) -> Result<()> {
    self.record(SessionEvent::Viewport(self.index));
    Ok(())
  }

  async fn close(&self) -> Result<TestResults> {
    self.record(SessionEvent::Close(self.index));
    Ok(TestResults {
      steps: self.checks(),
      status: Some("Passed".to_string()),
      ..TestResults::default()
    })
  }

  async fn abort(&self) -> Result<TestResults> {
    self.record(SessionEvent::Abort(self.index));
    Ok(TestResults {
      is_aborted: true,
      ..TestResults::default()
    })
  }

  fn results_url(&self) -> Option<String> {
    Some(format!("https://diff.test/{}/__random__", self.index))
  }
}

pub fn snapshot(url: &str, resource_urls: &[&str]) -> PageSnapshot {
  PageSnapshot {
    url: url.to_string(),
    resource_urls: resource_urls.iter().map(|u| u.to_string()).collect(),
    ..PageSnapshot::default()
  }
}

pub fn checks(log: &Mutex<Vec<SessionEvent>>) -> Vec<(usize, usize, String)> {
  log
    .lock()
    .unwrap()
    .iter()
    .filter_map(|event| match event {
      SessionEvent::Check { index, step, url } => Some((*index, *step, url.clone())),
      _ => None,
    })
    .collect()
}

/// Route library logs to the test harness output; safe to call from every test.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_test_writer()
    .with_max_level(tracing::Level::DEBUG)
    .try_init();
}
