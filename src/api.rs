//! Public API for gridcheck
//!
//! A [`GridClient`] owns everything shared across visual tests: the resource
//! cache and fetcher, the render and test-open gates, the grid transport and
//! the process-wide counters. A [`VisualTest`] is one test run on a list of
//! browsers, each paired with a diff session.
//!
//! # Example
//!
//! ```rust,ignore
//! use gridcheck::{BrowserConfig, CheckSettings, ClientConfig, GridClient, PageSnapshot};
//!
//! let client = GridClient::http(ClientConfig::from_env(), "https://grid.example.com/api", token);
//! let test = client
//!     .open_test(vec![BrowserConfig::desktop("chrome", 1024, 768)], sessions)
//!     .await?;
//! test.check_window(CheckSettings::window().fully(true), PageSnapshot::from_json(&captured)?)?;
//! let results = test.close().await?;
//! ```
//!
//! # Flow
//!
//! ```text
//! snapshot → resolve resources → assemble DOM → build requests → submit batch
//!          → (upload + resubmit once) → poll status → deliver in step order
//! ```

use crate::check::controller::TestController;
use crate::check::settings::CheckSettings;
use crate::check::throat::Throat;
use crate::check::window::{OpenHandshake, StepPlan, TestState};
use crate::config::ClientConfig;
use crate::dom::PageSnapshot;
use crate::error::{Error, Result, ValidationError};
use crate::render::batch::BatchCoordinator;
use crate::render::grid::{HttpRenderGrid, RenderGrid};
use crate::render::request::{validate_browsers, BrowserConfig};
use crate::render::status::StatusPoller;
use crate::resource::cache::ResourceCache;
use crate::resource::fetch::{ResourceFetcher, RetryPolicy};
use crate::resource::graph::ResourceResolver;
use crate::resource::{HttpFetcher, NetworkFetcher};
use crate::session::{DiffSession, TestResults};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type BatchCloser = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Process-wide counters and the batch-close registry.
#[derive(Default)]
pub struct GlobalState {
  queued_renders: AtomicUsize,
  batch_closers: Mutex<Vec<BatchCloser>>,
}

impl std::fmt::Debug for GlobalState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GlobalState")
      .field("queued_renders", &self.queued_renders())
      .finish_non_exhaustive()
  }
}

impl GlobalState {
  /// Render jobs currently waiting for a render-gate slot.
  pub fn queued_renders(&self) -> usize {
    self.queued_renders.load(Ordering::SeqCst)
  }

  pub(crate) fn queue_render(&self) {
    self.queued_renders.fetch_add(1, Ordering::SeqCst);
  }

  pub(crate) fn unqueue_render(&self) {
    self.queued_renders.fetch_sub(1, Ordering::SeqCst);
  }

  /// Register a callback run once by [`GridClient::close_batches`].
  pub fn register_batch_close<F>(&self, close: F)
  where
    F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
  {
    guard(&self.batch_closers).push(Box::new(close));
  }
}

/// Everything shared by the tests of one client.
pub(crate) struct ClientContext {
  pub(crate) config: ClientConfig,
  pub(crate) resolver: ResourceResolver,
  pub(crate) coordinator: BatchCoordinator,
  pub(crate) poller: StatusPoller,
  pub(crate) render_throat: Throat,
  pub(crate) open_throat: Throat,
  pub(crate) global: GlobalState,
  grid: Arc<dyn RenderGrid>,
  user_agents: OnceCell<HashMap<String, String>>,
}

impl ClientContext {
  /// The grid's user-agent table, fetched on first use.
  pub(crate) async fn user_agents(&self) -> Result<&HashMap<String, String>> {
    self
      .user_agents
      .get_or_try_init(|| async {
        let table = self.grid.user_agents().await?;
        debug!(count = table.len(), "fetched user-agent table");
        Ok::<_, Error>(table)
      })
      .await
  }
}

/// Entry point: shared state for running visual tests on a render grid.
#[derive(Clone)]
pub struct GridClient {
  inner: Arc<ClientContext>,
}

impl std::fmt::Debug for GridClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GridClient")
      .field("config", &self.inner.config)
      .field("global", &self.inner.global)
      .finish_non_exhaustive()
  }
}

impl GridClient {
  /// Client over arbitrary transports.
  pub fn new(config: ClientConfig, grid: Arc<dyn RenderGrid>, network: Arc<dyn NetworkFetcher>) -> Self {
    let fetcher = ResourceFetcher::new(network).with_retry_policy(RetryPolicy {
      retries: config.fetch_retries,
      delay: config.fetch_retry_delay,
    });
    let resolver = ResourceResolver::new(ResourceCache::new(), fetcher);
    let coordinator = BatchCoordinator::new(Arc::clone(&grid), resolver.clone());
    let poller = StatusPoller::new(
      Arc::clone(&grid),
      config.render_status_interval,
      config.render_status_timeout,
    );
    let render_throat = Throat::new("render", config.render_concurrency());
    let open_throat = Throat::new("open", config.open_concurrency());
    info!(
      render_concurrency = render_throat.size(),
      open_concurrency = open_throat.size(),
      "grid client created"
    );
    Self {
      inner: Arc::new(ClientContext {
        config,
        resolver,
        coordinator,
        poller,
        render_throat,
        open_throat,
        global: GlobalState::default(),
        grid,
        user_agents: OnceCell::new(),
      }),
    }
  }

  /// Client over the grid's HTTP API, fetching resources with ureq.
  pub fn http(config: ClientConfig, grid_url: impl Into<String>, access_token: impl Into<String>) -> Self {
    let mut fetcher = HttpFetcher::new().with_timeout(config.fetch_timeout);
    if let Some(user_agent) = &config.user_agent {
      fetcher = fetcher.with_user_agent(user_agent.clone());
    }
    let grid = HttpRenderGrid::new(grid_url, access_token);
    Self::new(config, Arc::new(grid), Arc::new(fetcher))
  }

  pub fn config(&self) -> &ClientConfig {
    &self.inner.config
  }

  pub fn cache(&self) -> &ResourceCache {
    self.inner.resolver.cache()
  }

  pub fn resolver(&self) -> &ResourceResolver {
    &self.inner.resolver
  }

  pub fn global_state(&self) -> &GlobalState {
    &self.inner.global
  }

  /// The grid's user-agent table (fetched once per client).
  pub async fn user_agents(&self) -> Result<HashMap<String, String>> {
    self.inner.user_agents().await.cloned()
  }

  /// Open a test on `browsers`, one diff session per browser (index-aligned).
  ///
  /// Configuration errors are reported before any network activity. The
  /// sessions start opening in the background, at most
  /// [`ClientConfig::open_concurrency`] at a time across the client.
  pub async fn open_test(
    &self,
    browsers: Vec<BrowserConfig>,
    sessions: Vec<Arc<dyn DiffSession>>,
  ) -> Result<VisualTest> {
    validate_browsers(&browsers)?;
    if sessions.len() != browsers.len() {
      return Err(Error::Validation(ValidationError::InvalidCheckSettings {
        reason: format!(
          "{} diff sessions for {} browsers",
          sessions.len(),
          browsers.len()
        ),
      }));
    }

    let opened: Vec<OpenHandshake> = sessions
      .iter()
      .map(|session| {
        let throat = self.inner.open_throat.clone();
        let session = Arc::clone(session);
        async move { throat.run(session.open()).await? }
          .boxed()
          .shared()
      })
      .collect();
    for handshake in &opened {
      tokio::spawn(handshake.clone().map(|_| ()));
    }

    let browser_count = browsers.len();
    Ok(VisualTest {
      state: Arc::new(TestState {
        client: Arc::clone(&self.inner),
        browsers,
        sessions,
        controller: TestController::new(),
        opened,
      }),
      queue: Mutex::new(StepQueue {
        next_step: 0,
        last_delivered: (0..browser_count).map(|_| None).collect(),
        jobs: Vec::new(),
      }),
    })
  }

  /// Run every registered batch-close callback once.
  pub async fn close_batches(&self) -> Result<()> {
    let closers: Vec<BatchCloser> = std::mem::take(&mut *guard(&self.inner.global.batch_closers));
    let results = join_all(closers.into_iter().map(|close| close())).await;
    results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
  }
}

struct StepQueue {
  next_step: usize,
  /// Delivery signal of the latest step, per browser.
  last_delivered: Vec<Option<oneshot::Receiver<()>>>,
  jobs: Vec<JoinHandle<()>>,
}

/// One visual test running on several browsers.
pub struct VisualTest {
  state: Arc<TestState>,
  queue: Mutex<StepQueue>,
}

impl std::fmt::Debug for VisualTest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("VisualTest")
      .field("browsers", &self.state.browsers)
      .field("controller", &self.state.controller)
      .finish_non_exhaustive()
  }
}

impl VisualTest {
  pub fn controller(&self) -> &TestController {
    &self.state.controller
  }

  pub fn browsers(&self) -> &[BrowserConfig] {
    &self.state.browsers
  }

  /// Queue one step. Returns as soon as the settings are validated; failures
  /// while rendering surface through the controller and [`VisualTest::close`].
  pub fn check_window(&self, settings: CheckSettings, snapshot: PageSnapshot) -> Result<()> {
    settings.validate()?;

    let mut queue = guard(&self.queue);
    let step = queue.next_step;
    queue.next_step += 1;

    let mut delivered = Vec::with_capacity(queue.last_delivered.len());
    let mut predecessors = Vec::with_capacity(queue.last_delivered.len());
    for slot in queue.last_delivered.iter_mut() {
      let (tx, rx) = oneshot::channel();
      predecessors.push(slot.replace(rx));
      delivered.push(tx);
    }

    debug!(step, "queueing check window");
    let plan = StepPlan {
      step,
      settings,
      snapshot,
    };
    let job = tokio::spawn(Arc::clone(&self.state).run_step(plan, predecessors, delivered));
    queue.jobs.push(job);
    Ok(())
  }

  async fn drain(&self) {
    let jobs = std::mem::take(&mut guard(&self.queue).jobs);
    for job in join_all(jobs).await {
      if let Err(err) = job {
        warn!(error = %err, "check window task failed");
      }
    }
  }

  /// Wait for every step, then close each browser's session.
  ///
  /// A fatal error aborts every session and is returned as `Err`. Otherwise
  /// each browser yields its results, or the first error recorded for it (its
  /// session is aborted in that case).
  pub async fn close(&self) -> Result<Vec<Result<TestResults>>> {
    self.drain().await;
    let state = &self.state;

    if let Some(fatal) = state.controller.fatal_error() {
      warn!(error = %fatal, "closing test after fatal error");
      self.abort_sessions().await;
      return Err(fatal);
    }

    let closes = state.sessions.iter().enumerate().map(|(index, session)| async move {
      state.opened[index].clone().await?;
      match state.controller.error(index) {
        Some(err) => {
          if let Err(abort_err) = session.abort().await {
            warn!(index, error = %abort_err, "failed to abort session");
          }
          Err(err)
        }
        None => session.close().await,
      }
    });
    Ok(join_all(closes).await)
  }

  /// Stop every pending step without reporting an error and abort all sessions.
  pub async fn abort(&self) -> Vec<Result<TestResults>> {
    self.state.controller.abort();
    self.drain().await;
    self.abort_sessions().await
  }

  async fn abort_sessions(&self) -> Vec<Result<TestResults>> {
    let state = &self.state;
    let aborts = state.sessions.iter().enumerate().map(|(index, session)| async move {
      let _ = state.opened[index].clone().await;
      session.abort().await
    });
    join_all(aborts).await
  }
}
