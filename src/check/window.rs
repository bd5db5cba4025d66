//! Check-window orchestrator
//!
//! Each step of a test is one task made of two halves running concurrently:
//!
//! - the render job: waits for a render-gate slot, assembles the DOM, submits
//!   the batch and polls every render, handing each browser its outcome over a
//!   oneshot channel. The gate slot is held until every poll has finished.
//! - one dispatcher per browser: waits for its outcome, then for the previous
//!   step of the same browser to be delivered, then for the test-open
//!   handshake, and finally hands the screenshot to the diff session.
//!
//! A browser walks `pending -> awaiting status -> awaiting prior step ->
//! dispatched`. Stop conditions are checked at every boundary; an abandoned
//! step still waits for its predecessor before signalling its own delivery so
//! per-browser order holds whatever happens.

use super::controller::TestController;
use super::settings::{CheckSettings, Target};
use crate::api::ClientContext;
use crate::dom::{assemble_dom, PageSnapshot};
use crate::error::{Error, PollError, Result};
use crate::render::grid::RenderStatusResult;
use crate::render::request::{BrowserConfig, RenderRequestBuilder};
use crate::resource::FetchOptions;
use crate::session::{webhook_from_template, CheckArgs, DiffSession};
use futures::future::{join_all, BoxFuture, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Test-open handshake shared by every step of one browser.
pub type OpenHandshake = Shared<BoxFuture<'static, Result<()>>>;

/// What the render job hands to a browser's dispatcher.
#[derive(Debug)]
enum RenderOutcome {
  Rendered {
    render_id: String,
    status: RenderStatusResult,
  },
  /// The render failed; the error is already recorded on the controller.
  Failed { user_agent: Option<String> },
}

/// One step as submitted by the caller.
#[derive(Debug, Clone)]
pub(crate) struct StepPlan {
  pub step: usize,
  pub settings: CheckSettings,
  pub snapshot: PageSnapshot,
}

/// State shared by every step of one visual test.
pub(crate) struct TestState {
  pub(crate) client: Arc<ClientContext>,
  pub(crate) browsers: Vec<BrowserConfig>,
  pub(crate) sessions: Vec<Arc<dyn DiffSession>>,
  pub(crate) controller: TestController,
  pub(crate) opened: Vec<OpenHandshake>,
}

impl TestState {
  /// Run one step to completion (delivered or abandoned on every browser).
  pub(crate) async fn run_step(
    self: Arc<Self>,
    plan: StepPlan,
    predecessors: Vec<Option<oneshot::Receiver<()>>>,
    delivered: Vec<oneshot::Sender<()>>,
  ) {
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..self.browsers.len())
      .map(|_| oneshot::channel::<RenderOutcome>())
      .unzip();

    let dispatches = receivers
      .into_iter()
      .zip(predecessors)
      .zip(delivered)
      .enumerate()
      .map(|(index, ((outcome, predecessor), delivered))| {
        self.dispatch(&plan, index, outcome, predecessor, delivered)
      });

    futures::join!(self.render_job(&plan, senders), join_all(dispatches));
    debug!(step = plan.step, "step finished");
  }

  async fn render_job(&self, plan: &StepPlan, outcomes: Vec<oneshot::Sender<RenderOutcome>>) {
    let global = &self.client.global;
    global.queue_render();
    let ticket = self.client.render_throat.acquire().await;
    global.unqueue_render();
    let ticket = match ticket {
      Ok(ticket) => ticket,
      Err(err) => return self.fail_test(err).await,
    };

    if self.controller.should_stop_all() {
      debug!(step = plan.step, "test stopped before render submission");
      return;
    }

    let user_agents = match self.browser_user_agents().await {
      Ok(user_agents) => user_agents,
      Err(err) => return self.fail_test(err).await,
    };
    let submitted = self.submit(plan, &user_agents).await;
    let render_ids = match submitted {
      Ok(Some(render_ids)) => render_ids,
      Ok(None) => return,
      Err(err) => {
        for (outcome, user_agent) in outcomes.into_iter().zip(user_agents) {
          let _ = outcome.send(RenderOutcome::Failed { user_agent });
        }
        return self.fail_test(err).await;
      }
    };

    let polls = render_ids
      .into_iter()
      .zip(user_agents)
      .zip(outcomes)
      .enumerate()
      .map(|(index, ((render_id, user_agent), outcome))| {
        self.poll_render(plan.step, index, render_id, user_agent, outcome)
      });
    join_all(polls).await;
    ticket.release();
  }

  /// The grid's user agent for each browser, index-aligned.
  async fn browser_user_agents(&self) -> Result<Vec<Option<String>>> {
    let table = self.client.user_agents().await?;
    Ok(
      self
        .browsers
        .iter()
        .map(|browser| table.get(&browser.user_agent_key()).cloned())
        .collect(),
    )
  }

  async fn submit(&self, plan: &StepPlan, user_agents: &[Option<String>]) -> Result<Option<Vec<String>>> {
    let client = &self.client;
    let mut options = FetchOptions::default();
    if let Some(user_agent) = client
      .config
      .user_agent
      .clone()
      .or_else(|| user_agents.first().cloned().flatten())
    {
      options = options.with_user_agent(user_agent);
    }

    let assembled = assemble_dom(&client.resolver, &plan.snapshot, &options).await;
    let settings = &plan.settings;
    let mut requests = RenderRequestBuilder::new()
      .with_url(plan.snapshot.url.clone())
      .with_size_mode(settings.size_mode())
      .with_selector(settings.target_selector().map(str::to_string))
      .with_region(settings.target_region())
      .with_script_hooks(settings.script_hooks.clone())
      .with_selectors_to_find_regions_for(settings.selectors_to_find_regions_for())
      .with_send_dom(settings.send_dom.unwrap_or(false))
      .with_options(settings.render_options.clone())
      .build(&assembled, &self.browsers)?;
    for (request, session) in requests.iter_mut().zip(&self.sessions) {
      if let Some(template) = session.results_url() {
        request.webhook = Some(webhook_from_template(&template, &unique_token()));
      }
    }

    if self.controller.should_stop_all() {
      debug!(step = plan.step, "test stopped before render submission");
      return Ok(None);
    }

    let render_ids = client.coordinator.submit(&mut requests, &options).await?;
    for (index, render_id) in render_ids.iter().enumerate() {
      debug!(step = plan.step, index, render_id = %render_id, "render submitted");
      self.controller.add_render_id(index, render_id.clone());
    }
    Ok(Some(render_ids))
  }

  async fn poll_render(
    &self,
    step: usize,
    index: usize,
    render_id: String,
    user_agent: Option<String>,
    outcome: oneshot::Sender<RenderOutcome>,
  ) {
    let mut probe = self.controller.probe(Some(index));
    match self.client.poller.wait(&render_id, &mut probe).await {
      Ok(status) => {
        debug!(step, index, render_id = %render_id, "render finished");
        let _ = outcome.send(RenderOutcome::Rendered { render_id, status });
      }
      Err(PollError::Cancelled { .. }) => {
        debug!(step, index, render_id = %render_id, "render wait cancelled");
      }
      Err(PollError::Transport(err)) => {
        let _ = outcome.send(RenderOutcome::Failed { user_agent });
        self.fail_test(err).await;
      }
      Err(err) => {
        let err = Error::from(err);
        warn!(step, index, render_id = %render_id, error = %err, "render failed");
        self.controller.set_error(index, err);
        let _ = outcome.send(RenderOutcome::Failed { user_agent });
      }
    }
  }

  /// Settle every pending open handshake, then stop the whole test.
  async fn fail_test(&self, err: Error) {
    join_all(self.opened.iter().cloned()).await;
    self.controller.set_fatal_error(err);
  }

  async fn dispatch(
    &self,
    plan: &StepPlan,
    index: usize,
    outcome: oneshot::Receiver<RenderOutcome>,
    predecessor: Option<oneshot::Receiver<()>>,
    delivered: oneshot::Sender<()>,
  ) {
    let session = &self.sessions[index];
    let (render_id, status) = match outcome.await {
      Ok(RenderOutcome::Rendered { render_id, status }) => (render_id, status),
      Ok(RenderOutcome::Failed { user_agent }) => {
        if let Some(user_agent) = user_agent {
          self
            .record_environment(index, session.as_ref(), &user_agent)
            .await;
        }
        return abandon(predecessor, delivered).await;
      }
      Err(_) => return abandon(predecessor, delivered).await,
    };

    if self.controller.should_stop(index) {
      return abandon(predecessor, delivered).await;
    }
    if let Some(user_agent) = &status.user_agent {
      self
        .record_environment(index, session.as_ref(), user_agent)
        .await;
    }
    if let Some(size) = status.device_size {
      if let Err(err) = session.set_viewport_size(size).await {
        self.controller.set_error(index, err);
      }
    }

    if let Some(predecessor) = predecessor {
      let _ = predecessor.await;
    }
    if self.controller.should_stop(index) {
      debug!(step = plan.step, index, "step abandoned before delivery");
      return;
    }
    if let Err(err) = self.opened[index].clone().await {
      self.controller.set_error(index, err);
      return;
    }
    if self.controller.should_stop(index) {
      return;
    }

    let Some(args) = check_args(plan, render_id, status) else {
      self.controller.set_error(
        index,
        Error::Other(format!("render for step {} has no screenshot", plan.step)),
      );
      return;
    };
    debug!(step = plan.step, index, "delivering step");
    match session.check_window(args).await {
      Ok(result) => debug!(step = plan.step, index, as_expected = result.as_expected, "step delivered"),
      Err(err) => {
        warn!(step = plan.step, index, error = %err, "diff backend rejected step");
        self.controller.set_error(index, err);
      }
    }
    let _ = delivered.send(());
  }

  async fn record_environment(&self, index: usize, session: &dyn DiffSession, user_agent: &str) {
    if let Err(err) = session
      .set_inferred_environment(format!("useragent:{user_agent}"))
      .await
    {
      self.controller.set_error(index, err);
    }
  }
}

/// Let the predecessor finish before releasing successors of an abandoned step.
async fn abandon(predecessor: Option<oneshot::Receiver<()>>, delivered: oneshot::Sender<()>) {
  if let Some(predecessor) = predecessor {
    let _ = predecessor.await;
  }
  drop(delivered);
}

fn check_args(plan: &StepPlan, render_id: String, status: RenderStatusResult) -> Option<CheckArgs> {
  let settings = &plan.settings;
  let regions = settings.resolve_regions(status.selector_regions.as_deref().unwrap_or(&[]));
  let image_location = match settings.target {
    Target::Window => None,
    Target::Region => regions.target.first().copied().or(settings.region),
  };
  Some(CheckArgs {
    step: plan.step,
    tag: settings.name.clone(),
    url: plan.snapshot.url.clone(),
    render_id,
    screenshot_url: status.image_location?,
    dom_url: status.dom_location,
    image_location,
    ignore: regions.ignore,
    layout: regions.layout,
    strict: regions.strict,
    content: regions.content,
    accessibility: regions.accessibility,
    floating: regions.floating,
    match_level: settings.match_level,
    use_dom: settings.use_dom,
    enable_patterns: settings.enable_patterns,
    ignore_displacements: settings.ignore_displacements,
  })
}

fn unique_token() -> String {
  static COUNTER: AtomicU64 = AtomicU64::new(0);
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos())
    .unwrap_or_default();
  format!("{nanos:x}{:04x}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::render::request::Region;

  fn plan(settings: CheckSettings) -> StepPlan {
    StepPlan {
      step: 1,
      settings,
      snapshot: PageSnapshot {
        url: "https://a.test/".to_string(),
        ..PageSnapshot::default()
      },
    }
  }

  #[test]
  fn check_args_use_target_region_as_image_location() {
    let plan = plan(CheckSettings::selector("#main").ignore(".ad").with_name("home"));
    let status = RenderStatusResult {
      image_location: Some("https://img.test/1.png".to_string()),
      selector_regions: Some(vec![
        vec![Region::new(5.0, 6.0, 100.0, 50.0)],
        vec![Region::new(7.0, 8.0, 1.0, 1.0)],
      ]),
      ..RenderStatusResult::default()
    };
    let args = check_args(&plan, "r1".to_string(), status).unwrap();
    assert_eq!(args.image_location, Some(Region::new(5.0, 6.0, 100.0, 50.0)));
    assert_eq!(args.ignore, vec![Region::new(7.0, 8.0, 1.0, 1.0)]);
    assert_eq!(args.tag.as_deref(), Some("home"));
    assert_eq!(args.url, "https://a.test/");
  }

  #[test]
  fn check_args_need_a_screenshot() {
    let plan = plan(CheckSettings::window());
    assert!(check_args(&plan, "r1".to_string(), RenderStatusResult::default()).is_none());
  }

  #[test]
  fn tokens_are_unique() {
    assert_ne!(unique_token(), unique_token());
  }
}
