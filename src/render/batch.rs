//! Render batch submission
//!
//! A batch is submitted once. Requests the grid answers with
//! `need-more-resources` get their render id attached and their missing
//! resources uploaded, after which the whole batch is submitted one more time.
//! A second `need-more-resources` answer is a protocol violation and fails the
//! batch. Every resource of every request is written back to the resource
//! cache after the first round, whatever the grid answered.

use super::grid::{RenderGrid, RunningRender};
use super::request::RenderRequest;
use crate::error::{Error, RenderError, ResourceError, Result};
use crate::resource::cache::to_cache_entry;
use crate::resource::graph::ResourceResolver;
use crate::resource::{FetchOptions, Resource};
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

type PutSlot = Shared<BoxFuture<'static, Result<()>>>;

/// Submits render batches and performs the upload round.
#[derive(Clone)]
pub struct BatchCoordinator {
  grid: Arc<dyn RenderGrid>,
  resolver: ResourceResolver,
  /// Uploads keyed by content hash; shared while in flight, kept once done.
  put_cache: Arc<Mutex<HashMap<String, PutSlot>>>,
}

impl BatchCoordinator {
  pub fn new(grid: Arc<dyn RenderGrid>, resolver: ResourceResolver) -> Self {
    Self {
      grid,
      resolver,
      put_cache: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn grid(&self) -> &Arc<dyn RenderGrid> {
    &self.grid
  }

  /// Submit `requests` and return their render ids, index-aligned.
  ///
  /// Requests that needed resources keep the render id the grid assigned.
  pub async fn submit(&self, requests: &mut [RenderRequest], options: &FetchOptions) -> Result<Vec<String>> {
    let first = self.render_round(requests).await?;
    let needs_more = first.iter().any(RunningRender::needs_more_resources);

    let uploads = requests
      .iter_mut()
      .zip(first.iter())
      .filter(|(_, running)| running.needs_more_resources())
      .map(|(request, running)| {
        request.render_id = running.render_id.clone();
        self.upload_missing(request, running, options)
      })
      .collect::<Vec<_>>();
    let upload_results = join_all(uploads).await;

    self.persist_resources(requests);
    upload_results.into_iter().collect::<Result<Vec<()>>>()?;

    if !needs_more {
      return render_ids(&first);
    }

    debug!(count = requests.len(), "resubmitting render batch after upload");
    let second = self.render_round(requests).await?;
    if let Some(running) = second.iter().find(|r| r.needs_more_resources()) {
      let render_id = running.render_id.as_deref().unwrap_or("unknown");
      warn!(render_id, "grid still needs resources after upload");
      return Err(Error::Render(RenderError::Unrecoverable {
        message: format!("render {render_id} still needs resources after upload"),
      }));
    }
    render_ids(&second)
  }

  async fn render_round(&self, requests: &[RenderRequest]) -> Result<Vec<RunningRender>> {
    let running = self.grid.render(requests).await?;
    if running.len() != requests.len() {
      return Err(Error::Render(RenderError::MalformedResponse {
        message: format!(
          "{} running renders for {} requests",
          running.len(),
          requests.len()
        ),
      }));
    }
    Ok(running)
  }

  async fn upload_missing(
    &self,
    request: &RenderRequest,
    running: &RunningRender,
    options: &FetchOptions,
  ) -> Result<()> {
    let render_id = running.render_id.clone().ok_or_else(|| {
      Error::Render(RenderError::MalformedResponse {
        message: "need-more-resources without a render id".to_string(),
      })
    })?;

    let mut targets: Vec<Resource> = match &running.need_more_resources {
      Some(urls) => urls
        .iter()
        .filter_map(|url| {
          let found = request.resources.get(url).cloned();
          if found.is_none() {
            debug!(url = %url, render_id = %render_id, "grid asked for an unknown resource");
          }
          found
        })
        .collect(),
      None => request.resources.values().cloned().collect(),
    };
    targets.retain(|r| r.hash().is_some());
    if running.need_more_dom {
      targets.push(request.dom.as_resource());
    }

    let puts = targets
      .into_iter()
      .map(|resource| self.put(render_id.clone(), resource, options.clone()));
    join_all(puts).await.into_iter().collect::<Result<Vec<()>>>()?;
    Ok(())
  }

  fn put(&self, render_id: String, resource: Resource, options: FetchOptions) -> PutSlot {
    let Some(hash) = resource.hash().map(str::to_string) else {
      return futures::future::ready(Ok(())).boxed().shared();
    };
    let mut table = self.put_cache.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = table.get(&hash) {
      return existing.clone();
    }

    let grid = Arc::clone(&self.grid);
    let fetcher = self.resolver.fetcher().clone();
    let put_cache = Arc::clone(&self.put_cache);
    let key = hash.clone();
    let slot = async move {
      let resource = if resource.content().is_some() {
        resource
      } else {
        debug!(url = resource.url(), "re-fetching evicted resource for upload");
        fetcher.forget(resource.url());
        let fetched = fetcher.fetch(resource.url(), &options).await?;
        if fetched.content().is_none() {
          return Err(Error::Resource(ResourceError::MissingContent {
            url: resource.url().to_string(),
          }));
        }
        fetched
      };
      let result = grid.put_resource(&render_id, &resource).await;
      if result.is_err() {
        put_cache
          .lock()
          .unwrap_or_else(|e| e.into_inner())
          .remove(&key);
      }
      result
    }
    .boxed()
    .shared();
    table.insert(hash, slot.clone());
    slot
  }

  fn persist_resources(&self, requests: &[RenderRequest]) {
    let cache = self.resolver.cache();
    let fetcher = self.resolver.fetcher();
    for resource in requests.iter().flat_map(|r| r.resources.values()) {
      fetcher.forget(resource.url());
      cache.set_value(
        resource.url(),
        to_cache_entry(resource, resource.requires_processing()),
      );
    }
  }
}

fn render_ids(running: &[RunningRender]) -> Result<Vec<String>> {
  running
    .iter()
    .map(|r| {
      r.render_id.clone().ok_or_else(|| {
        Error::Render(RenderError::MalformedResponse {
          message: "running render without a render id".to_string(),
        })
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dom::{AssembledDom, RGridDom};
  use crate::render::grid::{RenderStatus, RenderStatusResult};
  use crate::render::request::{BrowserConfig, RenderRequestBuilder};
  use crate::resource::cache::ResourceCache;
  use crate::resource::fetch::ResourceFetcher;
  use crate::resource::graph::ResourceMap;
  use crate::resource::{HttpResponse, NetworkFetcher};
  use async_trait::async_trait;
  use std::collections::VecDeque;

  struct NoNetwork;

  #[async_trait]
  impl NetworkFetcher for NoNetwork {
    async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<HttpResponse> {
      Err(Error::Other(format!("unexpected fetch of {url}")))
    }
  }

  #[derive(Default)]
  struct ScriptedGrid {
    rounds: Mutex<VecDeque<Vec<RunningRender>>>,
    render_calls: Mutex<usize>,
    puts: Mutex<Vec<(String, String)>>,
  }

  #[async_trait]
  impl RenderGrid for ScriptedGrid {
    async fn render(&self, _requests: &[RenderRequest]) -> Result<Vec<RunningRender>> {
      *self.render_calls.lock().unwrap() += 1;
      Ok(self.rounds.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn render_status(&self, _ids: &[String]) -> Result<Vec<RenderStatusResult>> {
      Ok(Vec::new())
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
      Ok(HashMap::new())
    }
  }

  fn running(id: &str, status: RenderStatus) -> RunningRender {
    RunningRender {
      render_id: Some(id.to_string()),
      render_status: Some(status),
      ..RunningRender::default()
    }
  }

  fn setup(rounds: Vec<Vec<RunningRender>>) -> (BatchCoordinator, Arc<ScriptedGrid>, ResourceCache) {
    let grid = Arc::new(ScriptedGrid {
      rounds: Mutex::new(rounds.into()),
      ..ScriptedGrid::default()
    });
    let cache = ResourceCache::new();
    let resolver = ResourceResolver::new(cache.clone(), ResourceFetcher::new(Arc::new(NoNetwork)));
    (BatchCoordinator::new(grid.clone(), resolver), grid, cache)
  }

  fn requests(count: usize) -> Vec<RenderRequest> {
    let image = Resource::from_content("https://a.test/a.png", Some("image/png".into()), vec![1]);
    let mut resources = ResourceMap::new();
    resources.insert(image.url().to_string(), image);
    let assembled = AssembledDom {
      dom: RGridDom::new("https://a.test/", Vec::new(), resources.clone()),
      all_resources: resources,
    };
    let browsers = vec![BrowserConfig::desktop("chrome", 800, 600); count];
    RenderRequestBuilder::new().build(&assembled, &browsers).unwrap()
  }

  #[tokio::test]
  async fn single_round_when_nothing_is_missing() {
    let (coordinator, grid, cache) = setup(vec![vec![
      running("r1", RenderStatus::Rendering),
      running("r2", RenderStatus::Rendering),
    ]]);
    let mut batch = requests(2);
    let ids = coordinator
      .submit(&mut batch, &FetchOptions::default())
      .await
      .unwrap();
    assert_eq!(ids, vec!["r1", "r2"]);
    assert_eq!(*grid.render_calls.lock().unwrap(), 1);
    assert!(grid.puts.lock().unwrap().is_empty());
    assert!(cache.get_value("https://a.test/a.png").is_some());
  }

  #[tokio::test]
  async fn uploads_dom_and_listed_resources_once() {
    let mut first = running("r1", RenderStatus::NeedMoreResources);
    first.need_more_resources = Some(vec!["https://a.test/a.png".to_string()]);
    first.need_more_dom = true;
    let mut second = running("r2", RenderStatus::NeedMoreResources);
    second.need_more_resources = Some(vec!["https://a.test/a.png".to_string()]);
    let (coordinator, grid, _) = setup(vec![
      vec![first, second],
      vec![
        running("r1", RenderStatus::Rendering),
        running("r2", RenderStatus::Rendering),
      ],
    ]);

    let mut batch = requests(2);
    let ids = coordinator
      .submit(&mut batch, &FetchOptions::default())
      .await
      .unwrap();
    assert_eq!(ids, vec!["r1", "r2"]);
    assert_eq!(batch[0].render_id.as_deref(), Some("r1"));
    assert_eq!(*grid.render_calls.lock().unwrap(), 2);

    let puts = grid.puts.lock().unwrap();
    let image_puts = puts
      .iter()
      .filter(|(_, url)| url == "https://a.test/a.png")
      .count();
    assert_eq!(image_puts, 1);
    assert!(puts.iter().any(|(id, url)| id == "r1" && url == "https://a.test/"));
  }

  #[tokio::test]
  async fn mismatched_answer_is_malformed() {
    let (coordinator, _, _) = setup(vec![vec![running("r1", RenderStatus::Rendering)]]);
    let mut batch = requests(2);
    let err = coordinator
      .submit(&mut batch, &FetchOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Render(RenderError::MalformedResponse { .. })));
  }
}
