//! Resource graph resolution
//!
//! Starting from the URLs a page references directly, the resolver walks the
//! transitive resource graph: stylesheets and SVG documents are parsed for the
//! URLs they reference, and those are resolved in turn. Cached entries
//! short-circuit the walk, unreachable resources degrade to error-coded stubs,
//! and resolution of the rest of the graph always completes.

use super::cache::{from_cache_entry, to_cache_entry, ResourceCache};
use super::fetch::ResourceFetcher;
use super::{is_fetchable_url, FetchOptions, ProcessingKind, RawResource, Resource, GATEWAY_TIMEOUT};
use crate::css::loader::{absolutize_urls, extract_css_urls};
use crate::svg::extract_svg_urls;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Resolved resources keyed by URL.
pub type ResourceMap = BTreeMap<String, Resource>;

/// Merge `source` into `target`, never replacing an entry that already has content.
pub fn assign_contentful(target: &mut ResourceMap, source: impl IntoIterator<Item = (String, Resource)>) {
  for (url, resource) in source {
    match target.get(&url) {
      Some(existing) if existing.has_content() => {}
      _ => {
        target.insert(url, resource);
      }
    }
  }
}

/// Absolute URLs referenced by a CSS or SVG resource.
pub fn extract_dependency_urls(resource: &Resource) -> Vec<String> {
  let (Some(kind), Some(content)) = (resource.processing_kind(), resource.content()) else {
    return Vec::new();
  };
  let raw = match kind {
    ProcessingKind::Css => extract_css_urls(&String::from_utf8_lossy(content)),
    ProcessingKind::Svg => match extract_svg_urls(content) {
      Ok(urls) => urls,
      Err(err) => {
        warn!(url = resource.url(), error = %err, "failed to parse svg dependencies");
        Vec::new()
      }
    },
  };
  absolutize_urls(resource.url(), &raw)
}

/// Walks a page's resource graph through the shared cache and fetcher.
#[derive(Clone)]
pub struct ResourceResolver {
  cache: ResourceCache,
  fetcher: ResourceFetcher,
}

impl ResourceResolver {
  pub fn new(cache: ResourceCache, fetcher: ResourceFetcher) -> Self {
    Self { cache, fetcher }
  }

  pub fn cache(&self) -> &ResourceCache {
    &self.cache
  }

  pub fn fetcher(&self) -> &ResourceFetcher {
    &self.fetcher
  }

  /// Resolve `root_urls` and everything they transitively reference.
  ///
  /// `pre_resources` are taken verbatim (they win over cache and network for
  /// their URL) and are never fetched.
  pub async fn resolve(
    &self,
    root_urls: &[String],
    pre_resources: BTreeMap<String, RawResource>,
    options: &FetchOptions,
  ) -> ResourceMap {
    let handled = Mutex::new(HashSet::new());
    self
      .get_or_fetch(root_urls.to_vec(), pre_resources, &handled, options)
      .await
  }

  fn get_or_fetch<'a>(
    &'a self,
    urls: Vec<String>,
    pre_resources: BTreeMap<String, RawResource>,
    handled: &'a Mutex<HashSet<String>>,
    options: &'a FetchOptions,
  ) -> BoxFuture<'a, ResourceMap> {
    async move {
      let mut resources = ResourceMap::new();

      let mut seeded = Vec::with_capacity(pre_resources.len());
      for (url, raw) in pre_resources {
        mark_handled(handled, &url);
        let resource = raw.into_resource(url.clone());
        self
          .cache
          .set_value(url.clone(), to_cache_entry(&resource, true));
        assign_contentful(&mut resources, [(url, resource.clone())]);
        seeded.push(resource);
      }

      let mut missing = Vec::new();
      for url in urls {
        if !mark_handled(handled, &url) {
          continue;
        }
        if let Some(entries) = self.cache.get_with_dependencies(&url) {
          debug!(url = %url, count = entries.len(), "resource cache hit");
          assign_contentful(
            &mut resources,
            entries
              .into_iter()
              .map(|(dep_url, entry)| (dep_url, from_cache_entry(&entry))),
          );
        } else if is_fetchable_url(&url) {
          missing.push(url);
        } else {
          debug!(url = %url, "skipping non-http resource");
        }
      }

      let seeded_jobs = seeded
        .into_iter()
        .map(|resource| self.process_resource(resource, handled, options).boxed());
      let fetch_jobs = missing.into_iter().map(|url| {
        async move {
          let resource = match self.fetcher.fetch(&url, options).await {
            Ok(resource) => resource,
            Err(err) => {
              warn!(url = %url, error = %err, "resource fetch failed; substituting error stub");
              Resource::error(url.clone(), GATEWAY_TIMEOUT)
            }
          };
          self.process_resource(resource, handled, options).await
        }
        .boxed()
      });

      for processed in join_all(seeded_jobs.chain(fetch_jobs)).await {
        assign_contentful(&mut resources, processed);
      }
      resources
    }
    .boxed()
  }

  async fn process_resource(
    &self,
    resource: Resource,
    handled: &Mutex<HashSet<String>>,
    options: &FetchOptions,
  ) -> ResourceMap {
    let url = resource.url().to_string();
    let dependencies = extract_dependency_urls(&resource);
    let dependent = if dependencies.is_empty() {
      ResourceMap::new()
    } else {
      self
        .get_or_fetch(dependencies.clone(), BTreeMap::new(), handled, options)
        .await
    };

    self.cache.set_dependencies(url.clone(), dependencies);
    self.cache.set_value(
      url.clone(),
      to_cache_entry(&resource, resource.requires_processing()),
    );

    let mut out = ResourceMap::new();
    out.insert(url, resource);
    assign_contentful(&mut out, dependent);
    out
  }
}

/// Returns true the first time a URL is seen during one resolution.
fn mark_handled(handled: &Mutex<HashSet<String>>, url: &str) -> bool {
  handled
    .lock()
    .unwrap_or_else(|e| e.into_inner())
    .insert(url.to_string())
}
