//! Process-lifetime resource cache
//!
//! Maps a resource URL to its persisted [`CacheEntry`] and, separately, to the
//! list of URLs it depends on. Keeping the dependency edges in their own table
//! lets content be dropped from an entry without losing the edges.

use super::Resource;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Persisted projection of a [`Resource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub url: String,
  pub content_type: Option<String>,
  pub hash: Option<String>,
  pub content: Option<Arc<Vec<u8>>>,
  pub error_status_code: Option<u16>,
}

/// Project a resource into a cache entry, keeping its content only when asked to.
pub fn to_cache_entry(resource: &Resource, is_content_needed: bool) -> CacheEntry {
  CacheEntry {
    url: resource.url().to_string(),
    content_type: resource.content_type().map(str::to_string),
    hash: resource.hash().map(str::to_string),
    content: if is_content_needed {
      resource.shared_content()
    } else {
      None
    },
    error_status_code: resource.error_status_code(),
  }
}

/// Rebuild a resource from a cache entry.
pub fn from_cache_entry(entry: &CacheEntry) -> Resource {
  match (&entry.hash, entry.error_status_code) {
    (_, Some(status)) => Resource::error(entry.url.clone(), status),
    (Some(hash), None) => Resource::from_parts(
      entry.url.clone(),
      entry.content_type.clone(),
      hash.clone(),
      entry.content.clone(),
    ),
    (None, None) => match &entry.content {
      Some(content) => {
        Resource::from_content(entry.url.clone(), entry.content_type.clone(), (**content).clone())
      }
      None => Resource::from_content(entry.url.clone(), entry.content_type.clone(), Vec::new()),
    },
  }
}

#[derive(Default)]
struct CacheState {
  values: HashMap<String, CacheEntry>,
  dependencies: HashMap<String, Vec<String>>,
}

/// Unbounded resource cache shared by every test of a client.
///
/// Cloning the cache yields another handle to the same storage.
#[derive(Clone, Default)]
pub struct ResourceCache {
  state: Arc<Mutex<CacheState>>,
}

impl ResourceCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, CacheState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn get_value(&self, url: &str) -> Option<CacheEntry> {
    self.lock().values.get(url).cloned()
  }

  pub fn set_value(&self, url: impl Into<String>, entry: CacheEntry) {
    self.lock().values.insert(url.into(), entry);
  }

  /// Replace the dependency list of `url` wholesale.
  pub fn set_dependencies(&self, url: impl Into<String>, dependencies: Vec<String>) {
    self.lock().dependencies.insert(url.into(), dependencies);
  }

  pub fn dependencies(&self, url: &str) -> Option<Vec<String>> {
    self.lock().dependencies.get(url).cloned()
  }

  /// Entry for `url` plus every cached entry in its dependency closure.
  ///
  /// Returns `None` when `url` itself is not cached. Dependencies without an entry
  /// are left out of the result.
  pub fn get_with_dependencies(&self, url: &str) -> Option<HashMap<String, CacheEntry>> {
    let state = self.lock();
    let root = state.values.get(url)?;

    let mut out = HashMap::new();
    out.insert(url.to_string(), root.clone());
    let mut seen: HashSet<&str> = HashSet::new();
    seen.insert(url);
    let mut stack: Vec<&str> = vec![url];
    while let Some(current) = stack.pop() {
      let Some(deps) = state.dependencies.get(current) else {
        continue;
      };
      for dep in deps {
        if !seen.insert(dep.as_str()) {
          continue;
        }
        if let Some(entry) = state.values.get(dep) {
          out.insert(dep.clone(), entry.clone());
        }
        stack.push(dep.as_str());
      }
    }
    Some(out)
  }

  /// Drop the entry for `url`; its dependency edges are kept.
  pub fn remove(&self, url: &str) -> Option<CacheEntry> {
    self.lock().values.remove(url)
  }

  pub fn len(&self) -> usize {
    self.lock().values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
