//! Deduplicating, retrying resource fetcher
//!
//! Every URL maps to a single shared fetch slot: the first caller performs the
//! network request and every concurrent caller for the same URL awaits the same
//! slot. Completed slots stay in the table until [`ResourceFetcher::forget`] is
//! called for the URL, so repeated lookups are served without network access.

use super::{FetchOptions, NetworkFetcher, Resource, GATEWAY_TIMEOUT};
use crate::error::{Error, ResourceError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Bounded retry schedule for transient fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Attempts made after the first one.
  pub retries: u32,
  /// Pause before each retry.
  pub delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      retries: 2,
      delay: Duration::from_millis(100),
    }
  }
}

type FetchSlot = Arc<OnceCell<std::result::Result<Resource, Error>>>;

/// Fetch layer that guarantees at most one network fetch in flight per URL.
#[derive(Clone)]
pub struct ResourceFetcher {
  network: Arc<dyn NetworkFetcher>,
  retry: RetryPolicy,
  in_flight: Arc<Mutex<HashMap<String, FetchSlot>>>,
}

impl ResourceFetcher {
  pub fn new(network: Arc<dyn NetworkFetcher>) -> Self {
    Self {
      network,
      retry: RetryPolicy::default(),
      in_flight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  fn table(&self) -> MutexGuard<'_, HashMap<String, FetchSlot>> {
    self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn join_inflight(&self, url: &str) -> (FetchSlot, bool) {
    let mut map = self.table();
    if let Some(existing) = map.get(url) {
      return (Arc::clone(existing), false);
    }
    let slot: FetchSlot = Arc::new(OnceCell::new());
    map.insert(url.to_string(), Arc::clone(&slot));
    (slot, true)
  }

  /// Fetch `url`, sharing the result with every concurrent caller.
  ///
  /// HTTP error statuses come back as error-coded resources. `Err` is returned
  /// only for failures that are not worth retrying (e.g. an unfetchable URL).
  pub async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<Resource> {
    let (slot, is_owner) = self.join_inflight(url);
    if !is_owner {
      debug!(url, "joining in-flight fetch");
    }
    slot
      .get_or_init(|| self.fetch_with_retries(url, options))
      .await
      .clone()
  }

  async fn fetch_with_retries(&self, url: &str, options: &FetchOptions) -> std::result::Result<Resource, Error> {
    let mut attempt = 0u32;
    loop {
      match self.network.fetch(url, options).await {
        Ok(response) if response.is_success() => {
          return Ok(Resource::from_content(url, response.content_type, response.body));
        }
        Ok(response) => {
          warn!(url, status = response.status, "resource fetch returned error status");
          return Ok(Resource::error(url, response.status));
        }
        Err(err @ Error::Resource(ResourceError::InvalidUrl { .. })) => return Err(err),
        Err(err) if attempt < self.retry.retries => {
          attempt += 1;
          debug!(url, attempt, error = %err, "retrying resource fetch");
          if !self.retry.delay.is_zero() {
            tokio::time::sleep(self.retry.delay).await;
          }
        }
        Err(err) => {
          warn!(url, error = %err, "resource fetch failed after retries");
          return Ok(Resource::error(url, GATEWAY_TIMEOUT));
        }
      }
    }
  }

  /// Drop the shared slot for `url` so the next fetch goes to the network again.
  pub fn forget(&self, url: &str) {
    self.table().remove(url);
  }

  /// True when a slot (pending or completed) exists for `url`.
  pub fn is_tracked(&self, url: &str) -> bool {
    self.table().contains_key(url)
  }
}
