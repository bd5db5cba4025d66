//! Shared per-test state observed by every step of a visual test.
//!
//! A [`TestController`] holds the test-wide fatal error (first one wins), the
//! per-browser errors (first one per index wins) and the render ids issued for
//! each browser. Steps observe it cooperatively through a [`StopProbe`], which
//! can also be awaited to wake up as soon as a stop condition appears.

use crate::error::Error;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::watch;
use tracing::warn;

#[derive(Debug)]
struct ControllerState {
  fatal: OnceLock<Error>,
  index_errors: Mutex<BTreeMap<usize, Error>>,
  render_ids: Mutex<BTreeMap<usize, Vec<String>>>,
  aborted: AtomicBool,
  changes: watch::Sender<u64>,
}

/// Cancellation and bookkeeping state of one visual test.
#[derive(Debug, Clone)]
pub struct TestController {
  state: Arc<ControllerState>,
}

impl Default for TestController {
  fn default() -> Self {
    Self::new()
  }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl TestController {
  pub fn new() -> Self {
    let (changes, _) = watch::channel(0);
    Self {
      state: Arc::new(ControllerState {
        fatal: OnceLock::new(),
        index_errors: Mutex::new(BTreeMap::new()),
        render_ids: Mutex::new(BTreeMap::new()),
        aborted: AtomicBool::new(false),
        changes,
      }),
    }
  }

  fn notify(&self) {
    self.state.changes.send_modify(|version| *version += 1);
  }

  /// Record a test-wide fatal error. Returns false if one was already set.
  pub fn set_fatal_error(&self, error: Error) -> bool {
    let accepted = self.state.fatal.set(error.clone()).is_ok();
    if accepted {
      warn!(error = %error, "test stopped by fatal error");
      self.notify();
    }
    accepted
  }

  pub fn fatal_error(&self) -> Option<Error> {
    self.state.fatal.get().cloned()
  }

  /// Record an error scoped to one browser. The first error per index is kept.
  pub fn set_error(&self, index: usize, error: Error) -> bool {
    let accepted = {
      let mut errors = guard(&self.state.index_errors);
      if errors.contains_key(&index) {
        false
      } else {
        errors.insert(index, error);
        true
      }
    };
    if accepted {
      self.notify();
    }
    accepted
  }

  pub fn error(&self, index: usize) -> Option<Error> {
    guard(&self.state.index_errors).get(&index).cloned()
  }

  pub fn errors(&self) -> BTreeMap<usize, Error> {
    guard(&self.state.index_errors).clone()
  }

  pub fn add_render_id(&self, index: usize, render_id: impl Into<String>) {
    guard(&self.state.render_ids)
      .entry(index)
      .or_default()
      .push(render_id.into());
  }

  /// Render ids issued for one browser, in submission order.
  pub fn render_ids(&self, index: usize) -> Vec<String> {
    guard(&self.state.render_ids)
      .get(&index)
      .cloned()
      .unwrap_or_default()
  }

  /// Stop every pending step without recording an error.
  pub fn abort(&self) {
    if !self.state.aborted.swap(true, Ordering::SeqCst) {
      self.notify();
    }
  }

  pub fn is_aborted(&self) -> bool {
    self.state.aborted.load(Ordering::SeqCst)
  }

  pub fn should_stop_all(&self) -> bool {
    self.is_aborted() || self.state.fatal.get().is_some()
  }

  pub fn should_stop(&self, index: usize) -> bool {
    self.should_stop_all() || guard(&self.state.index_errors).contains_key(&index)
  }

  /// Probe for the whole test (`None`) or for one browser index.
  pub fn probe(&self, index: Option<usize>) -> StopProbe {
    StopProbe {
      controller: self.clone(),
      index,
      changes: self.state.changes.subscribe(),
    }
  }
}

/// Cooperative cancellation check bound to a test and optionally one browser.
#[derive(Debug)]
pub struct StopProbe {
  controller: TestController,
  index: Option<usize>,
  changes: watch::Receiver<u64>,
}

impl StopProbe {
  pub fn should_stop(&self) -> bool {
    match self.index {
      Some(index) => self.controller.should_stop(index),
      None => self.controller.should_stop_all(),
    }
  }

  /// Resolves once a stop condition holds.
  pub async fn stopped(&mut self) {
    loop {
      if self.should_stop() {
        return;
      }
      if self.changes.changed().await.is_err() {
        // The controller owns the sender, so this only happens on teardown.
        futures::future::pending::<()>().await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn fatal_error_is_set_once() {
    let controller = TestController::new();
    assert!(!controller.should_stop_all());
    assert!(controller.set_fatal_error(Error::Other("first".into())));
    assert!(!controller.set_fatal_error(Error::Other("second".into())));
    assert_eq!(controller.fatal_error().unwrap().to_string(), "first");
    assert!(controller.should_stop(3));
  }

  #[test]
  fn index_errors_only_stop_their_browser() {
    let controller = TestController::new();
    controller.set_error(1, Error::Other("a".into()));
    assert!(!controller.set_error(1, Error::Other("b".into())));
    assert!(controller.should_stop(1));
    assert!(!controller.should_stop(0));
    assert!(!controller.should_stop_all());
    assert_eq!(controller.error(1).unwrap().to_string(), "a");
  }

  #[test]
  fn render_ids_append_per_index() {
    let controller = TestController::new();
    controller.add_render_id(0, "r1");
    controller.add_render_id(0, "r2");
    controller.add_render_id(1, "r3");
    assert_eq!(controller.render_ids(0), vec!["r1", "r2"]);
    assert_eq!(controller.render_ids(2), Vec::<String>::new());
  }

  #[tokio::test(start_paused = true)]
  async fn probe_wakes_on_abort() {
    let controller = TestController::new();
    let mut probe = controller.probe(Some(0));
    let other = controller.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(10)).await;
      other.abort();
    });
    tokio::time::timeout(Duration::from_secs(1), probe.stopped())
      .await
      .unwrap();
    assert!(probe.should_stop());
  }
}
