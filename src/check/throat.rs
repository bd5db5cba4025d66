//! Bounded concurrency gates shared by every test of a client.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Gate admitting at most `size` holders at a time.
#[derive(Debug, Clone)]
pub struct Throat {
  name: &'static str,
  size: usize,
  permits: Arc<Semaphore>,
}

impl Throat {
  pub fn new(name: &'static str, size: usize) -> Self {
    let size = size.max(1);
    Self {
      name,
      size,
      permits: Arc::new(Semaphore::new(size)),
    }
  }

  pub fn size(&self) -> usize {
    self.size
  }

  /// Slots currently free.
  pub fn available(&self) -> usize {
    self.permits.available_permits()
  }

  /// Wait for a slot. The slot stays held until the ticket is released or dropped,
  /// which may happen in a different task than the one that acquired it.
  pub async fn acquire(&self) -> Result<GateTicket> {
    let permit = Arc::clone(&self.permits)
      .acquire_owned()
      .await
      .map_err(|_| Error::Other(format!("{} gate is closed", self.name)))?;
    debug!(gate = self.name, available = self.available(), "gate slot acquired");
    Ok(GateTicket {
      gate: self.name,
      permit: Some(permit),
    })
  }

  /// Run `job` while holding a slot for exactly its duration.
  pub async fn run<F, T>(&self, job: F) -> Result<T>
  where
    F: Future<Output = T>,
  {
    let ticket = self.acquire().await?;
    let out = job.await;
    ticket.release();
    Ok(out)
  }
}

/// A held gate slot.
#[derive(Debug)]
pub struct GateTicket {
  gate: &'static str,
  permit: Option<OwnedSemaphorePermit>,
}

impl GateTicket {
  /// Give the slot back.
  pub fn release(mut self) {
    if self.permit.take().is_some() {
      debug!(gate = self.gate, "gate slot released");
    }
  }
}
