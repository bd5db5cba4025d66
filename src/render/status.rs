//! Waiting for renders to finish.

use super::grid::{RenderGrid, RenderStatus, RenderStatusResult};
use crate::check::controller::StopProbe;
use crate::error::PollError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Polls the grid until a render is RENDERED or ERROR.
#[derive(Clone)]
pub struct StatusPoller {
  grid: Arc<dyn RenderGrid>,
  interval: Duration,
  timeout: Duration,
}

impl StatusPoller {
  pub fn new(grid: Arc<dyn RenderGrid>, interval: Duration, timeout: Duration) -> Self {
    Self {
      grid,
      interval,
      timeout,
    }
  }

  /// Wait for `render_id`, giving up as soon as `stop` reports a stop condition.
  pub async fn wait(&self, render_id: &str, stop: &mut StopProbe) -> Result<RenderStatusResult, PollError> {
    let started = Instant::now();
    let ids = [render_id.to_string()];
    loop {
      if stop.should_stop() {
        return Err(cancelled(render_id));
      }

      let remaining = self.timeout.saturating_sub(started.elapsed());
      let statuses = tokio::time::timeout(remaining, self.grid.render_status(&ids))
        .await
        .map_err(|_| timed_out(render_id, started))?;
      let result = statuses
        .map_err(PollError::Transport)?
        .into_iter()
        .next()
        .unwrap_or_default();
      match result.status() {
        RenderStatus::Rendered => return Ok(result),
        RenderStatus::Error => {
          return Err(PollError::RenderFailed {
            render_id: render_id.to_string(),
            reason: result.error.unwrap_or_else(|| "unknown error".to_string()),
          })
        }
        status => debug!(render_id, ?status, "render not finished"),
      }

      let elapsed = started.elapsed();
      if elapsed >= self.timeout {
        return Err(timed_out(render_id, started));
      }
      let pause = self.interval.min(self.timeout - elapsed);
      tokio::select! {
        _ = tokio::time::sleep(pause) => {}
        _ = stop.stopped() => return Err(cancelled(render_id)),
      }
    }
  }
}

fn timed_out(render_id: &str, started: Instant) -> PollError {
  PollError::Timeout {
    render_id: render_id.to_string(),
    elapsed_ms: started.elapsed().as_millis() as u64,
  }
}

fn cancelled(render_id: &str) -> PollError {
  PollError::Cancelled {
    render_id: render_id.to_string(),
  }
}
