//! Runs cycles on a timer: one `Full` sync at startup, then a `Delta` sync
//! every interval. Transient failures are retried from `Fetching`.

use std::sync::Arc;

use chrono::Utc;
use roster_core::store::RecordStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  config::ScheduleConfig,
  engine::{CycleAborted, CycleReport, ReconciliationEngine, audit_cutoff},
  source::{RecordSource, SyncKind},
};

pub struct Scheduler<S, R> {
  engine: Arc<ReconciliationEngine<S, R>>,
  config: ScheduleConfig,
}

impl<S, R> Scheduler<S, R>
where
  S: RecordStore,
  R: RecordSource,
{
  pub fn new(engine: Arc<ReconciliationEngine<S, R>>, config: ScheduleConfig) -> Self {
    Self { engine, config }
  }

  /// Loop until `cancel` fires. Cycle failures are logged, never returned.
  pub async fn run(&self, cancel: &CancellationToken) {
    info!(
      interval_hours = self.config.interval_hours,
      run_on_startup = self.config.run_on_startup,
      "scheduler started"
    );

    if self.config.run_on_startup {
      let _ = self.run_with_retries(SyncKind::Full, cancel).await;
    }

    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = tokio::time::sleep(self.config.interval()) => {}
      }
      let _ = self.run_with_retries(SyncKind::Delta, cancel).await;
    }

    info!("scheduler stopped");
  }

  /// Run one cycle, retrying retryable aborts up to `retry_attempts` more
  /// times. A completed cycle is followed by an audit purge.
  pub async fn run_with_retries(
    &self,
    kind: SyncKind,
    cancel: &CancellationToken,
  ) -> Result<CycleReport, CycleAborted> {
    let mut attempt = 0;
    loop {
      match self.engine.run_cycle(kind, cancel).await {
        Ok(report) => {
          self.purge_audit().await;
          return Ok(report);
        }
        Err(aborted) if aborted.error.is_retryable() && attempt < self.config.retry_attempts => {
          attempt += 1;
          warn!(
            %kind,
            attempt,
            of = self.config.retry_attempts,
            error = %aborted.error,
            "retrying sync cycle"
          );
          tokio::select! {
            _ = cancel.cancelled() => return Err(aborted),
            _ = tokio::time::sleep(self.config.retry_backoff()) => {}
          }
        }
        Err(aborted) => return Err(aborted),
      }
    }
  }

  /// Purge failures are logged; the cycle they follow has already committed.
  async fn purge_audit(&self) {
    let cutoff = audit_cutoff(self.engine.config(), Utc::now());
    match self.engine.store().purge_audit_before(cutoff).await {
      Ok(removed) => debug!(removed, %cutoff, "purged sync audit"),
      Err(e) => warn!(error = %e, "failed to purge sync audit"),
    }
  }
}
