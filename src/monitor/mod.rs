//! Lease enforcement for running instances.

pub mod worker;

use crate::controller::ClosureController;
use crate::core::{ClosureError, PatchRequest, TaskStage};
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

pub use worker::{MaintenanceWorker, spawn_maintenance_worker};

/// What a single tick did with an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The instance could not be read.
    Missing,
    NotRunning,
    /// The definition holding the timeout could not be read.
    DefinitionMissing,
    WithinLease,
    Cancelled,
    /// The cancellation write was rejected.
    CancelFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub inspected: usize,
    pub cancelled: usize,
    pub purged: usize,
}

/// True once more than `timeout_seconds` elapsed since the lease was taken.
pub fn is_lease_expired(leased_at_millis: Option<i64>, timeout_seconds: u64, now_millis: i64) -> bool {
    let Some(leased_at) = leased_at_millis else {
        return false;
    };
    let timeout_millis = i64::try_from(timeout_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
    now_millis.saturating_sub(leased_at) > timeout_millis
}

#[derive(Clone)]
pub struct TimeoutMonitor {
    controller: ClosureController,
}

impl TimeoutMonitor {
    pub fn new(controller: ClosureController) -> Self {
        Self { controller }
    }

    pub async fn tick(&self, id: &str) -> TickOutcome {
        self.tick_at(id, Utc::now().timestamp_millis()).await
    }

    /// Cancels the instance when its lease ran out at `now_millis`, then releases its
    /// resources.
    pub async fn tick_at(&self, id: &str, now_millis: i64) -> TickOutcome {
        let closure = match self.controller.get(id).await {
            Ok(closure) => closure,
            Err(err) => {
                warn!(closure_id = %id, error = %err, "timeout check skipped, closure unreadable");
                return TickOutcome::Missing;
            }
        };
        if closure.state != TaskStage::Started {
            return TickOutcome::NotRunning;
        }

        let definition = match self.controller.definition_for(&closure).await {
            Ok(definition) => definition,
            Err(err) => {
                warn!(closure_id = %id, error = %err, "timeout check skipped, definition unreadable");
                return TickOutcome::DefinitionMissing;
            }
        };

        let timeout_seconds = definition.resources.timeout_seconds;
        if !is_lease_expired(closure.leased_at_millis, timeout_seconds, now_millis) {
            return TickOutcome::WithinLease;
        }

        let message = format!("Closure {id} timed out after {timeout_seconds} seconds");
        let cancelled = match self
            .controller
            .apply_request(id, PatchRequest::Cancellation { message })
            .await
        {
            Ok(cancelled) => cancelled,
            Err(ClosureError::NotFound(_)) => return TickOutcome::Missing,
            Err(err) => {
                warn!(closure_id = %id, error = %err, "failed to cancel timed out closure");
                return TickOutcome::CancelFailed;
            }
        };

        if cancelled.state != TaskStage::Cancelled {
            debug!(closure_id = %id, state = %cancelled.state, "closure settled before cancellation");
            return TickOutcome::NotRunning;
        }

        info!(closure_id = %id, timeout_seconds, "timed out closure cancelled");
        self.controller.clean_resources(&cancelled).await;
        TickOutcome::Cancelled
    }

    /// Ticks every stored instance concurrently and reaps expired records.
    pub async fn sweep(&self) -> SweepReport {
        let closures = match self.controller.store().list().await {
            Ok(closures) => closures,
            Err(err) => {
                warn!(error = %err, "timeout sweep could not list closures");
                return SweepReport::default();
            }
        };

        let now_millis = Utc::now().timestamp_millis();
        let outcomes = join_all(
            closures
                .iter()
                .filter(|closure| closure.state == TaskStage::Started)
                .map(|closure| self.tick_at(&closure.id, now_millis)),
        )
        .await;

        let purged = match self.controller.store().purge_expired(Utc::now()).await {
            Ok(purged) => purged,
            Err(err) => {
                warn!(error = %err, "failed to purge expired closures");
                0
            }
        };

        let report = SweepReport {
            inspected: outcomes.len(),
            cancelled: outcomes
                .iter()
                .filter(|outcome| **outcome == TickOutcome::Cancelled)
                .count(),
            purged,
        };
        if report.cancelled > 0 || report.purged > 0 {
            info!(cancelled = report.cancelled, purged = report.purged, "maintenance sweep done");
        }
        report
    }
}
