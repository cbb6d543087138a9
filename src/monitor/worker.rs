use super::TimeoutMonitor;
use crate::core::{ClosureError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// Background loop running [`TimeoutMonitor::sweep`] on a fixed interval.
pub struct MaintenanceWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl MaintenanceWorker {
    /// Signals the worker to stop and waits for the current pass to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| ClosureError::Internal(format!("maintenance worker join: {err}")))?;
        }
        Ok(())
    }
}

impl Drop for MaintenanceWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

pub fn spawn_maintenance_worker(monitor: Arc<TimeoutMonitor>, interval: Duration) -> MaintenanceWorker {
    let interval = interval.max(Duration::from_millis(10));
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    break;
                }
                _ = sleep(interval) => {
                    let report = monitor.sweep().await;
                    debug!(inspected = report.inspected, cancelled = report.cancelled, "maintenance pass");
                }
            }
        }
    });

    MaintenanceWorker {
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}
