use crate::core::{Closure, EVENT_LOG_LINK_PROPERTY, TaskStage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, warn};

pub const TRACKER_PHASE: &str = "Closure Execution";

/// Coarse progress stage reported to the request tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubStage {
    Created,
    ClosureExecuting,
    Completed,
    Error,
}

impl SubStage {
    pub const ALL: [SubStage; 4] = [
        SubStage::Created,
        SubStage::ClosureExecuting,
        SubStage::Completed,
        SubStage::Error,
    ];

    pub fn from_stage(stage: TaskStage) -> Self {
        match stage {
            TaskStage::Created => Self::Created,
            TaskStage::Started => Self::ClosureExecuting,
            TaskStage::Finished => Self::Completed,
            TaskStage::Failed | TaskStage::Cancelled => Self::Error,
        }
    }

    pub fn ordinal(self) -> u32 {
        match self {
            Self::Created => 0,
            Self::ClosureExecuting => 1,
            Self::Completed => 2,
            Self::Error => 3,
        }
    }

    /// Percentage over the normal (non-error) stages, clamped to 100.
    pub fn progress(self) -> u8 {
        let last_normal = (Self::ALL.len() - 2) as u32;
        let progress = 100 * self.ordinal() / last_normal;
        progress.min(100) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub closure_id: String,
    pub phase: String,
    pub stage: TaskStage,
    pub sub_stage: SubStage,
    pub progress: u8,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub event_log_link: Option<String>,
    /// Instance version the status was derived from; older versions never overwrite newer ones.
    #[serde(default)]
    pub closure_version: u64,
}

impl TaskStatus {
    pub fn for_closure(closure: &Closure) -> Self {
        let sub_stage = SubStage::from_stage(closure.state);
        let failure = match closure.state {
            TaskStage::Failed | TaskStage::Cancelled => closure.error_message.clone(),
            _ => None,
        };

        Self {
            closure_id: closure.id.clone(),
            phase: TRACKER_PHASE.to_string(),
            stage: closure.state,
            sub_stage,
            progress: sub_stage.progress(),
            failure,
            event_log_link: closure.custom_properties.get(EVENT_LOG_LINK_PROPERTY).cloned(),
            closure_version: closure.version,
        }
    }

    /// Outcomes worth retrying when the tracker is unreachable.
    pub fn is_retry_worthy(&self) -> bool {
        matches!(self.stage, TaskStage::Finished | TaskStage::Failed)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("tracker record '{0}' not found")]
    NotFound(String),

    #[error("tracker unavailable: {0}")]
    Unavailable(String),
}

/// External progress-reporting record store.
#[async_trait]
pub trait RequestTracker: Send + Sync {
    async fn patch_status(&self, link: &str, status: &TaskStatus) -> Result<(), TrackerError>;

    /// Creates the record and returns the link it lives under.
    async fn create_status(&self, link: &str, status: &TaskStatus) -> Result<String, TrackerError>;

    async fn get_status(&self, link: &str) -> Result<Option<TaskStatus>, TrackerError>;
}

/// Patches the tracker record, creating it first when it does not exist yet.
pub async fn upsert_status(
    tracker: &dyn RequestTracker,
    link: &str,
    status: &TaskStatus,
) -> Result<(), TrackerError> {
    match tracker.patch_status(link, status).await {
        Err(TrackerError::NotFound(_)) => {
            let created = tracker.create_status(link, status).await?;
            tracker.patch_status(&created, status).await
        }
        other => other,
    }
}

/// Upserts the status, retrying FINISHED/FAILED outcomes up to `retries` extra times.
///
/// Never fails: exhausted or non-retried failures are logged and dropped.
pub async fn update_with_retry(
    tracker: &dyn RequestTracker,
    link: &str,
    status: &TaskStatus,
    retries: u32,
    delay: Duration,
) -> bool {
    let mut retries_left = retries;
    loop {
        match upsert_status(tracker, link, status).await {
            Ok(()) => return true,
            Err(err) if status.is_retry_worthy() && retries_left > 0 => {
                retries_left -= 1;
                debug!(
                    tracker = %link,
                    stage = %status.stage,
                    retries_left,
                    error = %err,
                    "retrying request tracker update"
                );
                sleep(delay).await;
            }
            Err(err) => {
                warn!(tracker = %link, stage = %status.stage, error = %err, "failed to update request tracker");
                return false;
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryRequestTracker {
    records: RwLock<HashMap<String, TaskStatus>>,
}

impl InMemoryRequestTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestTracker for InMemoryRequestTracker {
    async fn patch_status(&self, link: &str, status: &TaskStatus) -> Result<(), TrackerError> {
        let mut records = self.records.write().await;
        match records.get_mut(link) {
            Some(record) => {
                if status.closure_version >= record.closure_version {
                    *record = status.clone();
                }
                Ok(())
            }
            None => Err(TrackerError::NotFound(link.to_string())),
        }
    }

    async fn create_status(&self, link: &str, status: &TaskStatus) -> Result<String, TrackerError> {
        self.records
            .write()
            .await
            .insert(link.to_string(), status.clone());
        Ok(link.to_string())
    }

    async fn get_status(&self, link: &str) -> Result<Option<TaskStatus>, TrackerError> {
        Ok(self.records.read().await.get(link).cloned())
    }
}
