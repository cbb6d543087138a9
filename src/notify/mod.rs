//! Best-effort side channels of an execution: progress tracker, log capture, definition
//! webhook and caller callback.
//!
//! Nothing in here fails the primary execution flow. Errors are logged and absorbed.

pub mod callback;
pub mod tracker;
pub mod webhook;

use crate::config::ClosureServiceConfig;
use crate::core::{CallerCallback, Closure, Result, shrink_to_max_size};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use callback::{CallbackResponse, InMemoryTaskCallbacks, TaskCallbackSink};
pub use tracker::{
    InMemoryRequestTracker, RequestTracker, SubStage, TaskStatus, TrackerError, update_with_retry,
    upsert_status,
};
pub use webhook::{HttpWebhookSender, WebhookSender};

/// Where sandbox output is read from.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch_logs(&self, resource_ref: &str) -> Result<Option<Vec<u8>>>;
}

/// Log source for deployments without log access.
pub struct NoLogs;

#[async_trait]
impl LogSource for NoLogs {
    async fn fetch_logs(&self, _resource_ref: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Link of the tracker record used when the instance does not name one.
pub fn default_tracker_link(closure_id: &str) -> String {
    format!("/request-status/{closure_id}")
}

pub struct NotificationPipeline {
    tracker: Arc<dyn RequestTracker>,
    webhooks: Arc<dyn WebhookSender>,
    callbacks: Arc<dyn TaskCallbackSink>,
    logs: Arc<dyn LogSource>,
    tracker_retries: u32,
    tracker_retry_delay: Duration,
}

impl NotificationPipeline {
    /// Tracker retry settings are taken from `config`.
    pub fn new(
        tracker: Arc<dyn RequestTracker>,
        webhooks: Arc<dyn WebhookSender>,
        callbacks: Arc<dyn TaskCallbackSink>,
        logs: Arc<dyn LogSource>,
        config: &ClosureServiceConfig,
    ) -> Self {
        Self {
            tracker,
            webhooks,
            callbacks,
            logs,
            tracker_retries: config.tracker_retries,
            tracker_retry_delay: config.tracker_retry_delay,
        }
    }

    pub fn tracker(&self) -> &Arc<dyn RequestTracker> {
        &self.tracker
    }

    pub fn tracker_link(closure: &Closure) -> String {
        closure
            .request_tracker_link
            .clone()
            .unwrap_or_else(|| default_tracker_link(&closure.id))
    }

    /// Reports the instance's coarse progress. Returns whether the tracker accepted it.
    pub async fn update_tracker(&self, closure: &Closure) -> bool {
        let status = TaskStatus::for_closure(closure);
        let link = Self::tracker_link(closure);
        update_with_retry(
            self.tracker.as_ref(),
            &link,
            &status,
            self.tracker_retries,
            self.tracker_retry_delay,
        )
        .await
    }

    /// Fetches the log of the first allocated resource, tail-truncated to `max_size`.
    pub async fn fetch_logs(&self, closure: &Closure, max_size: usize) -> Option<Vec<u8>> {
        let resource_ref = closure.first_resource_ref()?;
        match self.logs.fetch_logs(resource_ref).await {
            Ok(logs) => logs.map(|bytes| shrink_to_max_size(bytes, max_size)),
            Err(err) => {
                warn!(closure_id = %closure.id, resource = %resource_ref, error = %err, "failed to fetch closure logs");
                None
            }
        }
    }

    /// POSTs the full instance state to the definition's webhook.
    pub async fn call_webhook(&self, url: &str, closure: &Closure) {
        let body = match serde_json::to_value(closure) {
            Ok(body) => body,
            Err(err) => {
                warn!(closure_id = %closure.id, error = %err, "failed to encode closure for webhook");
                return;
            }
        };

        match self.webhooks.post_json(url, &body).await {
            Ok(()) => info!(closure_id = %closure.id, url = %url, "closure state sent to webhook"),
            Err(err) => warn!(closure_id = %closure.id, url = %url, error = %err, "unable to send closure state to webhook"),
        }
    }

    /// Tells the initiating caller that the instance settled.
    pub async fn notify_caller(&self, closure: &Closure) {
        let Some(callback) = closure.caller_callback.as_ref() else {
            return;
        };
        if callback.is_empty() {
            return;
        }

        match callback {
            CallerCallback::External { url } => {
                info!(closure_id = %closure.id, url = %url, "calling external caller callback");
                let body = match serde_json::to_value(closure) {
                    Ok(body) => body,
                    Err(err) => {
                        warn!(closure_id = %closure.id, error = %err, "failed to encode closure for caller callback");
                        return;
                    }
                };
                if let Err(err) = self.webhooks.post_json(url, &body).await {
                    warn!(closure_id = %closure.id, url = %url, error = %err, "failure calling caller callback");
                }
            }
            CallerCallback::Internal { task_link } => {
                let response = CallbackResponse::from_closure(closure);
                if let Err(err) = self.callbacks.patch_task(task_link, response).await {
                    warn!(closure_id = %closure.id, task = %task_link, error = %err, "notifying parent task failed");
                }
            }
        }
    }
}
