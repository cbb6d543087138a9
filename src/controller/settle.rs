use super::ClosureController;
use crate::core::{Closure, ClosurePatch, TaskStage, should_update_logs};
use tokio::time::sleep;
use tracing::{debug, info, warn};

impl ClosureController {
    pub(super) async fn handle_state_changed(&self, closure: Closure, settles: bool) {
        self.capture_logs(&closure).await;
        if settles {
            self.settle(closure).await;
        }
    }

    /// Copies the sandbox log into the instance when it changed.
    pub async fn capture_logs(&self, closure: &Closure) {
        let max_size = self.config().max_log_size_bytes;
        let Some(fetched) = self.notifications().fetch_logs(closure, max_size).await else {
            return;
        };

        let latest = match self.get(&closure.id).await {
            Ok(latest) => latest,
            Err(err) => {
                warn!(closure_id = %closure.id, error = %err, "closure vanished before log capture");
                return;
            }
        };
        if !should_update_logs(latest.logs.as_deref(), Some(fetched.as_slice())) {
            return;
        }

        let mut patch = ClosurePatch::default().with_logs(fetched);
        patch.concurrency_token = latest.concurrency_token.clone();
        match self.apply_patch(&closure.id, patch).await {
            Ok(_) => debug!(closure_id = %closure.id, "closure logs captured"),
            Err(err) => warn!(closure_id = %closure.id, error = %err, "failed to store closure logs"),
        }
    }

    /// Terminal-state follow-up: delayed final log fetch and cleanup, then webhook and
    /// caller notification.
    pub(super) async fn settle(&self, closure: Closure) {
        let definition = match self.definition_for(&closure).await {
            Ok(definition) => definition,
            Err(err) => {
                warn!(closure_id = %closure.id, error = %err, "settling closure without its definition");
                self.notifications().notify_caller(&closure).await;
                return;
            }
        };

        let controller = self.clone();
        let settled = closure.clone();
        tokio::spawn(async move {
            sleep(controller.config().final_log_fetch_delay).await;
            controller.capture_logs(&settled).await;

            if controller.config().keep_on_completion || settled.state == TaskStage::Cancelled {
                return;
            }
            info!(closure_id = %settled.id, "cleaning closure resources");
            controller.clean_resources(&settled).await;
        });

        if let Some(url) = definition.webhook_url() {
            self.notifications().call_webhook(url, &closure).await;
        }
        self.notifications().notify_caller(&closure).await;
    }

    /// Best-effort release of the sandbox through the instance's driver.
    pub async fn clean_resources(&self, closure: &Closure) {
        let definition = match self.definition_for(closure).await {
            Ok(definition) => definition,
            Err(err) => {
                warn!(closure_id = %closure.id, error = %err, "cannot clean closure without its definition");
                return;
            }
        };
        let Some(driver) = self.drivers().get_driver(&definition.runtime) else {
            warn!(closure_id = %closure.id, runtime = %definition.runtime, "no driver to clean closure resources");
            return;
        };

        if let Err(err) = driver.clean_closure(closure).await {
            warn!(closure_id = %closure.id, error = %err, "failed to clean closure resources");
        }
    }
}
