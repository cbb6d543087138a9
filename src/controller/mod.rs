//! Lifecycle state machine of execution instances.
//!
//! Every mutation is a read-validate-write cycle against the store's version counter.
//! Losing an optimistic race re-reads and re-validates, up to `write_retries` attempts.
//! Side channels (tracker, logs, webhooks, cleanup) run on spawned tasks and never hold
//! up the caller.

mod settle;
pub mod validation;

use crate::config::ClosureServiceConfig;
use crate::core::{
    AuthContext, Closure, ClosureDefinition, ClosureError, ClosurePatch, CreateClosureRequest,
    FAILED_ON_DEPLOYMENT_PROPERTY, InputMap, PatchRequest, Result, StartRequest, TaskStage,
};
use crate::drivers::{ClosurePatchSink, DriverRegistry, ExecutionDriver, ExecutionReporter};
use crate::notify::NotificationPipeline;
use crate::store::{ClosureStore, DefinitionStore};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use validation::{is_log_only_update, merge_logs_only, merge_patch, verify_patch};

struct ControllerInner {
    store: Arc<dyn ClosureStore>,
    definitions: Arc<dyn DefinitionStore>,
    drivers: Arc<DriverRegistry>,
    notifications: Arc<NotificationPipeline>,
    config: ClosureServiceConfig,
}

#[derive(Clone)]
pub struct ClosureController {
    inner: Arc<ControllerInner>,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl ClosureController {
    pub fn new(
        store: Arc<dyn ClosureStore>,
        definitions: Arc<dyn DefinitionStore>,
        drivers: Arc<DriverRegistry>,
        notifications: Arc<NotificationPipeline>,
        config: ClosureServiceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                store,
                definitions,
                drivers,
                notifications,
                config: config.normalized(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn ClosureStore> {
        &self.inner.store
    }

    pub fn definitions(&self) -> &Arc<dyn DefinitionStore> {
        &self.inner.definitions
    }

    pub fn drivers(&self) -> &Arc<DriverRegistry> {
        &self.inner.drivers
    }

    pub fn notifications(&self) -> &Arc<NotificationPipeline> {
        &self.inner.notifications
    }

    pub fn config(&self) -> &ClosureServiceConfig {
        &self.inner.config
    }

    pub async fn get(&self, id: &str) -> Result<Closure> {
        self.inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| ClosureError::NotFound(id.to_string()))
    }

    /// Resolves the definition an instance was created from.
    pub async fn definition_for(&self, closure: &Closure) -> Result<ClosureDefinition> {
        self.resolve_definition(&closure.definition_ref).await
    }

    async fn resolve_definition(&self, link: &str) -> Result<ClosureDefinition> {
        if link.trim().is_empty() {
            return Err(ClosureError::Validation(
                "Closure definition link is required".to_string(),
            ));
        }
        self.inner
            .definitions
            .get_definition(link)
            .await?
            .ok_or_else(|| ClosureError::DefinitionNotFound(link.to_string()))
    }

    fn driver_for(&self, definition: &ClosureDefinition) -> Result<Arc<dyn ExecutionDriver>> {
        self.inner
            .drivers
            .get_driver(&definition.runtime)
            .ok_or_else(|| ClosureError::NoExecutionDriver(definition.runtime.clone()))
    }

    /// Creates a CREATED instance from a stored definition.
    pub async fn create(&self, request: CreateClosureRequest) -> Result<Closure> {
        let definition = self.resolve_definition(&request.definition_ref).await?;
        let closure = Closure::from_definition(
            new_id(),
            &definition,
            &request,
            Utc::now(),
            self.inner.config.expiration_days,
        );

        let stored = self.inner.store.insert(closure).await?;
        info!(closure_id = %stored.id, definition = %stored.definition_ref, "closure created");
        self.spawn_tracker_update(stored.clone());
        Ok(stored)
    }

    /// Leases the instance to a fresh execution attempt and hands it to its driver.
    ///
    /// The new attempt is persisted before the driver sees it, so the driver's reports
    /// always find the token they carry.
    pub async fn start(&self, id: &str, request: StartRequest, auth: &AuthContext) -> Result<Closure> {
        let current = self.get(id).await?;
        let definition = self.definition_for(&current).await?;
        ensure_startable(&current)?;
        let driver = self.driver_for(&definition)?;

        let token = new_id();
        let (_, started) = self
            .mutate(id, |current| {
                ensure_startable(current)?;

                let mut next = current.clone();
                if let Some(inputs) = request.inputs.as_ref() {
                    next.inputs
                        .extend(inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                if let Some(callback) = request.caller_callback.as_ref() {
                    next.caller_callback = Some(callback.clone());
                }
                next.concurrency_token = Some(token.clone());
                next.state = TaskStage::Started;
                next.leased_at_millis = Some(now_millis());
                next.end_time_millis = 0;
                next.error_message = None;
                Ok(Some(next))
            })
            .await?;

        info!(
            closure_id = %started.id,
            runtime = %definition.runtime,
            restarted = current.state == TaskStage::Cancelled,
            "closure execution started"
        );

        self.spawn_tracker_update(started.clone());
        self.spawn_execution(
            started.clone(),
            definition,
            driver,
            auth.token().to_string(),
        );
        Ok(started)
    }

    /// `create` followed by `start` with no extra inputs.
    pub async fn create_and_start(
        &self,
        request: CreateClosureRequest,
        auth: &AuthContext,
    ) -> Result<Closure> {
        let created = self.create(request).await?;
        self.start(&created.id, StartRequest::default(), auth).await
    }

    /// Merges extra inputs into the instance without touching its state.
    pub async fn append_inputs(&self, id: &str, inputs: InputMap) -> Result<Closure> {
        let (_, updated) = self
            .mutate(id, |current| {
                let mut next = current.clone();
                next.inputs
                    .extend(inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(Some(next))
            })
            .await?;
        debug!(closure_id = %id, inputs = inputs.len(), "closure inputs appended");
        Ok(updated)
    }

    /// Classifies and applies a patch.
    pub async fn apply_patch(&self, id: &str, patch: ClosurePatch) -> Result<Closure> {
        self.apply_request(id, patch.into_request()).await
    }

    pub async fn apply_request(&self, id: &str, request: PatchRequest) -> Result<Closure> {
        match request {
            PatchRequest::ProvisioningFailure { message } => {
                self.fail_provisioning(id, message).await
            }
            PatchRequest::Cancellation { message } => self.cancel(id, message).await,
            PatchRequest::Update(patch) => self.update(id, patch).await,
        }
    }

    /// Forces FAILED regardless of the current state and notifies immediately.
    async fn fail_provisioning(&self, id: &str, message: String) -> Result<Closure> {
        let (_, failed) = self
            .mutate(id, |current| {
                let mut next = current.clone();
                next.state = TaskStage::Failed;
                next.error_message = Some(message.clone());
                next.custom_properties
                    .insert(FAILED_ON_DEPLOYMENT_PROPERTY.to_string(), "true".to_string());
                if !current.state.is_done() {
                    next.end_time_millis = now_millis();
                }
                Ok(Some(next))
            })
            .await?;

        warn!(closure_id = %id, error = %message, "closure failed during provisioning");

        let controller = self.clone();
        let notified = failed.clone();
        tokio::spawn(async move {
            let pipeline = controller.notifications();
            pipeline.update_tracker(&notified).await;
            pipeline.notify_caller(&notified).await;
        });
        Ok(failed)
    }

    /// Moves a STARTED instance to CANCELLED. Any other state is left alone.
    async fn cancel(&self, id: &str, message: String) -> Result<Closure> {
        let (before, after) = self
            .mutate(id, |current| {
                if current.state != TaskStage::Started {
                    return Ok(None);
                }
                let mut next = current.clone();
                next.state = TaskStage::Cancelled;
                next.error_message = Some(message.clone());
                next.end_time_millis = now_millis();
                Ok(Some(next))
            })
            .await?;

        if before.version != after.version {
            info!(closure_id = %id, reason = %message, "closure cancelled");
            self.after_update(&before, &after);
        }
        Ok(after)
    }

    async fn update(&self, id: &str, patch: ClosurePatch) -> Result<Closure> {
        let max_log_size = self.inner.config.max_log_size_bytes;
        let (before, after) = self
            .mutate(id, |current| {
                if is_log_only_update(current, &patch) {
                    return Ok(merge_logs_only(current, &patch, max_log_size));
                }
                verify_patch(current, &patch)?;
                Ok(Some(merge_patch(
                    current,
                    patch.clone(),
                    now_millis(),
                    max_log_size,
                )))
            })
            .await?;

        if before.version != after.version {
            debug!(closure_id = %id, state = %after.state, version = after.version, "closure updated");
            self.after_update(&before, &after);
        }
        Ok(after)
    }

    /// Read-validate-write loop over the store's version counter.
    ///
    /// `apply` returns `None` when there is nothing to write; the current record is then
    /// returned as both halves of the pair.
    async fn mutate<F>(&self, id: &str, mut apply: F) -> Result<(Closure, Closure)>
    where
        F: FnMut(&Closure) -> Result<Option<Closure>> + Send,
    {
        let attempts = self.inner.config.write_retries.max(1);
        let mut last_conflict = None;

        for attempt in 1..=attempts {
            let current = self.get(id).await?;
            let Some(next) = apply(&current)? else {
                return Ok((current.clone(), current));
            };

            match self.inner.store.update(next, current.version).await {
                Ok(written) => return Ok((current, written)),
                Err(err) if err.is_version_conflict() => {
                    debug!(closure_id = %id, attempt, error = %err, "optimistic write lost, retrying");
                    last_conflict = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_conflict.unwrap_or_else(|| {
            ClosureError::Internal(format!("no write attempt made for closure '{id}'"))
        }))
    }

    /// Background work that follows every persisted change.
    fn after_update(&self, before: &Closure, after: &Closure) {
        self.spawn_tracker_update(after.clone());

        if before.state != after.state {
            let settles = !before.state.is_done() && after.state.is_done();
            let controller = self.clone();
            let changed = after.clone();
            tokio::spawn(async move {
                controller.handle_state_changed(changed, settles).await;
            });
        }
    }

    fn spawn_tracker_update(&self, closure: Closure) {
        let pipeline = self.inner.notifications.clone();
        tokio::spawn(async move {
            pipeline.update_tracker(&closure).await;
        });
    }

    fn spawn_execution(
        &self,
        closure: Closure,
        definition: ClosureDefinition,
        driver: Arc<dyn ExecutionDriver>,
        auth_token: String,
    ) {
        let controller = self.clone();
        tokio::spawn(async move {
            let reporter = ExecutionReporter::new(
                closure.id.clone(),
                closure.concurrency_token.clone(),
                Arc::new(controller.clone()),
            );

            let Err(err) = driver
                .execute_closure(&closure, &definition, &auth_token, reporter)
                .await
            else {
                return;
            };

            let message = match err {
                ClosureError::Driver(message) => message,
                other => other.to_string(),
            };
            warn!(closure_id = %closure.id, error = %message, "closure execution rejected by driver");

            let mut patch = ClosurePatch::default()
                .with_state(TaskStage::Failed)
                .with_error(message);
            patch.concurrency_token = closure.concurrency_token.clone();
            if let Err(patch_err) = controller.apply_patch(&closure.id, patch).await {
                warn!(closure_id = %closure.id, error = %patch_err, "failed to record driver rejection");
            }
        });
    }
}

fn ensure_startable(closure: &Closure) -> Result<()> {
    if closure.state.is_startable() {
        return Ok(());
    }
    match closure.state {
        TaskStage::Started => Err(ClosureError::Conflict(format!(
            "Closure is already executing: {}",
            closure.id
        ))),
        _ => Err(ClosureError::Conflict(format!(
            "Closure has already been executed: {}",
            closure.id
        ))),
    }
}

#[async_trait]
impl ClosurePatchSink for ClosureController {
    async fn apply_patch(&self, closure_id: &str, patch: ClosurePatch) -> Result<Closure> {
        ClosureController::apply_patch(self, closure_id, patch).await
    }
}
