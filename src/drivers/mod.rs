//! Runtime-specific executors and their lookup table.
//!
//! A driver provisions a sandbox, runs the closure code and reports progress back as
//! patches of the instance through an [`ExecutionReporter`]. Success is observed through
//! those patches; the `execute_closure` result only tells whether the run was accepted.

pub mod echo;
pub mod registry;

use crate::core::{Closure, ClosureDefinition, ClosurePatch, InputMap, Result, TaskStage};
use async_trait::async_trait;
use std::sync::Arc;

pub use echo::EchoDriver;
pub use registry::DriverRegistry;

#[async_trait]
pub trait ExecutionDriver: Send + Sync {
    /// Runtime identifier this driver serves (matches `ClosureDefinition::runtime`).
    fn runtime(&self) -> &str;

    /// Hands the instance over to the runtime.
    ///
    /// Must not wait for the script to finish. An `Err` means the run was rejected and the
    /// instance is moved to FAILED with the error message.
    async fn execute_closure(
        &self,
        closure: &Closure,
        definition: &ClosureDefinition,
        auth_token: &str,
        reporter: ExecutionReporter,
    ) -> Result<()>;

    /// Releases whatever `closure.resource_refs` points at. Idempotent, best-effort.
    async fn clean_closure(&self, closure: &Closure) -> Result<()>;
}

/// Target of the patches a driver reports.
#[async_trait]
pub trait ClosurePatchSink: Send + Sync {
    async fn apply_patch(&self, closure_id: &str, patch: ClosurePatch) -> Result<Closure>;
}

/// Handle given to a driver for reporting on one execution attempt.
///
/// Every report carries the concurrency token of the attempt it was issued for, so
/// reports of a superseded attempt are rejected by the controller.
#[derive(Clone)]
pub struct ExecutionReporter {
    closure_id: String,
    token: Option<String>,
    sink: Arc<dyn ClosurePatchSink>,
}

impl ExecutionReporter {
    pub fn new(
        closure_id: impl Into<String>,
        token: Option<String>,
        sink: Arc<dyn ClosurePatchSink>,
    ) -> Self {
        Self {
            closure_id: closure_id.into(),
            token,
            sink,
        }
    }

    pub fn closure_id(&self) -> &str {
        &self.closure_id
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub async fn report(&self, mut patch: ClosurePatch) -> Result<Closure> {
        if patch.concurrency_token.is_none() {
            patch.concurrency_token = self.token.clone();
        }
        self.sink.apply_patch(&self.closure_id, patch).await
    }

    pub async fn resource_allocated(&self, resource_ref: impl Into<String>) -> Result<Closure> {
        self.report(ClosurePatch::default().with_resource_ref(resource_ref))
            .await
    }

    pub async fn finished(&self, outputs: InputMap) -> Result<Closure> {
        self.report(
            ClosurePatch::default()
                .with_state(TaskStage::Finished)
                .with_outputs(outputs),
        )
        .await
    }

    pub async fn failed(&self, message: impl Into<String>) -> Result<Closure> {
        self.report(
            ClosurePatch::default()
                .with_state(TaskStage::Failed)
                .with_error(message),
        )
        .await
    }
}
