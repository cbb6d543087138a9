use super::{ExecutionDriver, ExecutionReporter};
use crate::core::{Closure, ClosureDefinition, ClosureError, InputMap, Result, resource_id};
use crate::notify::LogSource;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

pub const ECHO_RUNTIME: &str = "echo";

/// Source key that makes an echo run report FAILED with the given message.
pub const ECHO_FAIL_KEY: &str = "__fail";

/// In-process runtime that answers without a real sandbox.
///
/// The definition `source` is a JSON object whose entries become the outputs; declared
/// outputs missing from it are copied from same-named inputs. Each run gets a fake
/// container resource whose log is served through [`LogSource`].
#[derive(Clone)]
pub struct EchoDriver {
    runtime: String,
    delay: Duration,
    logs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    cleaned: Arc<RwLock<Vec<String>>>,
}

enum EchoOutcome {
    Finished(InputMap),
    Failed(String),
}

impl EchoDriver {
    pub fn new() -> Self {
        Self::with_runtime(ECHO_RUNTIME)
    }

    pub fn with_runtime(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            delay: Duration::from_millis(10),
            logs: Arc::new(RwLock::new(HashMap::new())),
            cleaned: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Simulated run time between hand-off and completion.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Resource refs passed to `clean_closure` so far.
    pub async fn cleaned_resources(&self) -> Vec<String> {
        self.cleaned.read().await.clone()
    }

    fn plan(closure: &Closure, definition: &ClosureDefinition) -> Result<EchoOutcome> {
        let template = match definition.source.as_deref().map(str::trim) {
            None | Some("") => serde_json::Map::new(),
            Some(source) => match serde_json::from_str::<JsonValue>(source) {
                Ok(JsonValue::Object(map)) => map,
                _ => {
                    return Err(ClosureError::Driver(format!(
                        "echo source of '{}' must be a JSON object",
                        definition.link
                    )));
                }
            },
        };

        if let Some(reason) = template.get(ECHO_FAIL_KEY) {
            let message = reason
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| reason.to_string());
            return Ok(EchoOutcome::Failed(message));
        }

        let mut outputs = InputMap::new();
        for name in closure.outputs.keys() {
            let value = template
                .get(name)
                .or_else(|| closure.inputs.get(name))
                .cloned()
                .unwrap_or(JsonValue::Null);
            outputs.insert(name.clone(), value);
        }
        Ok(EchoOutcome::Finished(outputs))
    }
}

impl Default for EchoDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionDriver for EchoDriver {
    fn runtime(&self) -> &str {
        &self.runtime
    }

    async fn execute_closure(
        &self,
        closure: &Closure,
        definition: &ClosureDefinition,
        _auth_token: &str,
        reporter: ExecutionReporter,
    ) -> Result<()> {
        let outcome = Self::plan(closure, definition)?;
        let container_id = Uuid::new_v4().to_string();
        let resource_ref = format!("/resources/containers/{container_id}");
        let inputs = serde_json::to_string(&closure.inputs)?;
        let logs = self.logs.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            if let Err(err) = reporter.resource_allocated(resource_ref.clone()).await {
                warn!(closure_id = %reporter.closure_id(), error = %err, "echo resource report rejected");
                return;
            }

            logs.write()
                .await
                .insert(container_id.clone(), format!("echo inputs={inputs}\n").into_bytes());

            sleep(delay).await;

            let report = match outcome {
                EchoOutcome::Finished(outputs) => {
                    let line = format!(
                        "echo outputs={}\n",
                        serde_json::to_string(&outputs).unwrap_or_default()
                    );
                    if let Some(buffer) = logs.write().await.get_mut(&container_id) {
                        buffer.extend_from_slice(line.as_bytes());
                    }
                    reporter.finished(outputs).await
                }
                EchoOutcome::Failed(message) => {
                    if let Some(buffer) = logs.write().await.get_mut(&container_id) {
                        buffer.extend_from_slice(format!("echo failed: {message}\n").as_bytes());
                    }
                    reporter.failed(message).await
                }
            };

            match report {
                Ok(closure) => debug!(closure_id = %closure.id, state = %closure.state, "echo run reported"),
                Err(err) => warn!(closure_id = %reporter.closure_id(), error = %err, "echo completion rejected"),
            }
        });

        Ok(())
    }

    async fn clean_closure(&self, closure: &Closure) -> Result<()> {
        let mut logs = self.logs.write().await;
        let mut cleaned = self.cleaned.write().await;
        for resource_ref in &closure.resource_refs {
            logs.remove(resource_id(resource_ref));
            cleaned.push(resource_ref.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl LogSource for EchoDriver {
    async fn fetch_logs(&self, resource_ref: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.logs.read().await.get(resource_id(resource_ref)).cloned())
    }
}
