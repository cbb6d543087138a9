use crate::core::{Closure, InputMap, Result, TaskStage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Completion payload delivered to an internal caller task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub closure_id: String,
    pub stage: TaskStage,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub outputs: InputMap,
}

impl CallbackResponse {
    /// FINISHED instances yield a finished response, everything else a failed one.
    pub fn from_closure(closure: &Closure) -> Self {
        if closure.state == TaskStage::Finished {
            Self {
                closure_id: closure.id.clone(),
                stage: TaskStage::Finished,
                failure: None,
                outputs: closure.outputs.clone(),
            }
        } else {
            Self {
                closure_id: closure.id.clone(),
                stage: TaskStage::Failed,
                failure: Some(
                    closure
                        .error_message
                        .clone()
                        .unwrap_or_else(|| format!("closure ended in {}", closure.state)),
                ),
                outputs: InputMap::new(),
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.stage == TaskStage::Finished
    }
}

/// Delivery of completion results to tasks owned by the same platform.
#[async_trait]
pub trait TaskCallbackSink: Send + Sync {
    async fn patch_task(&self, task_link: &str, response: CallbackResponse) -> Result<()>;
}

/// Keeps every delivered response per task link.
#[derive(Default)]
pub struct InMemoryTaskCallbacks {
    inbox: RwLock<HashMap<String, Vec<CallbackResponse>>>,
}

impl InMemoryTaskCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn responses(&self, task_link: &str) -> Vec<CallbackResponse> {
        self.inbox
            .read()
            .await
            .get(task_link)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskCallbackSink for InMemoryTaskCallbacks {
    async fn patch_task(&self, task_link: &str, response: CallbackResponse) -> Result<()> {
        self.inbox
            .write()
            .await
            .entry(task_link.to_string())
            .or_default()
            .push(response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ClosureDefinition, CreateClosureRequest};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn cancelled_instances_produce_failed_responses() {
        let definition = ClosureDefinition::new("/definitions/d", "d", "echo").with_output("y");
        let mut closure = Closure::from_definition(
            "c1",
            &definition,
            &CreateClosureRequest::new("/definitions/d"),
            Utc::now(),
            10,
        );
        closure.state = TaskStage::Cancelled;
        closure.error_message = Some("timed out".to_string());

        let response = CallbackResponse::from_closure(&closure);
        assert_eq!(response.stage, TaskStage::Failed);
        assert_eq!(response.failure.as_deref(), Some("timed out"));

        closure.state = TaskStage::Finished;
        closure.outputs.insert("y".to_string(), json!(2));
        let response = CallbackResponse::from_closure(&closure);
        assert!(response.is_finished());
        assert_eq!(response.outputs.get("y"), Some(&json!(2)));
    }
}
