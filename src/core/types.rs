use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Custom property set on an instance whose sandbox could not be provisioned.
pub const FAILED_ON_DEPLOYMENT_PROPERTY: &str = "failed_on_deployment";

/// Custom property carrying the event log link forwarded to the progress tracker.
pub const EVENT_LOG_LINK_PROPERTY: &str = "__eventLogLink";

pub type InputMap = BTreeMap<String, JsonValue>;

/// Lifecycle stage of one execution instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStage {
    Created,
    Started,
    Finished,
    Failed,
    Cancelled,
}

impl TaskStage {
    /// FINISHED, FAILED and CANCELLED. Only CANCELLED may be started again.
    pub fn is_done(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// Stages from which a fresh execution attempt may be started.
    pub fn is_startable(self) -> bool {
        matches!(self, Self::Created | Self::Cancelled)
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "CREATED",
            Self::Started => "STARTED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConstraints {
    pub timeout_seconds: u64,
    #[serde(default)]
    pub ram_mb: Option<u64>,
    #[serde(default)]
    pub cpu_shares: Option<u32>,
}

impl Default for ResourceConstraints {
    fn default() -> Self {
        Self {
            timeout_seconds: 180,
            ram_mb: None,
            cpu_shares: None,
        }
    }
}

/// Immutable template an execution instance is created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosureDefinition {
    pub link: String,
    pub name: String,
    pub runtime: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub inputs: InputMap,
    #[serde(default)]
    pub output_names: Vec<String>,
    #[serde(default)]
    pub resources: ResourceConstraints,
    #[serde(default)]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, String>,
}

impl ClosureDefinition {
    pub fn new(link: impl Into<String>, name: impl Into<String>, runtime: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            name: name.into(),
            runtime: runtime.into(),
            source: None,
            source_url: None,
            entrypoint: None,
            inputs: InputMap::new(),
            output_names: Vec::new(),
            resources: ResourceConstraints::default(),
            notify_url: None,
            custom_properties: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, default: JsonValue) -> Self {
        self.inputs.insert(name.into(), default);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.output_names.push(name.into());
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.resources.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_notify_url(mut self, url: impl Into<String>) -> Self {
        self.notify_url = Some(url.into());
        self
    }

    /// Webhook target, ignoring blank values.
    pub fn webhook_url(&self) -> Option<&str> {
        self.notify_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// How the initiating caller is told about completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CallerCallback {
    /// Patch a task record owned by the same platform.
    #[serde(rename_all = "camelCase")]
    Internal { task_link: String },
    /// POST the full instance state to a remote URL.
    External { url: String },
}

impl CallerCallback {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Internal { task_link } => task_link.trim().is_empty(),
            Self::External { url } => url.trim().is_empty(),
        }
    }
}

/// The execution instance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Closure {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub state: TaskStage,
    pub definition_ref: String,
    #[serde(default)]
    pub inputs: InputMap,
    #[serde(default)]
    pub outputs: InputMap,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub logs: Option<Vec<u8>>,
    #[serde(default)]
    pub resource_refs: BTreeSet<String>,
    #[serde(default)]
    pub leased_at_millis: Option<i64>,
    #[serde(default)]
    pub concurrency_token: Option<String>,
    #[serde(default)]
    pub caller_callback: Option<CallerCallback>,
    #[serde(default)]
    pub end_time_millis: i64,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub request_tracker_link: Option<String>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub version: u64,
}

impl Closure {
    /// Builds a fresh CREATED instance from its definition.
    ///
    /// Declared inputs seed the input map and are overridden by the request; declared
    /// outputs are pre-populated with nulls and fix the output key set.
    pub fn from_definition(
        id: impl Into<String>,
        definition: &ClosureDefinition,
        request: &CreateClosureRequest,
        now: DateTime<Utc>,
        expiration_days: i64,
    ) -> Self {
        let mut inputs = definition.inputs.clone();
        if let Some(overrides) = request.inputs.as_ref() {
            inputs.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let outputs = definition
            .output_names
            .iter()
            .map(|name| (name.clone(), JsonValue::Null))
            .collect();

        let mut custom_properties = definition.custom_properties.clone();
        if let Some(extra) = request.custom_properties.as_ref() {
            custom_properties.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Self {
            id: id.into(),
            name: Some(definition.name.clone()),
            state: TaskStage::Created,
            definition_ref: request.definition_ref.clone(),
            inputs,
            outputs,
            error_message: None,
            logs: None,
            resource_refs: BTreeSet::new(),
            leased_at_millis: None,
            concurrency_token: None,
            caller_callback: request.caller_callback.clone(),
            end_time_millis: 0,
            expires_at: now + Duration::days(expiration_days),
            request_tracker_link: request.request_tracker_link.clone(),
            custom_properties,
            version: 0,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn first_resource_ref(&self) -> Option<&str> {
        self.resource_refs.iter().next().map(String::as_str)
    }

    pub fn failed_on_deployment(&self) -> bool {
        self.custom_properties
            .get(FAILED_ON_DEPLOYMENT_PROPERTY)
            .is_some_and(|value| value == "true")
    }
}

/// Upstream task state wrapped into a patch by infrastructure callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub stage: TaskStage,
    #[serde(default)]
    pub failure: Option<String>,
}

/// Partial update of an instance. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosurePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<InputMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<InputMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_refs: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_callback: Option<CallerCallback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_info: Option<TaskInfo>,
}

impl ClosurePatch {
    pub fn with_state(mut self, state: TaskStage) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.concurrency_token = Some(token.into());
        self
    }

    pub fn with_outputs(mut self, outputs: InputMap) -> Self {
        self.outputs = Some(outputs);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_logs(mut self, logs: Vec<u8>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_resource_ref(mut self, resource: impl Into<String>) -> Self {
        self.resource_refs
            .get_or_insert_with(BTreeSet::new)
            .insert(resource.into());
        self
    }

    /// Decides whether the patch is a provisioning failure or a regular update.
    pub fn into_request(self) -> PatchRequest {
        let failure = match self.task_info.as_ref() {
            Some(info) if matches!(info.stage, TaskStage::Failed | TaskStage::Cancelled) => Some(
                info.failure
                    .clone()
                    .or_else(|| self.error_message.clone())
                    .unwrap_or_else(|| format!("provisioning {}", info.stage)),
            ),
            _ => None,
        };

        match failure {
            Some(message) => PatchRequest::ProvisioningFailure { message },
            None => PatchRequest::Update(self),
        }
    }
}

/// Incoming mutation after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchRequest {
    /// The sandbox never reached a runnable condition. Always ends in FAILED.
    ProvisioningFailure { message: String },
    /// Platform-issued cancellation of a running attempt (timeout).
    Cancellation { message: String },
    /// Regular update subject to state-machine validation.
    Update(ClosurePatch),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClosureRequest {
    pub definition_ref: String,
    #[serde(default)]
    pub inputs: Option<InputMap>,
    #[serde(default)]
    pub caller_callback: Option<CallerCallback>,
    #[serde(default)]
    pub request_tracker_link: Option<String>,
    #[serde(default)]
    pub custom_properties: Option<BTreeMap<String, String>>,
}

impl CreateClosureRequest {
    pub fn new(definition_ref: impl Into<String>) -> Self {
        Self {
            definition_ref: definition_ref.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.inputs
            .get_or_insert_with(InputMap::new)
            .insert(name.into(), value);
        self
    }

    pub fn with_callback(mut self, callback: CallerCallback) -> Self {
        self.caller_callback = Some(callback);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub inputs: Option<InputMap>,
    #[serde(default)]
    pub caller_callback: Option<CallerCallback>,
}

/// Security context of the request that triggered an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub token: Option<String>,
}

impl AuthContext {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn token(&self) -> &str {
        self.token.as_deref().unwrap_or("")
    }
}
