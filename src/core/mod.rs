pub mod error;
pub mod logs;
pub mod types;

pub use error::{ClosureError, ErrorClass, Result};
pub use logs::{resource_id, should_update_logs, shrink_to_max_size};
pub use types::{
    AuthContext, CallerCallback, Closure, ClosureDefinition, ClosurePatch, CreateClosureRequest,
    EVENT_LOG_LINK_PROPERTY, FAILED_ON_DEPLOYMENT_PROPERTY, InputMap, PatchRequest,
    ResourceConstraints, StartRequest, TaskInfo, TaskStage,
};
