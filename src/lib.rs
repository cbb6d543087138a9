// ============================================================================
// Closure execution core
// ============================================================================

pub mod config;
pub mod controller;
pub mod core;
pub mod drivers;
pub mod monitor;
pub mod notify;
pub mod store;
pub mod web;

pub use config::ClosureServiceConfig;
pub use controller::ClosureController;
pub use core::{
    AuthContext, CallerCallback, Closure, ClosureDefinition, ClosureError, ClosurePatch,
    CreateClosureRequest, ErrorClass, InputMap, PatchRequest, Result, StartRequest, TaskStage,
};
pub use drivers::{DriverRegistry, EchoDriver, ExecutionDriver, ExecutionReporter};
pub use monitor::{MaintenanceWorker, TickOutcome, TimeoutMonitor, spawn_maintenance_worker};
pub use notify::NotificationPipeline;
pub use store::{ClosureStore, DefinitionStore, InMemoryClosureStore, InMemoryDefinitionStore};
