use super::{EchoDriver, ExecutionDriver};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Lookup table from runtime identifier to driver.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn ExecutionDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a driver under its runtime id, replacing any previous one.
    pub fn register(&mut self, driver: Arc<dyn ExecutionDriver>) {
        let runtime = driver.runtime().to_string();
        info!(runtime = %runtime, "registered execution driver");
        self.drivers.insert(runtime, driver);
    }

    pub fn with_driver(mut self, driver: Arc<dyn ExecutionDriver>) -> Self {
        self.register(driver);
        self
    }

    /// Registry with every built-in driver.
    pub fn with_default_drivers() -> Self {
        Self::new().with_driver(Arc::new(EchoDriver::new()))
    }

    pub fn get_driver(&self, runtime: &str) -> Option<Arc<dyn ExecutionDriver>> {
        self.drivers.get(runtime).cloned()
    }
}
