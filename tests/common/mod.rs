#![allow(dead_code)]

use async_trait::async_trait;
use closure_exec::core::{Closure, ClosureDefinition, ClosureError, Result, TaskStage};
use closure_exec::drivers::{ExecutionDriver, ExecutionReporter};
use closure_exec::notify::{
    InMemoryRequestTracker, InMemoryTaskCallbacks, LogSource, NotificationPipeline, WebhookSender,
};
use closure_exec::{
    ClosureController, ClosureServiceConfig, DriverRegistry, EchoDriver, InMemoryClosureStore,
    InMemoryDefinitionStore, DefinitionStore,
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

pub const HANGING_RUNTIME: &str = "hanging";
pub const REJECTING_RUNTIME: &str = "rejecting";

#[derive(Default)]
pub struct RecordingWebhooks {
    posts: Mutex<Vec<(String, Value)>>,
}

impl RecordingWebhooks {
    pub async fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().await.clone()
    }
}

#[async_trait]
impl WebhookSender for RecordingWebhooks {
    async fn post_json(&self, url: &str, body: &Value) -> Result<()> {
        self.posts.lock().await.push((url.to_string(), body.clone()));
        Ok(())
    }
}

/// Allocates a resource and then never reports again.
#[derive(Default)]
pub struct HangingDriver {
    reporters: Mutex<Vec<ExecutionReporter>>,
    auth_tokens: Mutex<Vec<String>>,
    cleaned: Mutex<Vec<String>>,
}

impl HangingDriver {
    pub async fn reporters(&self) -> Vec<ExecutionReporter> {
        self.reporters.lock().await.clone()
    }

    pub async fn auth_tokens(&self) -> Vec<String> {
        self.auth_tokens.lock().await.clone()
    }

    pub async fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().await.clone()
    }
}

#[async_trait]
impl ExecutionDriver for HangingDriver {
    fn runtime(&self) -> &str {
        HANGING_RUNTIME
    }

    async fn execute_closure(
        &self,
        closure: &Closure,
        _definition: &ClosureDefinition,
        auth_token: &str,
        reporter: ExecutionReporter,
    ) -> Result<()> {
        self.auth_tokens.lock().await.push(auth_token.to_string());
        reporter
            .resource_allocated(format!("/resources/containers/{}", closure.id))
            .await?;
        self.reporters.lock().await.push(reporter);
        Ok(())
    }

    async fn clean_closure(&self, closure: &Closure) -> Result<()> {
        self.cleaned
            .lock()
            .await
            .extend(closure.resource_refs.iter().cloned());
        Ok(())
    }
}

pub struct RejectingDriver;

#[async_trait]
impl ExecutionDriver for RejectingDriver {
    fn runtime(&self) -> &str {
        REJECTING_RUNTIME
    }

    async fn execute_closure(
        &self,
        _closure: &Closure,
        _definition: &ClosureDefinition,
        _auth_token: &str,
        _reporter: ExecutionReporter,
    ) -> Result<()> {
        Err(ClosureError::Driver("sandbox image missing".to_string()))
    }

    async fn clean_closure(&self, _closure: &Closure) -> Result<()> {
        Ok(())
    }
}

pub struct Harness {
    pub controller: ClosureController,
    pub store: Arc<InMemoryClosureStore>,
    pub definitions: Arc<InMemoryDefinitionStore>,
    pub tracker: Arc<InMemoryRequestTracker>,
    pub callbacks: Arc<InMemoryTaskCallbacks>,
    pub webhooks: Arc<RecordingWebhooks>,
    pub echo: Arc<EchoDriver>,
    pub hanging: Arc<HangingDriver>,
}

pub fn fast_config() -> ClosureServiceConfig {
    ClosureServiceConfig::new()
        .tracker_retry(3, Duration::from_millis(1))
        .final_log_fetch_delay(Duration::from_millis(20))
        .maintenance_interval(Duration::from_millis(20))
}

pub fn harness() -> Harness {
    harness_with(fast_config())
}

pub fn harness_with(config: ClosureServiceConfig) -> Harness {
    let store = Arc::new(InMemoryClosureStore::new());
    let definitions = Arc::new(InMemoryDefinitionStore::new());
    let tracker = Arc::new(InMemoryRequestTracker::new());
    let callbacks = Arc::new(InMemoryTaskCallbacks::new());
    let webhooks = Arc::new(RecordingWebhooks::default());
    let echo = Arc::new(EchoDriver::new().with_delay(Duration::from_millis(5)));
    let hanging = Arc::new(HangingDriver::default());

    let drivers = DriverRegistry::new()
        .with_driver(echo.clone())
        .with_driver(hanging.clone())
        .with_driver(Arc::new(RejectingDriver));

    let logs: Arc<dyn LogSource> = echo.clone();
    let pipeline = NotificationPipeline::new(
        tracker.clone(),
        webhooks.clone(),
        callbacks.clone(),
        logs,
        &config,
    );

    let controller = ClosureController::new(
        store.clone(),
        definitions.clone(),
        Arc::new(drivers),
        Arc::new(pipeline),
        config,
    );

    Harness {
        controller,
        store,
        definitions,
        tracker,
        callbacks,
        webhooks,
        echo,
        hanging,
    }
}

impl Harness {
    pub async fn define(&self, definition: ClosureDefinition) -> ClosureDefinition {
        self.definitions
            .put_definition(definition)
            .await
            .expect("store definition")
    }

    pub async fn closure(&self, id: &str) -> Closure {
        self.controller.get(id).await.expect("closure")
    }

    pub async fn wait_for_state(&self, id: &str, state: TaskStage) -> Closure {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let closure = self.closure(id).await;
            if closure.state == state {
                return closure;
            }
            if Instant::now() >= deadline {
                panic!("closure {id} stuck in {} waiting for {state}", closure.state);
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    /// Rewrites the stored record in place, bypassing the state machine.
    pub async fn rewrite(&self, id: &str, edit: impl FnOnce(&mut Closure)) -> Closure {
        use closure_exec::ClosureStore;
        let mut closure = self.closure(id).await;
        let version = closure.version;
        edit(&mut closure);
        self.store.update(closure, version).await.expect("rewrite closure")
    }
}

pub fn echo_definition(link: &str) -> ClosureDefinition {
    ClosureDefinition::new(link, "echo-sum", "echo")
        .with_source(r#"{"y":2}"#)
        .with_output("y")
        .with_timeout_seconds(30)
}

pub fn hanging_definition(link: &str, timeout_seconds: u64) -> ClosureDefinition {
    ClosureDefinition::new(link, "never-ends", HANGING_RUNTIME)
        .with_output("y")
        .with_timeout_seconds(timeout_seconds)
}

/// Polls `check` until it holds or two seconds have passed.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(5)).await;
    }
}
