use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use closure_exec::notify::{HttpWebhookSender, InMemoryRequestTracker, InMemoryTaskCallbacks};
use closure_exec::web::{ApiState, closure_router};
use closure_exec::{
    ClosureController, ClosureServiceConfig, DriverRegistry, EchoDriver, InMemoryClosureStore,
    InMemoryDefinitionStore, NotificationPipeline, TimeoutMonitor, spawn_maintenance_worker,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "closure-exec", version, about = "Closure execution service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API with in-memory stores and the echo runtime
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Milliseconds between two timeout sweeps
    #[arg(long, default_value_t = 5_000)]
    maintenance_interval_ms: u64,

    #[arg(long, default_value_t = 200 * 1024)]
    max_log_size_bytes: usize,

    #[arg(long, default_value_t = 10)]
    expiration_days: i64,

    /// Leave sandboxes in place after a run settles
    #[arg(long)]
    keep_on_completion: bool,

    #[arg(long, default_value_t = 3)]
    tracker_retries: u32,

    #[arg(long, default_value_t = 300)]
    tracker_retry_delay_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    webhook_timeout_ms: u64,

    #[arg(long, default_value_t = 3_000)]
    final_log_fetch_delay_ms: u64,

    #[arg(long, default_value_t = 3)]
    write_retries: u32,

    /// Simulated run time of the echo runtime
    #[arg(long, default_value_t = 10)]
    echo_delay_ms: u64,

    #[arg(long)]
    permissive_cors: bool,
}

impl ServeArgs {
    fn config(&self) -> ClosureServiceConfig {
        ClosureServiceConfig::new()
            .maintenance_interval(Duration::from_millis(self.maintenance_interval_ms))
            .max_log_size_bytes(self.max_log_size_bytes)
            .expiration_days(self.expiration_days)
            .keep_on_completion(self.keep_on_completion)
            .tracker_retry(
                self.tracker_retries,
                Duration::from_millis(self.tracker_retry_delay_ms),
            )
            .webhook_timeout(Duration::from_millis(self.webhook_timeout_ms))
            .final_log_fetch_delay(Duration::from_millis(self.final_log_fetch_delay_ms))
            .write_retries(self.write_retries)
            .normalized()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.config();

    let echo = Arc::new(EchoDriver::new().with_delay(Duration::from_millis(args.echo_delay_ms)));
    let drivers = Arc::new(DriverRegistry::new().with_driver(echo.clone()));
    let task_inbox = Arc::new(InMemoryTaskCallbacks::new());
    let webhooks = HttpWebhookSender::new(config.webhook_timeout)
        .context("building webhook client")?;

    let pipeline = NotificationPipeline::new(
        Arc::new(InMemoryRequestTracker::new()),
        Arc::new(webhooks),
        task_inbox.clone(),
        echo,
        &config,
    );

    let controller = ClosureController::new(
        Arc::new(InMemoryClosureStore::new()),
        Arc::new(InMemoryDefinitionStore::new()),
        drivers,
        Arc::new(pipeline),
        config.clone(),
    );

    let worker = spawn_maintenance_worker(
        Arc::new(TimeoutMonitor::new(controller.clone())),
        config.maintenance_interval,
    );

    let mut router = closure_router(ApiState::new(controller, task_inbox));
    if args.permissive_cors {
        router = router.layer(CorsLayer::permissive());
    }

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(addr = %args.bind, "closure execution service listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")?;

    worker.stop().await?;
    info!("closure execution service stopped");
    Ok(())
}
