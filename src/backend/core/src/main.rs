//! taskq server: HTTP gateway, status query and outbox relay.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use taskq_core::{
    api::{self, AppState},
    config::Config,
    db::Database,
    health::{HealthConfig, HealthService},
    jobs::{JobQueue, JobService, JobStore, OutboxRelay, RedisQueueBackend},
    observability, signal,
};

#[derive(Debug, Parser)]
#[command(name = "taskq-server", version, about = "taskq HTTP gateway and outbox relay")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "TASKQ_CONFIG")]
    config: Option<String>,

    /// Skip applying database migrations at startup
    #[arg(long)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("invalid configuration")?;
    observability::init_tracing("taskq-server", &config.observability)?;
    let metrics = observability::init_metrics(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting taskq server");

    let db = Database::connect(&config.database).await?;
    if !args.skip_migrations {
        db.migrate().await?;
        tracing::info!("Database migrations applied");
    }
    let store: Arc<dyn JobStore> = Arc::new(db.job_store());

    let backend = RedisQueueBackend::connect(&config.redis.url, config.redis.queue_name.clone()).await?;
    let queue = JobQueue::new(Arc::new(backend));

    let shutdown = CancellationToken::new();
    let relay = OutboxRelay::new(store.clone(), queue.clone(), config.outbox.clone())
        .spawn(shutdown.clone());

    let state = AppState {
        service: JobService::new(store.clone(), queue.clone())
            .with_eager_push_lease(config.outbox.claim_lease),
        health: HealthService::new(HealthConfig::default(), store, queue),
        metrics,
    };
    let app = api::build_router(state);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid listen address {}", config.bind_address()))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(signal::shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = relay.await {
        tracing::error!(error = %e, "Outbox relay task failed");
    }

    observability::shutdown();
    tracing::info!("Server shutdown complete");
    Ok(())
}
