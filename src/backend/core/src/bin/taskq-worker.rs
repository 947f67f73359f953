//! taskq worker: consumes envelopes and records outcomes.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use taskq_core::{
    config::Config,
    db::Database,
    jobs::{JobQueue, JobStore, JobWorker, RedisQueueBackend, TaskRegistry, WorkerConfig},
    observability, signal,
};

#[derive(Debug, Parser)]
#[command(name = "taskq-worker", version, about = "taskq job worker")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "TASKQ_CONFIG")]
    config: Option<String>,

    /// Override worker.concurrency
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("invalid configuration")?;
    if let Some(concurrency) = args.concurrency {
        config.worker.concurrency = concurrency;
        config.validate().context("invalid configuration")?;
    }
    observability::init_tracing("taskq-worker", &config.observability)?;
    let metrics_addr = config
        .worker_metrics_address()
        .parse::<std::net::SocketAddr>()
        .context("invalid worker metrics address")?;
    observability::serve_metrics(&config.observability, metrics_addr)?;

    let registry = TaskRegistry::with_builtins();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        concurrency = config.worker.concurrency,
        tasks = ?registry.task_names(),
        "Starting taskq worker"
    );

    let db = Database::connect(&config.database).await?;
    let store: Arc<dyn JobStore> = Arc::new(db.job_store());
    let backend = RedisQueueBackend::connect(&config.redis.url, config.redis.queue_name.clone()).await?;
    let queue = JobQueue::new(Arc::new(backend));

    let shutdown = signal::shutdown_token();
    let base = WorkerConfig::from(&config.worker);
    let handles: Vec<_> = (0..config.worker.concurrency)
        .map(|i| {
            let mut worker_config = base.clone();
            if config.worker.concurrency > 1 {
                worker_config.name = format!("{}-{}", base.name, i);
            }
            JobWorker::new(worker_config, store.clone(), queue.clone(), registry.clone()).start(&shutdown)
        })
        .collect();

    shutdown.cancelled().await;
    tracing::info!("Draining in-flight jobs");

    let mut processed = 0;
    for handle in handles {
        let stats = handle.stats().clone();
        if let Err(e) = handle.join().await {
            tracing::error!(error = %e, "Worker loop ended abnormally");
        }
        processed += stats.processed();
    }

    observability::shutdown();
    tracing::info!(processed, "Worker shutdown complete");
    Ok(())
}
