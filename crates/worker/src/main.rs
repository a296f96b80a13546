//! Analysis worker.
//!
//! Usage:
//!     idh-worker run --database-url postgres://... --file-root ./backend
//!     idh-worker sweep --database-url postgres://... --older-than-secs 3600 --mark-failed

mod cli;

use std::sync::{mpsc, Arc};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use idh_analysis::builtin;
use idh_infra::broker::{RedisStreamsConfig, RedisStreamsQueue};
use idh_infra::jobs::PostgresJobStore;
use idh_infra::sweep::sweep_stale;
use idh_infra::{JobEngine, JobStore, QueueConsumer};

use cli::{Cli, Command, RunArgs, SweepArgs};

fn main() -> anyhow::Result<()> {
    idh_observability::init();

    match Cli::parse().command {
        Command::Run(args) => run(args),
        Command::Sweep(args) => sweep(args),
    }
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = args.into_config();
    config.validate().context("invalid worker configuration")?;

    info!(
        queue = %config.queue,
        group = %config.group,
        consumer = %config.consumer,
        file_root = %config.file_root.display(),
        models_dir = %config.models_dir.display(),
        "starting analysis worker"
    );

    let store = PostgresJobStore::connect(&config.database_url).context("job store setup failed")?;
    store.ping().context("job store unreachable")?;

    // A failed kind is loaded again by its next job; if that fails too, the
    // job is recorded as an analysis error.
    let cache = Arc::new(builtin::artifact_cache(&config.models_dir));
    for (kind, err) in cache.prewarm() {
        warn!(kind = %kind, error = %err, "artifacts unavailable at startup");
    }
    let registry = Arc::new(builtin::registry(cache));

    let queue = RedisStreamsQueue::connect(RedisStreamsConfig {
        redis_url: config.redis_url.clone(),
        stream_key: config.queue.clone(),
        group: config.group.clone(),
        consumer: config.consumer.clone(),
    })
    .context("broker connection failed")?;

    let engine = JobEngine::new(store, registry, config.file_root.clone());
    let consumer = QueueConsumer::new(queue, engine, config.poll_interval)
        .with_max_redeliveries(config.max_redeliveries);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("failed to install signal handler")?;

    match consumer.run(&shutdown_rx) {
        Ok(stats) => {
            info!(?stats, "worker stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "worker stopped on broker failure");
            Err(e).context("consumer loop aborted")
        }
    }
}

fn sweep(args: SweepArgs) -> anyhow::Result<()> {
    let store = PostgresJobStore::connect(&args.store.database_url).context("job store setup failed")?;
    store.ping().context("job store unreachable")?;

    let report = sweep_stale(&store, Duration::from_secs(args.older_than_secs), args.mark_failed)
        .context("sweep failed")?;

    for job in &report.stale {
        info!(
            job_id = %job.id,
            analysis_type = %job.analysis_type,
            updated_at = %job.updated_at.to_rfc3339(),
            "stale running job"
        );
    }
    info!(
        stale = report.stale.len(),
        marked_failed = report.marked_failed.len(),
        "sweep finished"
    );
    Ok(())
}
