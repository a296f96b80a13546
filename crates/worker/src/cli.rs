//! Command line of the worker binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use idh_infra::WorkerConfig;

#[derive(Parser, Debug)]
#[command(name = "idh-worker", about = "Industrial data analysis worker", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume analysis tasks until interrupted.
    Run(RunArgs),
    /// List (and optionally fail) jobs stuck in RUNNING.
    Sweep(SweepArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Postgres connection URL of the job store
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Stream the tasks are published to
    #[arg(long, env = "ANALYSIS_QUEUE", default_value = "analysis_queue")]
    pub queue: String,

    #[arg(long, env = "ANALYSIS_GROUP", default_value = "analysis-workers")]
    pub group: String,

    /// Consumer name within the group (auto-generated if not provided)
    #[arg(long, env = "WORKER_NAME")]
    pub consumer: Option<String>,

    /// Directory task file paths are relative to
    #[arg(long, env = "FILE_ROOT", default_value = "backend")]
    pub file_root: PathBuf,

    #[arg(long, env = "MODELS_DIR", default_value = "models")]
    pub models_dir: PathBuf,

    /// Broker block timeout between shutdown checks, in milliseconds
    #[arg(long, env = "POLL_MS", default_value_t = 1000)]
    pub poll_ms: u64,

    /// Dead-letter a requeued task after this many redeliveries
    #[arg(long, env = "MAX_REDELIVERIES")]
    pub max_redeliveries: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Minimum time since the job's last update
    #[arg(long, default_value_t = 3600)]
    pub older_than_secs: u64,

    /// Record the stale jobs as FAILED instead of only listing them
    #[arg(long)]
    pub mark_failed: bool,
}

impl RunArgs {
    pub fn into_config(self) -> WorkerConfig {
        WorkerConfig {
            redis_url: self.redis_url,
            queue: self.queue,
            group: self.group,
            consumer: self.consumer.unwrap_or_else(default_consumer_name),
            database_url: self.store.database_url,
            file_root: self.file_root,
            models_dir: self.models_dir,
            poll_interval: Duration::from_millis(self.poll_ms),
            max_redeliveries: self.max_redeliveries,
        }
    }
}

fn default_consumer_name() -> String {
    // The tail of a v7 id is random; the head is a timestamp.
    let id = uuid::Uuid::now_v7().simple().to_string();
    format!("worker-{}", &id[id.len() - 8..])
}
