//! Worker configuration, read once at startup.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("queue name must not be empty")]
    EmptyQueue,
    #[error("consumer group must not be empty")]
    EmptyGroup,
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("file root {0} is not a directory")]
    FileRootNotADirectory(String),
}

/// Inputs of one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub queue: String,
    pub group: String,
    pub consumer: String,
    pub database_url: String,
    /// Directory `filePath` values are resolved against.
    pub file_root: PathBuf,
    /// Directory holding the artifact files.
    pub models_dir: PathBuf,
    /// Broker block timeout; the loop checks for shutdown in between.
    pub poll_interval: Duration,
    /// Requeues beyond this many redeliveries become dead letters.
    pub max_redeliveries: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            queue: "analysis_queue".to_string(),
            group: "analysis-workers".to_string(),
            consumer: "worker".to_string(),
            database_url: String::new(),
            file_root: PathBuf::from("backend"),
            models_dir: PathBuf::from("models"),
            poll_interval: Duration::from_millis(1000),
            max_redeliveries: None,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.trim().is_empty() {
            return Err(ConfigError::EmptyQueue);
        }
        if self.group.trim().is_empty() {
            return Err(ConfigError::EmptyGroup);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if !self.file_root.is_dir() {
            return Err(ConfigError::FileRootNotADirectory(
                self.file_root.display().to_string(),
            ));
        }
        Ok(())
    }
}
