use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::artifacts::LoadError;

/// Result of one analysis run.
///
/// `summary` is the short line shown next to the job; `details` carries the
/// full numeric result (series for charts, thresholds, raw scores).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub summary: String,
    pub details: JsonValue,
}

impl AnalysisOutput {
    pub fn new(summary: impl Into<String>, details: JsonValue) -> Self {
        Self {
            summary: summary.into(),
            details,
        }
    }
}

/// Data-quality or artifact failure reported by a strategy.
///
/// Every variant is deterministic for a given input file, so the engine records
/// it on the job instead of retrying.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Artifact(#[from] LoadError),

    #[error("cannot read input {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("input does not contain all expected columns; missing: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("malformed value {value:?} for column '{column}' at line {line}")]
    Malformed {
        line: usize,
        column: String,
        value: String,
    },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("unreadable image: {0}")]
    Image(String),

    #[error("{what} expects {expected} values per sample, got {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("inference failed: {0}")]
    Inference(String),
}

impl AnalysisError {
    pub fn read(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::Read {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}
