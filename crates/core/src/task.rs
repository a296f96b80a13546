//! Task descriptor carried in a queue message.
//!
//! Wire format (JSON object):
//!
//! ```json
//! { "analysisResultId": 12, "filePath": "uploads/run-3.csv", "analysisType": "RUL_PREDICTION" }
//! ```
//!
//! Only `analysisResultId` is required to decode. A missing `filePath` is
//! detected by the engine once the job row is known, so the failure can be
//! recorded on the job.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::id::JobId;

/// Decoded, transient task descriptor (never persisted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub job_id: JobId,
    /// Path relative to the configured file root; `None` when absent or empty.
    pub file_path: Option<String>,
    /// Advisory; the job record's `analysis_type` is authoritative.
    pub analysis_type: Option<String>,
}

/// A payload that cannot be turned into a [`TaskDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(String),

    #[error("malformed JSON payload: {0}")]
    Json(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("invalid message (missing 'analysisResultId')")]
    MissingJobId,

    #[error("invalid 'analysisResultId': {0}")]
    InvalidJobId(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    #[serde(default)]
    analysis_result_id: Option<JsonValue>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    analysis_type: Option<String>,
}

impl TaskDescriptor {
    pub fn new(job_id: JobId, file_path: impl Into<String>, analysis_type: impl Into<String>) -> Self {
        Self {
            job_id,
            file_path: Some(file_path.into()),
            analysis_type: Some(analysis_type.into()),
        }
    }

    /// Decode a raw message body.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload).map_err(|e| DecodeError::Utf8(e.to_string()))?;
        let value: JsonValue =
            serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }

        let raw: RawTask =
            serde_json::from_value(value).map_err(|e| DecodeError::Json(e.to_string()))?;

        let job_id = match raw.analysis_result_id {
            None | Some(JsonValue::Null) => return Err(DecodeError::MissingJobId),
            Some(id) => parse_job_id(&id)?,
        };

        Ok(Self {
            job_id,
            file_path: raw.file_path.filter(|p| !p.trim().is_empty()),
            analysis_type: raw.analysis_type.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Encode in the producer's wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut obj = serde_json::Map::new();
        obj.insert("analysisResultId".into(), JsonValue::from(self.job_id.get()));
        if let Some(path) = &self.file_path {
            obj.insert("filePath".into(), JsonValue::from(path.as_str()));
        }
        if let Some(kind) = &self.analysis_type {
            obj.insert("analysisType".into(), JsonValue::from(kind.as_str()));
        }
        JsonValue::Object(obj).to_string().into_bytes()
    }
}

fn parse_job_id(value: &JsonValue) -> Result<JobId, DecodeError> {
    let id = match value {
        JsonValue::Number(n) => n
            .as_i64()
            .ok_or_else(|| DecodeError::InvalidJobId(format!("{n} is not an integer")))?,
        // Some producers serialise Long ids as strings.
        JsonValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| DecodeError::InvalidJobId(format!("{s:?}: {e}")))?,
        other => return Err(DecodeError::InvalidJobId(format!("unexpected value {other}"))),
    };

    // A zero id never identifies a row.
    if id == 0 {
        return Err(DecodeError::MissingJobId);
    }
    Ok(JobId::new(id))
}
