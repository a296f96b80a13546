use std::path::Path;
use std::sync::Arc;

use ndarray::Array2;
use serde_json::json;
use tracing::debug;

use super::{missing_columns, scale};
use crate::artifacts::ArtifactCache;
use crate::output::{AnalysisError, AnalysisOutput};
use crate::strategy::AnalysisStrategy;
use crate::window::sliding_windows;

/// Cycles of the engine selected for prediction.
#[derive(Debug)]
struct EngineHistory {
    engine_id: i64,
    cycles: Vec<i64>,
    features: Array2<f64>,
}

/// Remaining-useful-life regression over the run-to-failure history of the
/// last engine in a turbofan log.
///
/// Input is whitespace-separated with no header. Every line holds
/// `engine_id cycle setting_1..3 sensor_1..21`; only the engine with the
/// highest id is analysed.
#[derive(Debug, Clone)]
pub struct RulPrediction {
    cache: Arc<ArtifactCache>,
    kind: String,
    window: usize,
}

impl RulPrediction {
    pub const WINDOW: usize = 50;
    pub const FEATURES: [&'static str; 19] = [
        "setting_1", "setting_2", "sensor_2", "sensor_3", "sensor_4", "sensor_5", "sensor_6",
        "sensor_7", "sensor_8", "sensor_9", "sensor_11", "sensor_12", "sensor_13", "sensor_14",
        "sensor_15", "sensor_16", "sensor_17", "sensor_20", "sensor_21",
    ];

    pub fn new(cache: Arc<ArtifactCache>, kind: impl Into<String>) -> Self {
        Self {
            cache,
            kind: kind.into(),
            window: Self::WINDOW,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Positional column names of one input line.
    pub fn column_names() -> Vec<String> {
        let mut names: Vec<String> = ["engine_id", "cycle", "setting_1", "setting_2", "setting_3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        names.extend((1..=21).map(|i| format!("sensor_{i}")));
        names
    }

    fn read(&self, path: &Path) -> Result<EngineHistory, AnalysisError> {
        let text = std::fs::read_to_string(path).map_err(|e| AnalysisError::read(path, e))?;
        let names = Self::column_names();
        let feature_idx: Vec<usize> = Self::FEATURES
            .iter()
            .filter_map(|f| names.iter().position(|n| n == f))
            .collect();

        // (engine_id, cycle, features)
        let mut rows: Vec<(i64, i64, Vec<f64>)> = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() < names.len() {
                let present: Vec<&str> = names[..fields.len()].iter().map(String::as_str).collect();
                let wanted: Vec<String> = Self::FEATURES.iter().map(|f| f.to_string()).collect();
                let missing = missing_columns(&wanted, &present);
                if !missing.is_empty() {
                    return Err(AnalysisError::MissingColumns { missing });
                }
            }

            let line_no = i + 1;
            let engine_id = parse_integral(fields[0], line_no, &names[0])?;
            let cycle = parse_integral(fields.get(1).copied().unwrap_or_default(), line_no, &names[1])?;
            let mut features = Vec::with_capacity(feature_idx.len());
            for &idx in &feature_idx {
                let raw = fields.get(idx).copied().unwrap_or_default();
                features.push(raw.parse::<f64>().map_err(|_| AnalysisError::Malformed {
                    line: line_no,
                    column: names[idx].clone(),
                    value: raw.to_string(),
                })?);
            }
            rows.push((engine_id, cycle, features));
        }

        let engine_id = rows
            .iter()
            .map(|(id, _, _)| *id)
            .max()
            .ok_or_else(|| AnalysisError::InsufficientData("input contains no engine data".to_string()))?;

        let mut cycles = Vec::new();
        let mut flat = Vec::new();
        for (_, cycle, features) in rows.into_iter().filter(|(id, _, _)| *id == engine_id) {
            cycles.push(cycle);
            flat.extend(features);
        }
        let features = Array2::from_shape_vec((cycles.len(), feature_idx.len()), flat)
            .map_err(|e| AnalysisError::Inference(e.to_string()))?;

        Ok(EngineHistory {
            engine_id,
            cycles,
            features,
        })
    }
}

/// Parse an id/cycle field; `"7"` and `"7.0"` are both accepted.
fn parse_integral(raw: &str, line: usize, column: &str) -> Result<i64, AnalysisError> {
    let malformed = || AnalysisError::Malformed {
        line,
        column: column.to_string(),
        value: raw.to_string(),
    };
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
        _ => Err(malformed()),
    }
}

impl AnalysisStrategy for RulPrediction {
    fn execute(&self, input: &Path) -> Result<AnalysisOutput, AnalysisError> {
        let bundle = self.cache.get(&self.kind)?;

        let history = self.read(input)?;
        let scaled = scale(&bundle, history.features.view())?;
        let windows = sliding_windows(scaled.view(), self.window);
        if windows.nrows() == 0 {
            return Err(AnalysisError::InsufficientData(format!(
                "engine {} needs at least {} cycles, got {}",
                history.engine_id,
                self.window,
                history.cycles.len()
            )));
        }

        debug!(kind = %self.kind, engine_id = history.engine_id, windows = windows.nrows(), "running RUL prediction");
        let predictions = bundle.model.predict(windows.view())?;
        let predictions: Vec<f64> = predictions.iter().copied().collect();
        let last = predictions
            .last()
            .copied()
            .ok_or_else(|| AnalysisError::Inference("model returned no predictions".to_string()))?;

        let summary = format!("Final RUL prediction: {last:.2} cycles remaining.");
        let details = json!({
            "cycles": &history.cycles[self.window - 1..],
            "rul_predictions": predictions,
        });
        Ok(AnalysisOutput::new(summary, details))
    }
}
