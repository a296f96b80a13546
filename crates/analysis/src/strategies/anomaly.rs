use std::path::Path;
use std::sync::Arc;

use ndarray::{Array2, Axis};
use serde_json::json;
use tracing::debug;

use super::{missing_columns, scale};
use crate::artifacts::ArtifactCache;
use crate::output::{AnalysisError, AnalysisOutput};
use crate::strategy::AnalysisStrategy;
use crate::window::sliding_windows;

/// Sensor readings parsed from one SKAB-style CSV.
#[derive(Debug)]
struct Readings {
    timestamps: Vec<String>,
    values: Array2<f64>,
}

/// Reconstruction-error anomaly detection over sliding windows of sensor rows.
///
/// The model is an autoencoder: it maps each flattened window onto a
/// reconstruction of the same width. A window whose mean absolute
/// reconstruction error exceeds the bundle threshold is anomalous.
#[derive(Debug, Clone)]
pub struct AnomalyDetection {
    cache: Arc<ArtifactCache>,
    kind: String,
    window: usize,
    time_column: String,
    sensor_columns: Vec<String>,
    default_threshold: f64,
}

impl AnomalyDetection {
    pub const WINDOW: usize = 20;
    pub const DEFAULT_THRESHOLD: f64 = 0.050353;
    pub const TIME_COLUMN: &'static str = "datetime";
    pub const SENSOR_COLUMNS: [&'static str; 8] = [
        "Accelerometer1RMS",
        "Accelerometer2RMS",
        "Current",
        "Pressure",
        "Temperature",
        "Thermocouple",
        "Voltage",
        "Volume Flow RateRMS",
    ];

    pub fn new(cache: Arc<ArtifactCache>, kind: impl Into<String>) -> Self {
        Self {
            cache,
            kind: kind.into(),
            window: Self::WINDOW,
            time_column: Self::TIME_COLUMN.to_string(),
            sensor_columns: Self::SENSOR_COLUMNS.iter().map(|c| c.to_string()).collect(),
            default_threshold: Self::DEFAULT_THRESHOLD,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    fn read(&self, path: &Path) -> Result<Readings, AnalysisError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| AnalysisError::read(path, e))?;

        let headers = reader
            .headers()
            .map_err(|e| AnalysisError::read(path, e))?
            .clone();
        let present: Vec<&str> = headers.iter().collect();

        let mut wanted = vec![self.time_column.clone()];
        wanted.extend(self.sensor_columns.iter().cloned());
        let missing = missing_columns(&wanted, &present);
        if !missing.is_empty() {
            return Err(AnalysisError::MissingColumns { missing });
        }

        let index = |name: &str| present.iter().position(|h| *h == name).unwrap_or(0);
        let time_idx = index(self.time_column.as_str());
        let sensor_idx: Vec<usize> = self.sensor_columns.iter().map(|c| index(c.as_str())).collect();

        let mut timestamps = Vec::new();
        let mut flat = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| AnalysisError::read(path, e))?;
            let line = record.position().map(|p| p.line() as usize).unwrap_or(0);

            timestamps.push(record.get(time_idx).unwrap_or_default().to_string());
            for (&idx, column) in sensor_idx.iter().zip(&self.sensor_columns) {
                let raw = record.get(idx).unwrap_or_default();
                let value = raw.parse::<f64>().map_err(|_| AnalysisError::Malformed {
                    line,
                    column: column.clone(),
                    value: raw.to_string(),
                })?;
                flat.push(value);
            }
        }

        let values = Array2::from_shape_vec((timestamps.len(), self.sensor_columns.len()), flat)
            .map_err(|e| AnalysisError::Inference(e.to_string()))?;
        Ok(Readings { timestamps, values })
    }
}

impl AnalysisStrategy for AnomalyDetection {
    fn execute(&self, input: &Path) -> Result<AnalysisOutput, AnalysisError> {
        let bundle = self.cache.get(&self.kind)?;
        let threshold = bundle.threshold.unwrap_or(self.default_threshold);

        let readings = self.read(input)?;
        let scaled = scale(&bundle, readings.values.view())?;
        let windows = sliding_windows(scaled.view(), self.window);
        if windows.nrows() == 0 {
            return Err(AnalysisError::InsufficientData(format!(
                "at least {} rows of sensor data are needed, got {}",
                self.window,
                readings.values.nrows()
            )));
        }

        debug!(kind = %self.kind, windows = windows.nrows(), "running anomaly detection");
        let reconstruction = bundle.model.predict(windows.view())?;
        if reconstruction.dim() != windows.dim() {
            return Err(AnalysisError::ShapeMismatch {
                what: "reconstruction",
                expected: windows.ncols(),
                found: reconstruction.ncols(),
            });
        }

        let errors = (&reconstruction - &windows)
            .mapv(f64::abs)
            .mean_axis(Axis(1))
            .ok_or_else(|| AnalysisError::Inference("empty reconstruction".to_string()))?
            .to_vec();
        let flags: Vec<u8> = errors.iter().map(|e| u8::from(*e > threshold)).collect();
        let anomalies = flags.iter().filter(|f| **f == 1).count();

        let summary = format!("{anomalies} anomalies detected in {} windows.", errors.len());
        let details = json!({
            "timestamps": &readings.timestamps[self.window - 1..],
            "reconstruction_errors": errors,
            "threshold": threshold,
            "is_anomaly": flags,
        });
        Ok(AnalysisOutput::new(summary, details))
    }
}
