//! Built-in analysis strategies.
//!
//! Each strategy owns a shared handle on the [`ArtifactCache`] and the kind
//! key its bundle is cached under; everything else comes from the input file.

mod anomaly;
mod qc;
mod rul;

use ndarray::{Array2, ArrayView2};

pub use anomaly::AnomalyDetection;
pub use qc::VisualQc;
pub use rul::RulPrediction;

use crate::artifacts::ArtifactBundle;
use crate::output::AnalysisError;

/// Apply the bundle's scaler, if any.
fn scale(bundle: &ArtifactBundle, rows: ArrayView2<'_, f64>) -> Result<Array2<f64>, AnalysisError> {
    match &bundle.scaler {
        Some(scaler) => scaler.transform(rows),
        None => Ok(rows.to_owned()),
    }
}

/// Names from `wanted` that are absent from `present`.
fn missing_columns(wanted: &[String], present: &[&str]) -> Vec<String> {
    wanted
        .iter()
        .filter(|w| !present.contains(&w.as_str()))
        .cloned()
        .collect()
}
