//! Per-feature scaling fitted at training time.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::output::AnalysisError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scaler {
    /// `x * scale + min`
    MinMax { min: Vec<f64>, scale: Vec<f64> },
    /// `(x - mean) / std`
    Standard { mean: Vec<f64>, std: Vec<f64> },
}

impl Scaler {
    /// Number of features the scaler was fitted on.
    pub fn width(&self) -> usize {
        match self {
            Scaler::MinMax { min, .. } => min.len(),
            Scaler::Standard { mean, .. } => mean.len(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let (a, b) = match self {
            Scaler::MinMax { min, scale } => (min, scale),
            Scaler::Standard { mean, std } => (mean, std),
        };
        if a.is_empty() {
            return Err("scaler has no features".to_string());
        }
        if a.len() != b.len() {
            return Err(format!(
                "scaler parameter lengths differ ({} vs {})",
                a.len(),
                b.len()
            ));
        }
        if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
            return Err("scaler has non-finite parameters".to_string());
        }
        if let Scaler::Standard { std, .. } = self {
            if std.iter().any(|s| *s == 0.0) {
                return Err("standard scaler has a zero deviation".to_string());
            }
        }
        Ok(())
    }

    /// Scale every row of `rows` (`samples × width`).
    pub fn transform(&self, rows: ArrayView2<'_, f64>) -> Result<Array2<f64>, AnalysisError> {
        if rows.ncols() != self.width() {
            return Err(AnalysisError::ShapeMismatch {
                what: "scaler",
                expected: self.width(),
                found: rows.ncols(),
            });
        }

        let mut out = rows.to_owned();
        match self {
            Scaler::MinMax { min, scale } => {
                let (min, scale) = (Array1::from_vec(min.clone()), Array1::from_vec(scale.clone()));
                for mut row in out.axis_iter_mut(Axis(0)) {
                    row *= &scale;
                    row += &min;
                }
            }
            Scaler::Standard { mean, std } => {
                let (mean, std) = (Array1::from_vec(mean.clone()), Array1::from_vec(std.clone()));
                for mut row in out.axis_iter_mut(Axis(0)) {
                    row -= &mean;
                    row /= &std;
                }
            }
        }
        Ok(out)
    }
}
