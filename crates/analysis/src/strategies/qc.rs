use std::path::Path;
use std::sync::Arc;

use image::imageops::FilterType;
use image::ImageReader;
use ndarray::Array2;
use serde_json::json;
use tracing::debug;

use crate::artifacts::ArtifactCache;
use crate::output::{AnalysisError, AnalysisOutput};
use crate::strategy::AnalysisStrategy;

/// Binary approve/reject classification of one product photo.
///
/// The image is converted to RGB, resized to the model's input size and
/// scaled to `[-1, 1]`. The model's first output is the probability that the
/// part is good.
#[derive(Debug, Clone)]
pub struct VisualQc {
    cache: Arc<ArtifactCache>,
    kind: String,
    width: u32,
    height: u32,
}

impl VisualQc {
    pub const INPUT_SIZE: u32 = 224;
    pub const CHANNELS: usize = 3;
    pub const APPROVED: &'static str = "APPROVED";
    pub const DEFECTIVE: &'static str = "DEFECTIVE";

    pub fn new(cache: Arc<ArtifactCache>, kind: impl Into<String>) -> Self {
        Self {
            cache,
            kind: kind.into(),
            width: Self::INPUT_SIZE,
            height: Self::INPUT_SIZE,
        }
    }

    pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    fn preprocess(&self, path: &Path) -> Result<Array2<f64>, AnalysisError> {
        // Uploads are stored under arbitrary names; trust the bytes, not the extension.
        let img = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| AnalysisError::read(path, e))?
            .decode()
            .map_err(|e| AnalysisError::Image(e.to_string()))?;
        let resized = image::imageops::resize(&img.to_rgb8(), self.width, self.height, FilterType::CatmullRom);

        let values: Vec<f64> = resized
            .into_raw()
            .into_iter()
            .map(|v| f64::from(v) / 127.5 - 1.0)
            .collect();
        let width = values.len();
        Array2::from_shape_vec((1, width), values).map_err(|e| AnalysisError::Inference(e.to_string()))
    }
}

impl AnalysisStrategy for VisualQc {
    fn execute(&self, input: &Path) -> Result<AnalysisOutput, AnalysisError> {
        let bundle = self.cache.get(&self.kind)?;
        let expected = self.width as usize * self.height as usize * Self::CHANNELS;
        if bundle.model.input_width() != expected {
            return Err(AnalysisError::ShapeMismatch {
                what: "model",
                expected: bundle.model.input_width(),
                found: expected,
            });
        }

        let batch = self.preprocess(input)?;
        debug!(kind = %self.kind, pixels = batch.ncols(), "running visual classification");
        let output = bundle.model.predict(batch.view())?;
        let probability = output
            .iter()
            .next()
            .copied()
            .ok_or_else(|| AnalysisError::Inference("model returned no score".to_string()))?;

        let (verdict, confidence) = if probability > 0.5 {
            (Self::APPROVED, probability * 100.0)
        } else {
            (Self::DEFECTIVE, (1.0 - probability) * 100.0)
        };

        let summary = format!("Verdict: {verdict} ({confidence:.2}%)");
        let details = json!({
            "verdict": verdict,
            "confidence_percent": confidence,
            "prediction_raw": probability,
        });
        Ok(AnalysisOutput::new(summary, details))
    }
}
