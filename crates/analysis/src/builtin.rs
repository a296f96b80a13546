//! The analysis kinds shipped with the worker and their wiring.

use std::path::Path;
use std::sync::Arc;

use crate::artifacts::{ArtifactCache, ArtifactSpec, FsArtifactLoader};
use crate::registry::StrategyRegistry;
use crate::strategies::{AnomalyDetection, RulPrediction, VisualQc};

pub const ANOMALY_DETECTION: &str = "ANOMALY_DETECTION";
pub const RUL_PREDICTION: &str = "RUL_PREDICTION";
pub const QC_VISUAL_CLASSIFICATION: &str = "QC_VISUAL_CLASSIFICATION";

pub const KINDS: [&str; 3] = [ANOMALY_DETECTION, RUL_PREDICTION, QC_VISUAL_CLASSIFICATION];

/// Loader for the artifact files of every built-in kind under `models_dir`.
pub fn artifact_loader(models_dir: impl AsRef<Path>) -> FsArtifactLoader {
    FsArtifactLoader::new(models_dir.as_ref())
        .with(
            ANOMALY_DETECTION,
            ArtifactSpec::model("anomaly_model.json")
                .scaler("anomaly_scaler.json")
                .threshold(AnomalyDetection::DEFAULT_THRESHOLD),
        )
        .with(
            RUL_PREDICTION,
            ArtifactSpec::model("rul_model.json").scaler("rul_scaler.json"),
        )
        .with(QC_VISUAL_CLASSIFICATION, ArtifactSpec::model("qc_model.json"))
}

/// Cache over [`artifact_loader`]. Nothing is loaded until first use or
/// [`ArtifactCache::prewarm`].
pub fn artifact_cache(models_dir: impl AsRef<Path>) -> ArtifactCache {
    ArtifactCache::new(artifact_loader(models_dir), KINDS)
}

/// Registry with every built-in strategy bound to `cache`.
pub fn registry(cache: Arc<ArtifactCache>) -> StrategyRegistry {
    StrategyRegistry::new()
        .with(ANOMALY_DETECTION, AnomalyDetection::new(cache.clone(), ANOMALY_DETECTION))
        .with(RUL_PREDICTION, RulPrediction::new(cache.clone(), RUL_PREDICTION))
        .with(
            QC_VISUAL_CLASSIFICATION,
            VisualQc::new(cache, QC_VISUAL_CLASSIFICATION),
        )
}
