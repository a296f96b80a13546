use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::{ArtifactBundle, ArtifactLoader, LoadError};
use crate::model::DenseNetwork;
use crate::scaler::Scaler;

/// Which files make up the bundle of one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSpec {
    /// Model file, relative to the artifact directory.
    pub model: String,
    /// Optional scaler file, relative to the artifact directory.
    pub scaler: Option<String>,
    /// Fixed decision threshold carried with the bundle.
    pub threshold: Option<f64>,
}

impl ArtifactSpec {
    pub fn model(file: impl Into<String>) -> Self {
        Self {
            model: file.into(),
            scaler: None,
            threshold: None,
        }
    }

    pub fn scaler(mut self, file: impl Into<String>) -> Self {
        self.scaler = Some(file.into());
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// Loads JSON model/scaler files from one directory.
#[derive(Debug, Clone)]
pub struct FsArtifactLoader {
    dir: PathBuf,
    specs: HashMap<String, ArtifactSpec>,
}

impl FsArtifactLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            specs: HashMap::new(),
        }
    }

    pub fn with(mut self, kind: impl Into<String>, spec: ArtifactSpec) -> Self {
        self.specs.insert(kind.into(), spec);
        self
    }

    /// Kinds this loader knows how to build.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.specs.keys().cloned().collect();
        kinds.sort_unstable();
        kinds
    }

    fn read(&self, file: &str) -> Result<(PathBuf, String), LoadError> {
        let path = self.dir.join(file);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok((path, text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LoadError::Missing {
                path: path.display().to_string(),
            }),
            Err(e) => Err(LoadError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<T, LoadError> {
        let (path, text) = self.read(file)?;
        serde_json::from_str(&text).map_err(|e| invalid(&path, e))
    }
}

fn invalid(path: &Path, reason: impl ToString) -> LoadError {
    LoadError::Invalid {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

impl ArtifactLoader for FsArtifactLoader {
    fn load(&self, kind: &str) -> Result<ArtifactBundle, LoadError> {
        let spec = self
            .specs
            .get(kind)
            .ok_or_else(|| LoadError::UnknownKind(kind.to_string()))?;

        let (model_path, model_json) = self.read(&spec.model)?;
        let model = DenseNetwork::from_json(&model_json).map_err(|e| invalid(&model_path, e))?;
        let mut bundle = ArtifactBundle::new(Arc::new(model));

        if let Some(file) = &spec.scaler {
            let scaler: Scaler = self.read_json(file)?;
            scaler
                .validate()
                .map_err(|e| invalid(&self.dir.join(file), e))?;
            bundle = bundle.with_scaler(scaler);
        }
        if let Some(threshold) = spec.threshold {
            bundle = bundle.with_threshold(threshold);
        }
        Ok(bundle)
    }
}
