//! `idh-analysis`
//!
//! **Responsibility:** the pluggable analysis side of the worker.
//!
//! - [`AnalysisStrategy`]: uniform `execute(path) -> (summary, details)` interface
//! - [`StrategyRegistry`]: analysis-type key → strategy, filled once at startup
//! - [`ArtifactCache`]: per-kind model/scaler bundles, loaded at most once per process
//! - built-in strategies for anomaly detection, RUL prediction and visual QC
//!
//! Nothing here touches the job store or the broker; strategies only read the
//! file they are handed and the artifacts they depend on.

pub mod artifacts;
pub mod builtin;
pub mod model;
pub mod output;
pub mod registry;
pub mod scaler;
pub mod strategies;
pub mod strategy;
pub mod window;

pub use artifacts::{
    ArtifactBundle, ArtifactCache, ArtifactLoader, ArtifactSpec, FsArtifactLoader, LoadError,
};
pub use model::{Activation, DenseNetwork, Model};
pub use output::{AnalysisError, AnalysisOutput};
pub use registry::{StrategyRegistry, UnknownKind};
pub use scaler::Scaler;
pub use strategy::AnalysisStrategy;
