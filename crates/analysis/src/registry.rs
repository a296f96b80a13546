//! Analysis-type → strategy dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::strategy::AnalysisStrategy;

/// No strategy is registered under the requested analysis type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown analysis type: '{0}'")]
pub struct UnknownKind(pub String);

/// Closed set of strategies, keyed by analysis type.
///
/// Filled once at startup and shared read-only afterwards. Adding an analysis
/// kind means registering one more strategy; dispatch never branches on kind.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn AnalysisStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy, replacing any previous one for `kind`.
    pub fn register<S>(&mut self, kind: impl Into<String>, strategy: S) -> &mut Self
    where
        S: AnalysisStrategy,
    {
        self.strategies.insert(kind.into(), Arc::new(strategy));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<S>(mut self, kind: impl Into<String>, strategy: S) -> Self
    where
        S: AnalysisStrategy,
    {
        self.register(kind, strategy);
        self
    }

    pub fn resolve(&self, kind: &str) -> Result<Arc<dyn AnalysisStrategy>, UnknownKind> {
        self.strategies
            .get(kind)
            .cloned()
            .ok_or_else(|| UnknownKind(kind.to_string()))
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl core::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
