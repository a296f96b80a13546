use std::path::Path;

use crate::output::{AnalysisError, AnalysisOutput};

/// One analysis kind.
///
/// A strategy is a function of the input file: it reads `input`, may consult the
/// artifact cache, and returns a summary plus structured details. It must not
/// touch job state; persisting the outcome is the engine's job.
pub trait AnalysisStrategy: Send + Sync + 'static {
    fn execute(&self, input: &Path) -> Result<AnalysisOutput, AnalysisError>;
}

impl<F> AnalysisStrategy for F
where
    F: Fn(&Path) -> Result<AnalysisOutput, AnalysisError> + Send + Sync + 'static,
{
    fn execute(&self, input: &Path) -> Result<AnalysisOutput, AnalysisError> {
        self(input)
    }
}
