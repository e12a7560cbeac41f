use thiserror::Error;

use crate::pipeline::PipelineFailure;
use crate::subprocess::ProcessError;
use crate::workflow::loader::LoadError;
use crate::workflow::resources::{Conflict, ProductionRuleViolation};

/// Unified error type for the preflight core.
///
/// Reference and conflict errors are fail-closed: they abort a submission
/// before any hook command or run step executes. Pipeline failures abort only
/// the remaining phases of the current job.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Conflict(#[from] Conflict),

    #[error(transparent)]
    Production(#[from] ProductionRuleViolation),

    #[error(transparent)]
    Pipeline(#[from] PipelineFailure),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("hook plugin error: {0}")]
    Plugin(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PreflightError>;
