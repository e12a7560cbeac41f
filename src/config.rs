use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::workflow::resources::InheritancePolicy;

/// Crate-wide configuration, constructed once and threaded explicitly through
/// the resolver and pipeline. No component reads it through a global.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    pub engine: EngineConfig,
    /// How the resolver tightens resource bounds across ancestor levels.
    pub inheritance: InheritancePolicy,
    /// Applied to each pre/post hook command. A timeout is a failure; the
    /// state machine treats it exactly like a non-zero exit.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Option<Duration>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            inheritance: InheritancePolicy::default(),
            command_timeout: None,
        }
    }
}

/// Invocation shape of the external CWL-compatible engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "cwltool".to_string(),
            args: vec!["--parallel".to_string()],
        }
    }
}
