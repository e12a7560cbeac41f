//! Delegation of the main run step to an external workflow engine.
//!
//! The pipeline never interprets a process document itself. It hands the
//! composition tree to a [`WorkflowRunner`], which serializes the document,
//! invokes the configured engine binary and reports exit status and
//! collected artifact paths back.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::subprocess::{ProcessCommand, ProcessError, ProcessRunner};
use crate::workflow::resources::EffectiveBounds;
use crate::workflow::ProcessNode;

/// Everything a runner needs for one delegated execution.
pub struct RunRequest<'a> {
    pub node: &'a ProcessNode,
    pub inputs: &'a BTreeMap<String, serde_yaml::Value>,
    pub bounds: &'a EffectiveBounds,
    pub workdir: &'a Path,
    pub engine_args: &'a [String],
}

/// Result of a delegated run: the engine's exit code plus the artifact and
/// log paths it produced.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub exit_code: Option<i32>,
    pub output_paths: Vec<PathBuf>,
    pub log_paths: Vec<PathBuf>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunOutcome, ProcessError>;
}

/// Runs the document through a CWL engine binary (`cwltool` by default).
///
/// The composition tree is re-serialized with every step's run target
/// inlined, so the engine sees one self-contained document regardless of how
/// many files the original was spread across.
pub struct CwlEngineRunner {
    processes: Arc<dyn ProcessRunner>,
    program: String,
    args: Vec<String>,
}

impl CwlEngineRunner {
    pub fn new(processes: Arc<dyn ProcessRunner>, engine: &EngineConfig) -> Self {
        Self {
            processes,
            program: engine.program.clone(),
            args: engine.args.clone(),
        }
    }

    async fn stage_document(&self, request: &RunRequest<'_>) -> Result<PathBuf, ProcessError> {
        let document = request.node.to_document();
        let rendered = serde_yaml::to_string(&document)
            .map_err(|e| ProcessError::Io(std::io::Error::other(e)))?;
        let path = request.workdir.join("task.cwl");
        tokio::fs::write(&path, rendered).await?;
        Ok(path)
    }

    async fn stage_inputs(&self, request: &RunRequest<'_>) -> Result<Option<PathBuf>, ProcessError> {
        if request.inputs.is_empty() {
            return Ok(None);
        }
        let rendered = serde_yaml::to_string(request.inputs)
            .map_err(|e| ProcessError::Io(std::io::Error::other(e)))?;
        let path = request.workdir.join("parameters.yml");
        tokio::fs::write(&path, rendered).await?;
        Ok(Some(path))
    }

    /// The engine prints a JSON object mapping output names to `File`
    /// entries (or lists of them) on stdout. Anything unparsable is ignored
    /// with a warning, the run itself already succeeded or failed on exit
    /// code alone.
    fn collect_output_paths(stdout: &str) -> Vec<PathBuf> {
        let value: serde_json::Value = match serde_json::from_str(stdout) {
            Ok(value) => value,
            Err(e) => {
                if !stdout.trim().is_empty() {
                    warn!(error = %e, "engine stdout was not an output object");
                }
                return Vec::new();
            }
        };
        let Some(outputs) = value.as_object() else {
            return Vec::new();
        };
        let mut paths = Vec::new();
        for entry in outputs.values() {
            match entry {
                serde_json::Value::Array(items) => {
                    paths.extend(items.iter().filter_map(Self::entry_path));
                }
                other => paths.extend(Self::entry_path(other)),
            }
        }
        paths
    }

    fn entry_path(entry: &serde_json::Value) -> Option<PathBuf> {
        entry
            .get("path")
            .and_then(|p| p.as_str())
            .map(PathBuf::from)
    }
}

#[async_trait]
impl WorkflowRunner for CwlEngineRunner {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunOutcome, ProcessError> {
        let document_path = self.stage_document(&request).await?;
        let inputs_path = self.stage_inputs(&request).await?;

        let mut command = ProcessCommand::new(&self.program);
        command.args.extend(self.args.iter().cloned());
        command.args.extend(request.engine_args.iter().cloned());
        command.args.push(document_path.display().to_string());
        if let Some(inputs_path) = &inputs_path {
            command.args.push(inputs_path.display().to_string());
        }
        command.working_dir = Some(request.workdir.to_path_buf());

        debug!(node = %request.node.id, command = %command.display_line(), "delegating run to engine");
        let output = self.processes.run(command).await?;

        let log_path = request.workdir.join("engine.log");
        tokio::fs::write(&log_path, &output.stderr).await?;

        let output_paths = if output.status.success() {
            Self::collect_output_paths(&output.stdout)
        } else {
            Vec::new()
        };

        Ok(RunOutcome {
            exit_code: output.status.code(),
            output_paths,
            log_paths: vec![log_path],
        })
    }
}

/// Test double that skips the engine entirely and replays a scripted
/// outcome, recording each request it sees.
pub struct ScriptedRunner {
    outcome: RunOutcome,
    calls: std::sync::Mutex<Vec<ScriptedCall>>,
}

#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub node: String,
    pub engine_args: Vec<String>,
}

impl ScriptedRunner {
    pub fn succeeding(output_paths: Vec<PathBuf>) -> Self {
        Self {
            outcome: RunOutcome {
                exit_code: Some(0),
                output_paths,
                log_paths: Vec::new(),
            },
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing(exit_code: i32) -> Self {
        Self {
            outcome: RunOutcome {
                exit_code: Some(exit_code),
                output_paths: Vec::new(),
                log_paths: Vec::new(),
            },
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowRunner for ScriptedRunner {
    async fn run(&self, request: RunRequest<'_>) -> Result<RunOutcome, ProcessError> {
        self.calls.lock().unwrap().push(ScriptedCall {
            node: request.node.id.as_str().to_string(),
            engine_args: request.engine_args.to_vec(),
        });
        Ok(self.outcome.clone())
    }
}
