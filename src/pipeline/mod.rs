//! Execution pipeline for one prepared job.
//!
//! The pipeline is a strict state machine: pre-processing hook commands run
//! first and in order, then the run step is delegated to the workflow
//! runner, then post-processing commands run in order. The first failure
//! stops the pipeline and nothing downstream of it executes; there are no
//! retries. State history is recorded so callers can observe exactly how far
//! a job got.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::PreflightConfig;
use crate::hooks::{CommandSpec, HookPlugin};
use crate::runner::{RunOutcome, RunRequest, WorkflowRunner};
use crate::subprocess::{ProcessCommand, ProcessRunner};
use crate::workflow::resources::EffectiveBounds;
use crate::workflow::{NodeId, ProcessNode, SchedulingHint};

pub type JobParameters = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    PreProcessing,
    Running,
    PostProcessing,
    Succeeded,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::PreProcessing => "pre-processing",
            PipelineState::Running => "running",
            PipelineState::PostProcessing => "post-processing",
            PipelineState::Succeeded => "succeeded",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pre => f.write_str("pre-processing"),
            Phase::Post => f.write_str("post-processing"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PipelineFailure {
    #[error("{phase} command {index} (`{command}`) failed: {reason}")]
    Command {
        phase: Phase,
        index: usize,
        command: String,
        reason: String,
    },

    #[error("run step failed: {reason}")]
    Run {
        exit_code: Option<i32>,
        reason: String,
    },
}

/// A fully prepared job: composition tree, resolved bounds, the configured
/// hook plugin and the scheduling hint to forward.
pub struct JobDescriptor {
    pub id: Uuid,
    pub tree: ProcessNode,
    pub bounds: HashMap<NodeId, EffectiveBounds>,
    pub plugin: Arc<dyn HookPlugin>,
    pub scheduling: SchedulingHint,
    pub parameters: JobParameters,
    pub workdir: PathBuf,
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("id", &self.id)
            .field("tree", &self.tree.id)
            .field("plugin", &self.plugin.key())
            .field("scheduling", &self.scheduling)
            .field("workdir", &self.workdir)
            .finish_non_exhaustive()
    }
}

/// What one pipeline execution did, state history included.
#[derive(Debug)]
pub struct PipelineReport {
    pub job_id: Uuid,
    pub state: PipelineState,
    pub states: Vec<PipelineState>,
    pub failure: Option<PipelineFailure>,
    pub output_paths: Vec<PathBuf>,
    pub log_paths: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Succeeded
    }
}

/// Drives a job through the pipeline state machine.
pub struct PipelineExecutor {
    processes: Arc<dyn ProcessRunner>,
    config: PreflightConfig,
}

impl PipelineExecutor {
    pub fn new(processes: Arc<dyn ProcessRunner>, config: PreflightConfig) -> Self {
        Self { processes, config }
    }

    pub async fn run(&self, job: &JobDescriptor, runner: &dyn WorkflowRunner) -> PipelineReport {
        let started_at = Utc::now();
        let mut states = vec![PipelineState::Idle];
        let mut outcome = RunOutcome::default();
        let failure = self
            .drive(job, runner, &mut states, &mut outcome)
            .await
            .err();

        let state = match failure {
            None => PipelineState::Succeeded,
            Some(ref f) => {
                error!(job = %job.id, error = %f, "pipeline failed");
                PipelineState::Failed
            }
        };
        states.push(state);

        PipelineReport {
            job_id: job.id,
            state,
            states,
            failure,
            output_paths: outcome.output_paths,
            log_paths: outcome.log_paths,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn drive(
        &self,
        job: &JobDescriptor,
        runner: &dyn WorkflowRunner,
        states: &mut Vec<PipelineState>,
        outcome: &mut RunOutcome,
    ) -> Result<(), PipelineFailure> {
        states.push(PipelineState::PreProcessing);
        self.run_phase(job, Phase::Pre, job.plugin.pre_commands())
            .await?;

        states.push(PipelineState::Running);
        self.run_step(job, runner, outcome).await?;

        states.push(PipelineState::PostProcessing);
        self.run_phase(job, Phase::Post, job.plugin.post_commands())
            .await?;
        Ok(())
    }

    async fn run_phase(
        &self,
        job: &JobDescriptor,
        phase: Phase,
        commands: Vec<CommandSpec>,
    ) -> Result<(), PipelineFailure> {
        for (index, spec) in commands.into_iter().enumerate() {
            debug!(job = %job.id, %phase, index, command = %spec.display_line(), "running hook command");
            self.run_command(job, phase, index, spec).await?;
        }
        Ok(())
    }

    async fn run_command(
        &self,
        job: &JobDescriptor,
        phase: Phase,
        index: usize,
        spec: CommandSpec,
    ) -> Result<(), PipelineFailure> {
        let mut command = ProcessCommand::new(&spec.program);
        command.args = spec.args.clone();
        command.working_dir = Some(job.workdir.clone());
        command.timeout = self.config.command_timeout;
        for (key, value) in &job.parameters {
            if let Some(rendered) = scalar_to_env(value) {
                command.env.insert(key.clone(), rendered);
            }
        }

        let failed = |reason: String| PipelineFailure::Command {
            phase,
            index,
            command: spec.display_line(),
            reason,
        };

        let output = self
            .processes
            .run(command)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let mut reason = match output.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            reason = format!("{reason}: {stderr}");
        }
        Err(failed(reason))
    }

    /// Delegate the run step. The outcome is stored even on failure so the
    /// report keeps whatever logs and outputs the engine produced.
    async fn run_step(
        &self,
        job: &JobDescriptor,
        runner: &dyn WorkflowRunner,
        outcome: &mut RunOutcome,
    ) -> Result<(), PipelineFailure> {
        let bounds = job.bounds.get(&job.tree.id).copied().unwrap_or_default();
        let engine_args = job.plugin.engine_args();
        *outcome = runner
            .run(RunRequest {
                node: &job.tree,
                inputs: &job.parameters,
                bounds: &bounds,
                workdir: &job.workdir,
                engine_args: &engine_args,
            })
            .await
            .map_err(|e| PipelineFailure::Run {
                exit_code: None,
                reason: e.to_string(),
            })?;
        if outcome.success() {
            Ok(())
        } else {
            Err(PipelineFailure::Run {
                exit_code: outcome.exit_code,
                reason: match outcome.exit_code {
                    Some(code) => format!("engine exited with code {code}"),
                    None => "engine terminated by signal".to_string(),
                },
            })
        }
    }
}

/// Scalar parameters are exported into hook command environments; compound
/// values are not.
fn scalar_to_env(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::SandboxPlugin;
    use crate::runner::ScriptedRunner;
    use crate::subprocess::{ExitStatus, MockProcessRunner};
    use crate::workflow::DocumentLoader;
    use std::fs;
    use tempfile::TempDir;

    fn descriptor(dir: &TempDir, plugin: Arc<dyn HookPlugin>) -> JobDescriptor {
        let path = dir.path().join("tool.cwl");
        fs::write(&path, "class: CommandLineTool\nbaseCommand: echo\n").unwrap();
        let tree = DocumentLoader::new().load(&path).unwrap();
        JobDescriptor {
            id: Uuid::new_v4(),
            tree,
            bounds: HashMap::new(),
            plugin,
            scheduling: SchedulingHint::default(),
            parameters: JobParameters::new(),
            workdir: dir.path().to_path_buf(),
        }
    }

    struct TwoStagePlugin;

    impl HookPlugin for TwoStagePlugin {
        fn key(&self) -> &str {
            "two-stage"
        }

        fn pre_commands(&self) -> Vec<CommandSpec> {
            vec![
                CommandSpec::new("stage-inputs", ["data.tar"]),
                CommandSpec::new("verify-inputs", ["data.tar"]),
            ]
        }

        fn post_commands(&self) -> Vec<CommandSpec> {
            vec![CommandSpec::new("archive-outputs", ["result.sim"])]
        }
    }

    fn sandbox_plugin() -> Arc<dyn HookPlugin> {
        Arc::new(SandboxPlugin {
            input_sandbox: vec!["data.tar".to_string()],
            output_sandbox: vec!["result.sim".to_string()],
            archive: "output.sandbox.tgz".to_string(),
        })
    }

    #[tokio::test]
    async fn successful_run_walks_every_state_in_order() {
        let dir = TempDir::new().unwrap();
        let processes = Arc::new(MockProcessRunner::new());
        let executor = PipelineExecutor::new(processes.clone(), PreflightConfig::default());
        let runner = ScriptedRunner::succeeding(vec![PathBuf::from("result.sim")]);

        let report = executor.run(&descriptor(&dir, sandbox_plugin()), &runner).await;

        assert!(report.succeeded());
        assert!(report.failure.is_none());
        assert_eq!(
            report.states,
            vec![
                PipelineState::Idle,
                PipelineState::PreProcessing,
                PipelineState::Running,
                PipelineState::PostProcessing,
                PipelineState::Succeeded,
            ]
        );
        assert_eq!(report.output_paths, vec![PathBuf::from("result.sim")]);
        assert_eq!(processes.times_called("cp"), 1);
        assert_eq!(processes.times_called("tar"), 1);
    }

    #[tokio::test]
    async fn pre_command_failure_stops_before_the_run_step() {
        let dir = TempDir::new().unwrap();
        let processes = Arc::new(MockProcessRunner::new());
        processes.respond("cp", ExitStatus::Error(1));
        let executor = PipelineExecutor::new(processes.clone(), PreflightConfig::default());
        let runner = ScriptedRunner::succeeding(Vec::new());

        let report = executor.run(&descriptor(&dir, sandbox_plugin()), &runner).await;

        assert_eq!(report.state, PipelineState::Failed);
        assert!(matches!(
            report.failure,
            Some(PipelineFailure::Command {
                phase: Phase::Pre,
                index: 0,
                ..
            })
        ));
        assert!(!report.states.contains(&PipelineState::Running));
        assert!(runner.calls().is_empty());
        assert_eq!(processes.times_called("tar"), 0);
    }

    #[tokio::test]
    async fn second_pre_command_failure_reports_its_index() {
        let dir = TempDir::new().unwrap();
        let processes = Arc::new(MockProcessRunner::new());
        processes.respond("verify-inputs", ExitStatus::Error(1));
        let executor = PipelineExecutor::new(processes.clone(), PreflightConfig::default());
        let runner = ScriptedRunner::succeeding(Vec::new());

        let report = executor
            .run(&descriptor(&dir, Arc::new(TwoStagePlugin)), &runner)
            .await;

        assert_eq!(report.state, PipelineState::Failed);
        match report.failure {
            Some(PipelineFailure::Command {
                phase: Phase::Pre,
                index,
                ref command,
                ..
            }) => {
                assert_eq!(index, 1);
                assert_eq!(command, "verify-inputs data.tar");
            }
            ref other => panic!("unexpected failure: {other:?}"),
        }
        // The first pre-command ran; nothing after the failure did.
        assert_eq!(processes.times_called("stage-inputs"), 1);
        assert!(!report.states.contains(&PipelineState::Running));
        assert!(runner.calls().is_empty());
        assert_eq!(processes.times_called("archive-outputs"), 0);
    }

    #[tokio::test]
    async fn run_failure_skips_post_processing() {
        let dir = TempDir::new().unwrap();
        let processes = Arc::new(MockProcessRunner::new());
        let executor = PipelineExecutor::new(processes.clone(), PreflightConfig::default());
        let runner = ScriptedRunner::failing(2);

        let report = executor.run(&descriptor(&dir, sandbox_plugin()), &runner).await;

        assert_eq!(report.state, PipelineState::Failed);
        assert!(matches!(
            report.failure,
            Some(PipelineFailure::Run {
                exit_code: Some(2),
                ..
            })
        ));
        assert!(!report.states.contains(&PipelineState::PostProcessing));
        assert_eq!(processes.times_called("tar"), 0);
    }

    #[tokio::test]
    async fn post_failure_keeps_run_outputs_in_the_report() {
        let dir = TempDir::new().unwrap();
        let processes = Arc::new(MockProcessRunner::new());
        processes.respond("tar", ExitStatus::Error(2));
        let executor = PipelineExecutor::new(processes.clone(), PreflightConfig::default());
        let runner = ScriptedRunner::succeeding(vec![PathBuf::from("result.sim")]);

        let report = executor.run(&descriptor(&dir, sandbox_plugin()), &runner).await;

        assert_eq!(report.state, PipelineState::Failed);
        assert!(matches!(
            report.failure,
            Some(PipelineFailure::Command {
                phase: Phase::Post,
                ..
            })
        ));
        assert_eq!(report.output_paths, vec![PathBuf::from("result.sim")]);
    }

    #[tokio::test]
    async fn plugin_engine_args_reach_the_runner() {
        let dir = TempDir::new().unwrap();
        let processes = Arc::new(MockProcessRunner::new());
        let executor = PipelineExecutor::new(processes, PreflightConfig::default());
        let runner = ScriptedRunner::succeeding(Vec::new());
        let plugin = Arc::new(crate::hooks::AdminPlugin {
            log_level: "debug".to_string(),
            ..Default::default()
        });

        executor.run(&descriptor(&dir, plugin), &runner).await;

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].engine_args, vec!["--log-level", "debug"]);
    }

    #[tokio::test]
    async fn scalar_parameters_are_exported_to_hook_commands() {
        let dir = TempDir::new().unwrap();
        let processes = Arc::new(MockProcessRunner::new());
        let executor = PipelineExecutor::new(processes.clone(), PreflightConfig::default());
        let runner = ScriptedRunner::succeeding(Vec::new());

        let mut job = descriptor(&dir, sandbox_plugin());
        job.parameters
            .insert("events".to_string(), serde_yaml::Value::from(2500));

        executor.run(&job, &runner).await;

        let calls = processes.calls();
        let cp = calls.iter().find(|c| c.program == "cp").unwrap();
        assert_eq!(cp.env.get("events").map(String::as_str), Some("2500"));
    }
}
