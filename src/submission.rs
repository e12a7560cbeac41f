//! End-to-end submission entry points.
//!
//! `prepare_job` is the fail-closed front door: it loads and expands the
//! document tree, resolves resource bounds, extracts hints and configures
//! the hook plugin. Nothing executes until all of that has succeeded.
//! `run_job` then drives the prepared job through the pipeline.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::config::PreflightConfig;
use crate::error::{PreflightError, Result};
use crate::hooks::HookRegistry;
use crate::pipeline::{JobDescriptor, JobParameters, PipelineExecutor, PipelineReport};
use crate::runner::CwlEngineRunner;
use crate::subprocess::{ProcessRunner, TokioProcessRunner};
use crate::workflow::resources::{validate_production, ResourceResolver};
use crate::workflow::{DocumentLoader, ExecutionHooksHint, SchedulingHint};

/// Whether the production-only structural rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionKind {
    #[default]
    User,
    Production,
}

/// Validate a workflow description and prepare it for execution. Fails
/// without side effects: no hook command runs, no engine is invoked.
pub fn prepare_job(
    document: &Path,
    kind: SubmissionKind,
    registry: &HookRegistry,
    config: &PreflightConfig,
    workdir: &Path,
    parameters: JobParameters,
) -> Result<JobDescriptor> {
    let tree = DocumentLoader::new().load(document)?;
    if kind == SubmissionKind::Production {
        validate_production(&tree)?;
    }

    let bounds = ResourceResolver::new(config.inheritance).resolve(&tree)?;

    let hooks = ExecutionHooksHint::from_node(&tree);
    let scheduling = SchedulingHint::from_node(&tree);
    let plugin = registry.resolve(&hooks).map_err(PreflightError::Plugin)?;

    let descriptor = JobDescriptor {
        id: Uuid::new_v4(),
        tree,
        bounds,
        plugin,
        scheduling,
        parameters,
        workdir: workdir.to_path_buf(),
    };
    debug!(job = %descriptor.id, document = %document.display(), "job prepared");
    Ok(descriptor)
}

/// Prepare and execute a document in one call, using the real engine runner
/// on top of the given process runner.
pub async fn run_job(
    document: &Path,
    kind: SubmissionKind,
    registry: &HookRegistry,
    config: &PreflightConfig,
    workdir: &Path,
    parameters: JobParameters,
) -> Result<PipelineReport> {
    let job = prepare_job(document, kind, registry, config, workdir, parameters)?;
    let processes: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let runner = CwlEngineRunner::new(Arc::clone(&processes), &config.engine);
    let executor = PipelineExecutor::new(processes, config.clone());
    Ok(executor.run(&job, &runner).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_doc(dir: &TempDir, name: &str, yaml: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn prepares_a_job_with_resolved_bounds_and_plugin() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(
            &dir,
            "tool.cwl",
            r#"
class: CommandLineTool
baseCommand: echo
requirements:
  - class: ResourceRequirement
    coresMin: 2
hints:
  - class: preflight:execution-hooks
    hook_plugin: admin
    log_level: debug
"#,
        );

        let registry = HookRegistry::with_builtins();
        let config = PreflightConfig::default();
        let job = prepare_job(
            &path,
            SubmissionKind::User,
            &registry,
            &config,
            dir.path(),
            JobParameters::new(),
        )
        .unwrap();

        assert_eq!(job.plugin.key(), "admin");
        assert_eq!(job.plugin.engine_args(), vec!["--log-level", "debug"]);
        let bounds = job.bounds.get(&job.tree.id).unwrap();
        assert_eq!(
            bounds.get(crate::workflow::ResourceKind::Cores).unwrap().min,
            2
        );
    }

    #[test]
    fn production_submission_rejects_root_level_resources() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(
            &dir,
            "prod.cwl",
            r#"
class: Workflow
requirements:
  - class: ResourceRequirement
    coresMax: 4
steps: []
"#,
        );

        let registry = HookRegistry::with_builtins();
        let config = PreflightConfig::default();
        let err = prepare_job(
            &path,
            SubmissionKind::Production,
            &registry,
            &config,
            dir.path(),
            JobParameters::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PreflightError::Production(_)));

        // The same document is fine as a user submission.
        prepare_job(
            &path,
            SubmissionKind::User,
            &registry,
            &config,
            dir.path(),
            JobParameters::new(),
        )
        .unwrap();
    }

    #[test]
    fn conflicting_bounds_fail_before_any_execution() {
        let dir = TempDir::new().unwrap();
        let path = write_doc(
            &dir,
            "bad.cwl",
            r#"
class: CommandLineTool
baseCommand: echo
requirements:
  - class: ResourceRequirement
    coresMin: 4
    coresMax: 2
"#,
        );

        let registry = HookRegistry::with_builtins();
        let config = PreflightConfig::default();
        let err = prepare_job(
            &path,
            SubmissionKind::User,
            &registry,
            &config,
            dir.path(),
            JobParameters::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PreflightError::Conflict(_)));
    }
}
