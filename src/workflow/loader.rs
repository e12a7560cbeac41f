//! Loads a root workflow document and inlines all cross-document `run`
//! references into one composition tree.
//!
//! Expansion keeps an explicit stack of canonical paths currently being
//! expanded; re-encountering a path on that stack is a circular reference and
//! fails with the full cycle. Cycle detection has to live here because every
//! reference expansion copies the target into the tree, so an undetected
//! cycle would expand forever.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::{
    resource_requirement, NodeId, ProcessDocument, ProcessKind, ProcessNode, ResourceSet,
    RunTarget, SourceRef, WorkflowStep,
};

#[derive(Debug, Error)]
pub enum LoadError {
    /// A `run` target does not exist or cannot be parsed.
    #[error("cannot resolve run reference `{path}` (referenced by {referenced_by}): {reason}")]
    Reference {
        path: PathBuf,
        referenced_by: String,
        reason: String,
    },

    /// A `run` target is already being expanded further up the tree.
    #[error("circular run reference: {}", format_cycle(cycle))]
    Circular { cycle: Vec<PathBuf> },
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Parses workflow documents and expands their reference graph.
#[derive(Debug, Default)]
pub struct DocumentLoader;

impl DocumentLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load the document at `root` and inline every `run` reference.
    ///
    /// Declared resource intervals are normalized on the way in, so the
    /// resolver never sees a half-specified interval.
    pub fn load(&self, root: &Path) -> Result<ProcessNode, LoadError> {
        let mut stack = Vec::new();
        self.load_path(root, "submission root", &mut stack, None)
    }

    fn load_path(
        &self,
        path: &Path,
        referenced_by: &str,
        stack: &mut Vec<PathBuf>,
        id: Option<NodeId>,
    ) -> Result<ProcessNode, LoadError> {
        let reference = |reason: String| LoadError::Reference {
            path: path.to_path_buf(),
            referenced_by: referenced_by.to_string(),
            reason,
        };

        let canonical = fs::canonicalize(path).map_err(|e| reference(e.to_string()))?;

        if let Some(start) = stack.iter().position(|p| p == &canonical) {
            let mut cycle: Vec<PathBuf> = stack[start..].to_vec();
            cycle.push(canonical);
            return Err(LoadError::Circular { cycle });
        }

        let content = fs::read_to_string(&canonical).map_err(|e| reference(e.to_string()))?;
        let document: ProcessDocument =
            serde_yaml::from_str(&content).map_err(|e| reference(e.to_string()))?;

        debug!(path = %canonical.display(), referenced_by, "expanding workflow document");

        let id = id.unwrap_or_else(|| {
            let name = document
                .label()
                .map(str::to_string)
                .or_else(|| {
                    canonical
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                })
                .unwrap_or_else(|| "workflow".to_string());
            NodeId::root(name)
        });

        stack.push(canonical.clone());
        let node = self.build_node(document, id, &canonical, stack)?;
        stack.pop();
        Ok(node)
    }

    fn build_node(
        &self,
        document: ProcessDocument,
        id: NodeId,
        file: &Path,
        stack: &mut Vec<PathBuf>,
    ) -> Result<ProcessNode, LoadError> {
        let source = SourceRef {
            file: file.to_path_buf(),
            label: document.label().map(str::to_string),
        };
        let resources = self.declared_resources(document.requirements(), file, &id)?;
        let hints = document.hints().to_vec();

        let (kind, steps) = match &document {
            ProcessDocument::CommandLineTool(_) => (ProcessKind::Tool, Vec::new()),
            ProcessDocument::Workflow(workflow) => {
                let mut steps = Vec::with_capacity(workflow.steps.len());
                for step_doc in &workflow.steps {
                    let step_id = id.child(&step_doc.id);
                    let overrides =
                        self.declared_resources(&step_doc.requirements, file, &step_id)?;
                    let run_id = step_id.child("run");

                    let run = match &step_doc.run {
                        RunTarget::Inline(inline) => {
                            self.build_node((**inline).clone(), run_id, file, stack)?
                        }
                        RunTarget::Reference(target) => {
                            let resolved = resolve_reference(file, target);
                            self.load_path(
                                &resolved,
                                step_id.as_str(),
                                stack,
                                Some(run_id),
                            )?
                        }
                    };

                    steps.push(WorkflowStep {
                        id: step_id,
                        name: step_doc.id.clone(),
                        source: SourceRef {
                            file: file.to_path_buf(),
                            label: Some(step_doc.id.clone()),
                        },
                        overrides,
                        run,
                    });
                }
                (ProcessKind::Workflow, steps)
            }
        };

        Ok(ProcessNode::new(
            id, kind, source, resources, steps, hints, document,
        ))
    }

    fn declared_resources(
        &self,
        requirements: &[serde_yaml::Value],
        file: &Path,
        id: &NodeId,
    ) -> Result<ResourceSet, LoadError> {
        let requirement = resource_requirement(requirements).map_err(|e| LoadError::Reference {
            path: file.to_path_buf(),
            referenced_by: id.to_string(),
            reason: format!("malformed ResourceRequirement: {e}"),
        })?;
        Ok(requirement
            .map(ResourceSet::from)
            .unwrap_or_default()
            .normalize())
    }
}

/// A reference is resolved relative to the directory of the document that
/// declares it, matching how CWL documents link to each other.
fn resolve_reference(referencing_file: &Path, target: &str) -> PathBuf {
    let target_path = Path::new(target);
    if target_path.is_absolute() {
        target_path.to_path_buf()
    } else {
        referencing_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(target_path)
    }
}
