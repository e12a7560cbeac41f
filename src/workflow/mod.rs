//! Composition-tree model for workflow descriptions.
//!
//! Raw documents are CWL-shaped YAML (`class: CommandLineTool | Workflow`).
//! The loader turns them into an owned [`ProcessNode`] tree with every
//! cross-document `run` reference inlined; nothing mutates a tree after it
//! leaves the loader.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub mod hints;
pub mod loader;
pub mod resources;

pub use hints::{ExecutionHooksHint, SchedulingHint};
pub use loader::{DocumentLoader, LoadError};
pub use resources::{
    Conflict, ConflictKind, EffectiveBounds, InheritancePolicy, ResourceResolver,
};

/// Stable, human-readable identifier of a node within one composition tree.
///
/// Built from the root label and the step ids along the path, e.g.
/// `pipeline/simulate/run`. Ids are unique within a tree and show up verbatim
/// in conflict diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn root(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}/{}", self.0, segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resource kinds a node may constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cores,
    Ram,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Cores, ResourceKind::Ram];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Cores => f.write_str("cores"),
            ResourceKind::Ram => f.write_str("ram"),
        }
    }
}

/// A declared `{min, max}` bound for one resource kind.
///
/// After [`ResourceInterval::normalize`] either both bounds are present or
/// the interval is unconstrained; the resolver never sees a half-specified
/// interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInterval {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl ResourceInterval {
    pub fn unconstrained() -> Self {
        Self::default()
    }

    pub fn is_unconstrained(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// A missing bound takes the value of the one that was declared.
    pub fn normalize(self) -> Self {
        match (self.min, self.max) {
            (Some(min), None) => Self {
                min: Some(min),
                max: Some(min),
            },
            (None, Some(max)) => Self {
                min: Some(max),
                max: Some(max),
            },
            _ => self,
        }
    }

    /// Both bounds of a normalized interval, or `None` if unconstrained.
    pub fn pair(&self) -> Option<(u64, u64)> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }
}

/// Per-resource-kind declared intervals of one node or step override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSet {
    pub cores: ResourceInterval,
    pub ram: ResourceInterval,
}

impl ResourceSet {
    pub fn interval(&self, kind: ResourceKind) -> ResourceInterval {
        match kind {
            ResourceKind::Cores => self.cores,
            ResourceKind::Ram => self.ram,
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.cores.is_unconstrained() && self.ram.is_unconstrained()
    }

    pub fn normalize(self) -> Self {
        Self {
            cores: self.cores.normalize(),
            ram: self.ram.normalize(),
        }
    }
}

impl From<ResourceRequirement> for ResourceSet {
    fn from(req: ResourceRequirement) -> Self {
        Self {
            cores: ResourceInterval {
                min: req.cores_min,
                max: req.cores_max,
            },
            ram: ResourceInterval {
                min: req.ram_min,
                max: req.ram_max,
            },
        }
    }
}

/// The `ResourceRequirement` entry of a document's `requirements` list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    #[serde(default, rename = "coresMin", skip_serializing_if = "Option::is_none")]
    pub cores_min: Option<u64>,
    #[serde(default, rename = "coresMax", skip_serializing_if = "Option::is_none")]
    pub cores_max: Option<u64>,
    #[serde(default, rename = "ramMin", skip_serializing_if = "Option::is_none")]
    pub ram_min: Option<u64>,
    #[serde(default, rename = "ramMax", skip_serializing_if = "Option::is_none")]
    pub ram_max: Option<u64>,
}

/// Locate the `ResourceRequirement` among a `requirements` list, ignoring
/// requirement classes this core does not interpret.
pub(crate) fn resource_requirement(
    entries: &[serde_yaml::Value],
) -> Result<Option<ResourceRequirement>, serde_yaml::Error> {
    for entry in entries {
        if entry.get("class").and_then(|c| c.as_str()) == Some("ResourceRequirement") {
            let req = serde_yaml::from_value(strip_class(entry))?;
            return Ok(Some(req));
        }
    }
    Ok(None)
}

/// Copy of a hint or requirement mapping without its `class` discriminator.
pub(crate) fn strip_class(entry: &serde_yaml::Value) -> serde_yaml::Value {
    let mut stripped = serde_yaml::Mapping::new();
    if let Some(mapping) = entry.as_mapping() {
        for (key, value) in mapping {
            if key.as_str() != Some("class") {
                stripped.insert(key.clone(), value.clone());
            }
        }
    }
    serde_yaml::Value::Mapping(stripped)
}

// ---------------------------------------------------------------------------
// Raw document surface (serde)
// ---------------------------------------------------------------------------

/// A parsed workflow-description document, before reference expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum ProcessDocument {
    CommandLineTool(ToolDocument),
    Workflow(WorkflowDocument),
}

impl ProcessDocument {
    pub fn label(&self) -> Option<&str> {
        match self {
            ProcessDocument::CommandLineTool(doc) => doc.label.as_deref(),
            ProcessDocument::Workflow(doc) => doc.label.as_deref(),
        }
    }

    pub fn requirements(&self) -> &[serde_yaml::Value] {
        match self {
            ProcessDocument::CommandLineTool(doc) => &doc.requirements,
            ProcessDocument::Workflow(doc) => &doc.requirements,
        }
    }

    pub fn hints(&self) -> &[serde_yaml::Value] {
        match self {
            ProcessDocument::CommandLineTool(doc) => &doc.hints,
            ProcessDocument::Workflow(doc) => &doc.hints,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<serde_yaml::Value>,
    /// Fields this core does not interpret (inputs, outputs, baseCommand,
    /// cwlVersion, ...) but must survive re-serialization for the engine.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<serde_yaml::Value>,
    #[serde(default)]
    pub steps: Vec<StepDocument>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDocument {
    pub id: String,
    pub run: RunTarget,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<serde_yaml::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A step's run target: a path to another document, or an inline process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunTarget {
    Reference(String),
    Inline(Box<ProcessDocument>),
}

// ---------------------------------------------------------------------------
// Composition tree
// ---------------------------------------------------------------------------

/// Where a node came from, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    /// Originating document file.
    pub file: PathBuf,
    /// `label` of the document or step, when one was declared.
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessKind {
    Tool,
    Workflow,
}

/// One node of the fully inlined composition tree.
///
/// Exclusively owned by the tree that contains it; reference expansion
/// copies, never aliases, which is why the loader must detect cycles.
#[derive(Debug, Clone)]
pub struct ProcessNode {
    pub id: NodeId,
    pub kind: ProcessKind,
    pub source: SourceRef,
    /// Declared intervals, already normalized by the loader.
    pub resources: ResourceSet,
    /// Ordered steps; empty for tools.
    pub steps: Vec<WorkflowStep>,
    /// Raw hint entries of the document, interpreted by [`hints`].
    pub hints: Vec<serde_yaml::Value>,
    document: ProcessDocument,
}

impl ProcessNode {
    pub(crate) fn new(
        id: NodeId,
        kind: ProcessKind,
        source: SourceRef,
        resources: ResourceSet,
        steps: Vec<WorkflowStep>,
        hints: Vec<serde_yaml::Value>,
        document: ProcessDocument,
    ) -> Self {
        Self {
            id,
            kind,
            source,
            resources,
            steps,
            hints,
            document,
        }
    }

    /// Re-serialize this node as a document with every step's run target
    /// inlined, suitable for handing to the external engine.
    pub fn to_document(&self) -> ProcessDocument {
        let mut document = self.document.clone();
        if let ProcessDocument::Workflow(workflow) = &mut document {
            for (step_doc, step) in workflow.steps.iter_mut().zip(&self.steps) {
                step_doc.run = RunTarget::Inline(Box::new(step.run.to_document()));
            }
        }
        document
    }

    /// Nodes of the subtree rooted here, in pre-order.
    pub fn iter_preorder(&self) -> impl Iterator<Item = &ProcessNode> {
        let mut nodes = Vec::new();
        collect_preorder(self, &mut nodes);
        nodes.into_iter()
    }
}

fn collect_preorder<'a>(node: &'a ProcessNode, out: &mut Vec<&'a ProcessNode>) {
    out.push(node);
    for step in &node.steps {
        collect_preorder(&step.run, out);
    }
}

/// A workflow step: exactly one run target plus an optional resource
/// override that tightens what the run target may declare.
#[derive(Debug, Clone)]
pub struct WorkflowStep {
    pub id: NodeId,
    pub name: String,
    pub source: SourceRef,
    /// Step-level override, normalized; unconstrained when absent.
    pub overrides: ResourceSet,
    pub run: ProcessNode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_fills_missing_bound() {
        let only_min = ResourceInterval {
            min: Some(4),
            max: None,
        }
        .normalize();
        assert_eq!(only_min.pair(), Some((4, 4)));

        let only_max = ResourceInterval {
            min: None,
            max: Some(2),
        }
        .normalize();
        assert_eq!(only_max.pair(), Some((2, 2)));

        let empty = ResourceInterval::unconstrained().normalize();
        assert!(empty.is_unconstrained());
        assert_eq!(empty.pair(), None);
    }

    #[test]
    fn normalize_keeps_declared_pair() {
        let declared = ResourceInterval {
            min: Some(4),
            max: Some(2),
        }
        .normalize();
        // Normalization fills, it does not validate; min > max stays visible
        // for the resolver's self-conflict check.
        assert_eq!(declared.pair(), Some((4, 2)));
    }

    #[test]
    fn resource_requirement_extracted_among_other_classes() {
        let yaml = r#"
- class: InlineJavascriptRequirement
- class: ResourceRequirement
  coresMin: 2
  ramMax: 4096
"#;
        let entries: Vec<serde_yaml::Value> = serde_yaml::from_str(yaml).unwrap();
        let req = resource_requirement(&entries).unwrap().unwrap();
        assert_eq!(req.cores_min, Some(2));
        assert_eq!(req.cores_max, None);
        assert_eq!(req.ram_max, Some(4096));
    }

    #[test]
    fn resource_requirement_absent() {
        let yaml = "- class: DockerRequirement\n  dockerPull: debian\n";
        let entries: Vec<serde_yaml::Value> = serde_yaml::from_str(yaml).unwrap();
        assert!(resource_requirement(&entries).unwrap().is_none());
    }

    #[test]
    fn document_round_trips_uninterpreted_fields() {
        let yaml = r#"
class: CommandLineTool
label: echo
cwlVersion: v1.2
baseCommand: echo
inputs: []
outputs: []
"#;
        let doc: ProcessDocument = serde_yaml::from_str(yaml).unwrap();
        let rendered = serde_yaml::to_string(&doc).unwrap();
        let reparsed: ProcessDocument = serde_yaml::from_str(&rendered).unwrap();
        match reparsed {
            ProcessDocument::CommandLineTool(tool) => {
                assert_eq!(tool.label.as_deref(), Some("echo"));
                assert!(tool.extra.contains_key("baseCommand"));
                assert!(tool.extra.contains_key("cwlVersion"));
            }
            _ => panic!("expected a tool document"),
        }
    }

    #[test]
    fn node_ids_compose() {
        let root = NodeId::root("pipeline");
        let step = root.child("simulate");
        let run = step.child("run");
        assert_eq!(run.as_str(), "pipeline/simulate/run");
    }
}
