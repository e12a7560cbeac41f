//! Resource-bound resolution across the composition tree.
//!
//! Each resource kind is resolved independently. Along every root-to-node
//! path the resolver carries an inherited floor (the largest ancestor `min`)
//! and an inherited cap (the smallest ancestor `max`); a node that cannot
//! fit inside them is the node reported, never the ancestor. Resolution is
//! fail-fast: the first conflict in pre-order traversal ends the pass.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use super::{NodeId, ProcessNode, ResourceKind, ResourceSet, SourceRef, WorkflowStep};

/// How far up the tree bound tightening reaches.
///
/// `Transitive` accumulates every ancestor level. `ImmediateParent` compares
/// a node only against the nearest constrained level, reproducing what
/// shallow two-level validators check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritancePolicy {
    #[default]
    Transitive,
    ImmediateParent,
}

/// Resolved `{min, max}` for one resource kind. Invariant: `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: u64,
    pub max: u64,
}

/// Per-node resolved bounds for every resource kind. `None` means the kind
/// is unconstrained at this node (no declaration anywhere on its path).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EffectiveBounds {
    pub cores: Option<Bounds>,
    pub ram: Option<Bounds>,
}

impl EffectiveBounds {
    pub fn get(&self, kind: ResourceKind) -> Option<Bounds> {
        match kind {
            ResourceKind::Cores => self.cores,
            ResourceKind::Ram => self.ram,
        }
    }

    fn set(&mut self, kind: ResourceKind, bounds: Option<Bounds>) {
        match kind {
            ResourceKind::Cores => self.cores = bounds,
            ResourceKind::Ram => self.ram = bounds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The node's own declaration is inconsistent (`min > max`).
    SelfDeclared,
    /// The node's declaration cannot fit inside its ancestors' bounds.
    Inherited,
}

/// The single conflict that halted a resolution pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{detail}")]
pub struct Conflict {
    pub node: NodeId,
    pub resource: ResourceKind,
    pub kind: ConflictKind,
    /// Human-readable reason, suitable for direct CLI display.
    pub detail: String,
}

/// Walks a loaded tree and computes per-node effective bounds.
#[derive(Debug, Clone, Default)]
pub struct ResourceResolver {
    policy: InheritancePolicy,
}

impl ResourceResolver {
    pub fn new(policy: InheritancePolicy) -> Self {
        Self { policy }
    }

    /// Resolve every node's effective bounds, or return the first conflict
    /// found in pre-order traversal. Later, independent conflicts elsewhere
    /// in the tree are never discovered in the same pass.
    pub fn resolve(
        &self,
        tree: &ProcessNode,
    ) -> Result<HashMap<NodeId, EffectiveBounds>, Conflict> {
        let mut bounds = HashMap::new();
        self.visit_node(tree, &EffectiveBounds::default(), &mut bounds)?;
        debug!(nodes = bounds.len(), "resource bounds resolved");
        Ok(bounds)
    }

    fn visit_node(
        &self,
        node: &ProcessNode,
        inherited: &EffectiveBounds,
        out: &mut HashMap<NodeId, EffectiveBounds>,
    ) -> Result<(), Conflict> {
        let (effective, passed_down) =
            self.merge_level(&node.id, &node.source, &node.resources, inherited)?;
        out.insert(node.id.clone(), effective);

        for step in &node.steps {
            let step_inherited = self.check_step(step, &passed_down)?;
            self.visit_node(&step.run, &step_inherited, out)?;
        }
        Ok(())
    }

    /// A step's own override forms an intermediate constraint level between
    /// the workflow and the step's run target. It is validated like a node
    /// but gets no entry in the bounds map.
    fn check_step(
        &self,
        step: &WorkflowStep,
        inherited: &EffectiveBounds,
    ) -> Result<EffectiveBounds, Conflict> {
        let (_, passed_down) =
            self.merge_level(&step.id, &step.source, &step.overrides, inherited)?;
        Ok(passed_down)
    }

    /// Check one constraint level against the bounds inherited from above.
    /// Returns the level's effective bounds and the bounds to pass down.
    fn merge_level(
        &self,
        id: &NodeId,
        source: &SourceRef,
        declared: &ResourceSet,
        inherited: &EffectiveBounds,
    ) -> Result<(EffectiveBounds, EffectiveBounds), Conflict> {
        let mut effective = EffectiveBounds::default();
        let mut passed_down = EffectiveBounds::default();

        for kind in ResourceKind::ALL {
            let inherited_bounds = inherited.get(kind);
            let merged = match declared.interval(kind).pair() {
                None => inherited_bounds,
                Some((min, max)) => {
                    if min > max {
                        return Err(conflict_self(id, source, kind, min, max));
                    }
                    match inherited_bounds {
                        None => Some(Bounds { min, max }),
                        Some(inh) => {
                            if min > inh.max {
                                return Err(conflict_inherited(
                                    id, source, kind, "Min", min, "Max", inh.max,
                                ));
                            }
                            if max < inh.min {
                                return Err(conflict_inherited(
                                    id, source, kind, "Max", max, "Min", inh.min,
                                ));
                            }
                            Some(Bounds {
                                min: min.max(inh.min),
                                max: max.min(inh.max),
                            })
                        }
                    }
                }
            };
            effective.set(kind, merged);

            let down = match self.policy {
                InheritancePolicy::Transitive => merged,
                // Only the nearest constrained level binds descendants.
                InheritancePolicy::ImmediateParent => match declared.interval(kind).pair() {
                    Some((min, max)) => Some(Bounds { min, max }),
                    None => inherited_bounds,
                },
            };
            passed_down.set(kind, down);
        }

        Ok((effective, passed_down))
    }
}

fn conflict_self(
    id: &NodeId,
    source: &SourceRef,
    kind: ResourceKind,
    min: u64,
    max: u64,
) -> Conflict {
    Conflict {
        node: id.clone(),
        resource: kind,
        kind: ConflictKind::SelfDeclared,
        detail: format!(
            "{kind}Min ({min}) is higher than {kind}Max ({max}) in {id} ({})",
            source.file.display()
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn conflict_inherited(
    id: &NodeId,
    source: &SourceRef,
    kind: ResourceKind,
    own_side: &str,
    own: u64,
    inherited_side: &str,
    inherited: u64,
) -> Conflict {
    let relation = if own_side == "Min" { "higher" } else { "lower" };
    Conflict {
        node: id.clone(),
        resource: kind,
        kind: ConflictKind::Inherited,
        detail: format!(
            "{kind}{own_side} ({own}) is {relation} than inherited {kind}{inherited_side} \
             ({inherited}) in {id} ({})",
            source.file.display()
        ),
    }
}

/// Production-submission rule: a production workflow must not carry a
/// root-level ResourceRequirement; per-step constraints remain allowed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("a root-level ResourceRequirement is not allowed in production workflows ({node} in {})", file.display())]
pub struct ProductionRuleViolation {
    pub node: NodeId,
    pub file: PathBuf,
}

pub fn validate_production(tree: &ProcessNode) -> Result<(), ProductionRuleViolation> {
    if tree.resources.is_unconstrained() {
        Ok(())
    } else {
        Err(ProductionRuleViolation {
            node: tree.id.clone(),
            file: tree.source.file.clone(),
        })
    }
}
