//! Extraction of preflight hint blocks from a document's `hints` list.
//!
//! Hints are class-keyed mappings riding along in the document. Two classes
//! are understood here: `preflight:execution-hooks` selects and configures a
//! hook plugin, `preflight:scheduling` carries placement hints that are
//! passed through to the scheduler untouched. Unknown hint classes are
//! ignored; malformed known hints are skipped with a warning rather than
//! failing the submission.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use super::{strip_class, ProcessNode};

pub const EXECUTION_HOOKS_CLASS: &str = "preflight:execution-hooks";
pub const SCHEDULING_CLASS: &str = "preflight:scheduling";

/// Default plugin key when a document names none.
pub const DEFAULT_HOOK_PLUGIN: &str = "user";

/// Serializable selection of a hook plugin plus its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHooksHint {
    pub hook_plugin: String,
    pub configuration: BTreeMap<String, serde_yaml::Value>,
}

impl Default for ExecutionHooksHint {
    fn default() -> Self {
        Self {
            hook_plugin: DEFAULT_HOOK_PLUGIN.to_string(),
            configuration: BTreeMap::new(),
        }
    }
}

impl ExecutionHooksHint {
    /// Extract the hook hint from a loaded node. Later hint entries override
    /// the plugin key and merge into the configuration of earlier ones.
    pub fn from_node(node: &ProcessNode) -> Self {
        let mut hint = Self::default();
        for entry in hint_entries(node, EXECUTION_HOOKS_CLASS) {
            let Some(mapping) = entry.as_mapping() else {
                continue;
            };
            for (key, value) in mapping {
                match key.as_str() {
                    Some("class") => {}
                    Some("hook_plugin") => {
                        if let Some(plugin) = value.as_str() {
                            hint.hook_plugin = plugin.to_string();
                        }
                    }
                    Some(other) => {
                        hint.configuration.insert(other.to_string(), value.clone());
                    }
                    None => {}
                }
            }
        }
        hint
    }
}

/// Placement hints this core forwards opaquely: target platform, priority,
/// candidate sites. Never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingHint {
    pub platform: Option<String>,
    pub priority: u32,
    pub sites: Option<Vec<String>>,
}

impl Default for SchedulingHint {
    fn default() -> Self {
        Self {
            platform: None,
            priority: 10,
            sites: None,
        }
    }
}

impl SchedulingHint {
    pub fn from_node(node: &ProcessNode) -> Self {
        let mut hint = Self::default();
        for entry in hint_entries(node, SCHEDULING_CLASS) {
            match serde_yaml::from_value::<SchedulingHint>(strip_class(entry)) {
                Ok(parsed) => hint = parsed,
                Err(e) => {
                    warn!(node = %node.id, error = %e, "skipping malformed scheduling hint");
                }
            }
        }
        hint
    }
}

fn hint_entries<'a>(
    node: &'a ProcessNode,
    class: &'a str,
) -> impl Iterator<Item = &'a serde_yaml::Value> {
    node.hints
        .iter()
        .filter(move |entry| entry.get("class").and_then(|c| c.as_str()) == Some(class))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::DocumentLoader;
    use std::fs;
    use tempfile::TempDir;

    fn load(yaml: &str) -> ProcessNode {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.cwl");
        fs::write(&path, yaml).unwrap();
        DocumentLoader::new().load(&path).unwrap()
    }

    #[test]
    fn defaults_when_no_hints_present() {
        let node = load("class: CommandLineTool\nbaseCommand: echo\n");
        let hooks = ExecutionHooksHint::from_node(&node);
        assert_eq!(hooks.hook_plugin, DEFAULT_HOOK_PLUGIN);
        assert!(hooks.configuration.is_empty());

        let scheduling = SchedulingHint::from_node(&node);
        assert_eq!(scheduling.priority, 10);
        assert!(scheduling.platform.is_none());
    }

    #[test]
    fn extracts_plugin_key_and_configuration() {
        let node = load(
            r#"
class: CommandLineTool
baseCommand: echo
hints:
  - class: preflight:execution-hooks
    hook_plugin: admin
    log_level: debug
  - class: some:other-hint
    ignored: true
"#,
        );
        let hint = ExecutionHooksHint::from_node(&node);
        assert_eq!(hint.hook_plugin, "admin");
        assert_eq!(
            hint.configuration.get("log_level").and_then(|v| v.as_str()),
            Some("debug")
        );
        assert!(!hint.configuration.contains_key("ignored"));
    }

    #[test]
    fn later_hook_hints_merge_over_earlier_ones() {
        let node = load(
            r#"
class: Workflow
steps: []
hints:
  - class: preflight:execution-hooks
    hook_plugin: sandbox
    input_sandbox: [data.tar]
  - class: preflight:execution-hooks
    archive: results.tgz
"#,
        );
        let hint = ExecutionHooksHint::from_node(&node);
        assert_eq!(hint.hook_plugin, "sandbox");
        assert!(hint.configuration.contains_key("input_sandbox"));
        assert!(hint.configuration.contains_key("archive"));
    }

    #[test]
    fn scheduling_hint_passes_through() {
        let node = load(
            r#"
class: CommandLineTool
baseCommand: echo
hints:
  - class: preflight:scheduling
    platform: dirac
    priority: 3
    sites: [LCG.CERN.ch]
"#,
        );
        let hint = SchedulingHint::from_node(&node);
        assert_eq!(hint.platform.as_deref(), Some("dirac"));
        assert_eq!(hint.priority, 3);
        assert_eq!(hint.sites.as_deref(), Some(&["LCG.CERN.ch".to_string()][..]));
    }

    #[test]
    fn malformed_scheduling_hint_is_skipped() {
        let node = load(
            r#"
class: CommandLineTool
baseCommand: echo
hints:
  - class: preflight:scheduling
    priority: not-a-number
"#,
        );
        let hint = SchedulingHint::from_node(&node);
        assert_eq!(hint.priority, 10);
    }
}
