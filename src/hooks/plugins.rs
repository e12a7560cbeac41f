//! Built-in hook plugins.

use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::registry::{PluginConfig, PluginFactory};
use super::{CommandSpec, HookPlugin};

/// Default plugin: runs the payload as-is, no extra commands.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct UserPlugin {}

impl HookPlugin for UserPlugin {
    fn key(&self) -> &str {
        "user"
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enable_monitoring() -> bool {
    true
}

fn default_admin_level() -> u32 {
    1
}

/// Operator plugin: adjusts the engine's verbosity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdminPlugin {
    pub log_level: String,
    pub enable_monitoring: bool,
    pub admin_level: u32,
}

impl Default for AdminPlugin {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_monitoring: default_enable_monitoring(),
            admin_level: default_admin_level(),
        }
    }
}

impl HookPlugin for AdminPlugin {
    fn key(&self) -> &str {
        "admin"
    }

    fn engine_args(&self) -> Vec<String> {
        if self.log_level == "info" {
            return Vec::new();
        }
        vec!["--log-level".to_string(), self.log_level.clone()]
    }
}

fn default_archive() -> String {
    "output.sandbox.tgz".to_string()
}

/// Sandbox plugin: stages input files into the working directory before the
/// run and archives declared outputs afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxPlugin {
    pub input_sandbox: Vec<String>,
    pub output_sandbox: Vec<String>,
    pub archive: String,
}

impl Default for SandboxPlugin {
    fn default() -> Self {
        Self {
            input_sandbox: Vec::new(),
            output_sandbox: Vec::new(),
            archive: default_archive(),
        }
    }
}

impl HookPlugin for SandboxPlugin {
    fn key(&self) -> &str {
        "sandbox"
    }

    fn pre_commands(&self) -> Vec<CommandSpec> {
        self.input_sandbox
            .iter()
            .map(|path| CommandSpec::new("cp", [path.as_str(), "."]))
            .collect()
    }

    fn post_commands(&self) -> Vec<CommandSpec> {
        if self.output_sandbox.is_empty() {
            return Vec::new();
        }
        let mut args = vec!["czf".to_string(), self.archive.clone()];
        args.extend(self.output_sandbox.iter().cloned());
        vec![CommandSpec::new("tar", args)]
    }
}

/// Factory that deserializes the hint configuration into a plugin struct.
struct SerdeFactory<P> {
    key: &'static str,
    _marker: std::marker::PhantomData<fn() -> P>,
}

impl<P> SerdeFactory<P> {
    fn new(key: &'static str) -> Self {
        Self {
            key,
            _marker: std::marker::PhantomData,
        }
    }
}

fn config_value(config: &PluginConfig) -> serde_yaml::Value {
    let mapping: serde_yaml::Mapping = config
        .iter()
        .map(|(key, value)| (serde_yaml::Value::String(key.clone()), value.clone()))
        .collect();
    serde_yaml::Value::Mapping(mapping)
}

impl<P> PluginFactory for SerdeFactory<P>
where
    P: DeserializeOwned + HookPlugin + 'static,
{
    fn key(&self) -> &str {
        self.key
    }

    fn build(&self, config: &PluginConfig) -> anyhow::Result<Arc<dyn HookPlugin>> {
        let plugin: P = serde_yaml::from_value(config_value(config))
            .with_context(|| format!("invalid configuration for plugin `{}`", self.key))?;
        Ok(Arc::new(plugin))
    }
}

/// Factories for the built-in plugins, as discovery sources.
pub fn builtin_factories() -> Vec<anyhow::Result<Arc<dyn PluginFactory>>> {
    vec![
        Ok(Arc::new(SerdeFactory::<UserPlugin>::new("user")) as Arc<dyn PluginFactory>),
        Ok(Arc::new(SerdeFactory::<AdminPlugin>::new("admin")) as Arc<dyn PluginFactory>),
        Ok(Arc::new(SerdeFactory::<SandboxPlugin>::new("sandbox")) as Arc<dyn PluginFactory>),
    ]
}
