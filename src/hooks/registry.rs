//! Plugin registry with isolated discovery.
//!
//! Factories are registered by key at startup. A factory that fails to load
//! is logged and skipped so the remaining plugins stay usable; resolution of
//! an unknown key falls back to the default plugin instead of failing the
//! submission.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::workflow::hints::ExecutionHooksHint;

use super::plugins::UserPlugin;
use super::HookPlugin;

/// Free-form plugin configuration carried by the execution-hooks hint.
pub type PluginConfig = BTreeMap<String, serde_yaml::Value>;

/// Builds a configured plugin instance from hint configuration.
pub trait PluginFactory: Send + Sync {
    fn key(&self) -> &str;

    fn build(&self, config: &PluginConfig) -> anyhow::Result<Arc<dyn HookPlugin>>;
}

pub struct HookRegistry {
    factories: BTreeMap<String, Arc<dyn PluginFactory>>,
    fallback: Arc<dyn HookPlugin>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            fallback: Arc::new(UserPlugin::default()),
        }
    }

    /// A registry preloaded with the built-in plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.discover(super::builtin_factories());
        registry
    }

    /// Register every factory a set of sources yields. A source that errors
    /// is skipped with a warning; a duplicate key keeps the first factory.
    pub fn discover(
        &mut self,
        sources: impl IntoIterator<Item = anyhow::Result<Arc<dyn PluginFactory>>>,
    ) {
        for source in sources {
            match source {
                Ok(factory) => self.register(factory),
                Err(err) => {
                    warn!("skipping plugin that failed to load: {err:#}");
                }
            }
        }
    }

    pub fn register(&mut self, factory: Arc<dyn PluginFactory>) {
        let key = factory.key().to_string();
        if self.factories.contains_key(&key) {
            warn!(%key, "duplicate plugin key, keeping the first registration");
            return;
        }
        debug!(%key, "registered hook plugin");
        self.factories.insert(key, factory);
    }

    /// Registered plugin keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Resolve the hint to a configured plugin. An unknown key falls back to
    /// the default plugin; a known key whose factory rejects the
    /// configuration is an error.
    pub fn resolve(&self, hint: &ExecutionHooksHint) -> anyhow::Result<Arc<dyn HookPlugin>> {
        let key = hint.hook_plugin.as_str();
        match self.factories.get(key) {
            Some(factory) => factory.build(&hint.configuration),
            None => {
                warn!(%key, "unknown hook plugin, using the default");
                Ok(Arc::clone(&self.fallback))
            }
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FailingPlugin;

    impl PluginFactory for FailingPlugin {
        fn key(&self) -> &str {
            "failing"
        }

        fn build(&self, _config: &PluginConfig) -> anyhow::Result<Arc<dyn HookPlugin>> {
            Err(anyhow!("bad configuration"))
        }
    }

    fn hint_for(key: &str) -> ExecutionHooksHint {
        ExecutionHooksHint {
            hook_plugin: key.to_string(),
            configuration: PluginConfig::new(),
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = HookRegistry::with_builtins();
        assert_eq!(registry.keys(), vec!["admin", "sandbox", "user"]);
    }

    #[test]
    fn failed_source_does_not_poison_discovery() {
        let mut registry = HookRegistry::new();
        let mut sources = super::super::builtin_factories();
        sources.insert(0, Err(anyhow!("broken module")));
        registry.discover(sources);
        assert_eq!(registry.keys(), vec!["admin", "sandbox", "user"]);
    }

    #[test]
    fn unknown_key_falls_back_to_default() {
        let registry = HookRegistry::with_builtins();
        let plugin = registry.resolve(&hint_for("no-such-plugin")).unwrap();
        assert_eq!(plugin.key(), "user");
        assert!(plugin.pre_commands().is_empty());
    }

    #[test]
    fn missing_key_uses_default_plugin() {
        let registry = HookRegistry::with_builtins();
        let plugin = registry.resolve(&ExecutionHooksHint::default()).unwrap();
        assert_eq!(plugin.key(), "user");
    }

    #[test]
    fn known_key_with_bad_config_is_an_error() {
        let mut registry = HookRegistry::new();
        registry.register(Arc::new(FailingPlugin));
        assert!(registry.resolve(&hint_for("failing")).is_err());
    }
}
