//! Execution-hook plugins.
//!
//! A hook plugin contributes ordered command lists that run before and after
//! the delegated main execution of a job, and may extend the engine's own
//! argument list. Plugins are polymorphic over those capabilities: the trait
//! defaults every capability to "supplies nothing", so a concrete plugin
//! implements only what it needs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod plugins;
pub mod registry;

pub use plugins::{builtin_factories, AdminPlugin, SandboxPlugin, UserPlugin};
pub use registry::{HookRegistry, PluginConfig, PluginFactory};

/// One hook command: a program plus its arguments. Parsed from a shell-style
/// line, executed without a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CommandSpecError {
    #[error("empty command")]
    Empty,

    #[error("unparsable command `{line}`: {source}")]
    Parse {
        line: String,
        source: shell_words::ParseError,
    },
}

impl CommandSpec {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a shell-style line into program and arguments.
    pub fn parse(line: &str) -> Result<Self, CommandSpecError> {
        let mut words = shell_words::split(line).map_err(|source| CommandSpecError::Parse {
            line: line.to_string(),
            source,
        })?;
        if words.is_empty() {
            return Err(CommandSpecError::Empty);
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
        })
    }

    pub fn display_line(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.clone());
        words.extend(self.args.iter().cloned());
        shell_words::join(&words)
    }
}

/// A configured execution-hook plugin, resolved once per submission.
pub trait HookPlugin: Send + Sync {
    fn key(&self) -> &str;

    /// Commands to run, in order, before the delegated run step.
    fn pre_commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// Commands to run, in order, after a successful run step.
    fn post_commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// Extra arguments appended to the external engine invocation.
    fn engine_args(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_command_line() {
        let spec = CommandSpec::parse(r#"cp "input file.tar" ."#).unwrap();
        assert_eq!(spec.program, "cp");
        assert_eq!(spec.args, vec!["input file.tar", "."]);
    }

    #[test]
    fn empty_line_is_rejected() {
        assert!(matches!(
            CommandSpec::parse("   "),
            Err(CommandSpecError::Empty)
        ));
    }

    #[test]
    fn display_line_round_trips() {
        let spec = CommandSpec::new("tar", ["czf", "out put.tgz"]);
        let reparsed = CommandSpec::parse(&spec.display_line()).unwrap();
        assert_eq!(reparsed, spec);
    }
}
