use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::ProcessError;

/// One command invocation: program, arguments, environment additions, an
/// optional working directory and an optional timeout.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }
}

/// Seam for spawning external processes; the pipeline and the engine runner
/// only ever talk to this trait, so tests substitute a mock.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

/// Production runner on top of `tokio::process`.
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    fn configure(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    fn parse_exit_status(status: std::process::ExitStatus) -> ExitStatus {
        if status.success() {
            ExitStatus::Success
        } else if let Some(code) = status.code() {
            ExitStatus::Error(code)
        } else {
            Self::parse_signal_status(status)
        }
    }

    #[cfg(unix)]
    fn parse_signal_status(status: std::process::ExitStatus) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        match status.signal() {
            Some(signal) => ExitStatus::Signal(signal),
            None => ExitStatus::Error(1),
        }
    }

    #[cfg(not(unix))]
    fn parse_signal_status(_status: std::process::ExitStatus) -> ExitStatus {
        ExitStatus::Error(1)
    }

    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            ProcessError::SpawnFailed {
                command: command.display_line(),
                source: error,
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let start = std::time::Instant::now();
        debug!(command = %command.display_line(), cwd = ?command.working_dir, "spawning process");

        let child = Self::configure(&command)
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, &command))?;

        let output = match command.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(command = %command.display_line(), ?limit, "process timed out");
                    return Err(ProcessError::Timeout(limit));
                }
            },
            None => child.wait_with_output().await?,
        };

        let status = Self::parse_exit_status(output.status);
        let result = ProcessOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        };

        match &result.status {
            ExitStatus::Success => {
                debug!(command = %command.display_line(), duration = ?result.duration, "process succeeded");
            }
            ExitStatus::Error(code) => {
                debug!(command = %command.display_line(), code, "process failed");
            }
            ExitStatus::Signal(signal) => {
                warn!(command = %command.display_line(), signal, "process terminated by signal");
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_simple_command() {
        let mut command = ProcessCommand::new("sh");
        command.args = vec!["-c".to_string(), "echo hello".to_string()];

        let output = TokioProcessRunner.run(command).await.unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let mut command = ProcessCommand::new("sh");
        command.args = vec!["-c".to_string(), "exit 3".to_string()];

        let output = TokioProcessRunner.run(command).await.unwrap();
        assert_eq!(output.status, ExitStatus::Error(3));
        assert_eq!(output.status.code(), Some(3));
    }

    #[tokio::test]
    async fn missing_program_is_command_not_found() {
        let command = ProcessCommand::new("preflight-no-such-program");
        let err = TokioProcessRunner.run(command).await.unwrap_err();
        assert!(matches!(err, ProcessError::CommandNotFound(_)));
    }

    #[tokio::test]
    async fn timeout_is_an_error() {
        let mut command = ProcessCommand::new("sh");
        command.args = vec!["-c".to_string(), "sleep 5".to_string()];
        command.timeout = Some(Duration::from_millis(50));

        let err = TokioProcessRunner.run(command).await.unwrap_err();
        assert!(matches!(err, ProcessError::Timeout(_)));
    }

    #[tokio::test]
    async fn respects_working_dir_and_env() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut command = ProcessCommand::new("sh");
        command.args = vec!["-c".to_string(), "pwd && echo $PREFLIGHT_TEST".to_string()];
        command.working_dir = Some(dir.path().to_path_buf());
        command
            .env
            .insert("PREFLIGHT_TEST".to_string(), "42".to_string());

        let output = TokioProcessRunner.run(command).await.unwrap();
        let canonical = std::fs::canonicalize(dir.path()).unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next().unwrap(), canonical.to_string_lossy());
        assert_eq!(lines.next().unwrap(), "42");
    }
}
