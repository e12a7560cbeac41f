//! Scriptable process runner for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner};

/// Replays canned responses keyed by program name and records every call.
/// Programs with no scripted response succeed with empty output.
#[derive(Clone, Default)]
pub struct MockProcessRunner {
    responses: Arc<Mutex<HashMap<String, ExitStatus>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the exit status returned whenever `program` is invoked.
    pub fn respond(&self, program: &str, status: ExitStatus) {
        self.responses
            .lock()
            .unwrap()
            .insert(program.to_string(), status);
    }

    pub fn calls(&self) -> Vec<ProcessCommand> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn called_programs(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.program.clone()).collect()
    }

    pub fn times_called(&self, program: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.program == program)
            .count()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let status = self
            .responses
            .lock()
            .unwrap()
            .get(&command.program)
            .cloned()
            .unwrap_or(ExitStatus::Success);
        self.call_history.lock().unwrap().push(command);

        Ok(ProcessOutput {
            status,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_millis(1),
        })
    }
}
