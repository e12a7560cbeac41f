use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("process timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
