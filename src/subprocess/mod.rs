//! Unified async subprocess abstraction.
//!
//! Hook commands and the engine invocation both go through [`ProcessRunner`]
//! so tests can substitute [`MockProcessRunner`] without touching the
//! pipeline logic.

pub mod error;
pub mod mock;
pub mod runner;

pub use error::ProcessError;
pub use mock::MockProcessRunner;
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
