//! # Preflight
//!
//! Validates and prepares hierarchically-composed workflow descriptions
//! before they are handed to an external CWL-compatible execution engine.
//!
//! A workflow description is a tree of process nodes (atomic tool invocations
//! and composite sub-workflows). Each node may declare resource bounds
//! (processing cores, memory) and may reference other workflow documents by
//! path. Preflight resolves those references into one composition tree,
//! validates resource-bound inheritance across the tree, and runs an ordered
//! chain of pre/post-execution hook commands around the delegated run step
//! with strict fail-fast semantics.
//!
//! ## Modules
//!
//! - `workflow` - composition-tree model, document loader, resource resolver
//! - `hooks` - execution-hook plugins and the dependency-injected registry
//! - `pipeline` - the pre/run/post state machine and job reporting
//! - `runner` - trait seam for the external execution engine
//! - `subprocess` - async process abstraction with a mock for testing
//! - `submission` - end-to-end load/resolve/prepare entry points
//! - `config` - construct-once configuration threaded through the above

pub mod config;
pub mod error;
pub mod hooks;
pub mod pipeline;
pub mod runner;
pub mod submission;
pub mod subprocess;
pub mod workflow;

pub use config::PreflightConfig;
pub use error::{PreflightError, Result};
pub use submission::{prepare_job, run_job, SubmissionKind};
