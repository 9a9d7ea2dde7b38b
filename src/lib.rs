//! agent-replay: Replay historical merged changes against an autonomous
//! coding agent and turn its interaction logs into comparable analytics.
//!
//! The pipeline discovers merged changes in a repository, reverse-engineers
//! a task prompt for each one, runs the agent in an isolated workspace pinned
//! at the change's base commit, normalizes the resulting session log, and
//! persists per-session records for aggregation and diff comparison.

pub mod cli;
pub mod compare;
pub mod discovery;
pub mod error;
pub mod events;
pub mod llm;
pub mod replay;
pub mod runner;
pub mod session;
pub mod stats;
pub mod storage;
pub mod workspace;

// Re-export commonly used error types
pub use error::{
    AgentExecutionError, CollaboratorError, ComparisonError, SelectionError, SetupError,
    StorageError, WorkspaceError,
};
