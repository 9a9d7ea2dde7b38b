//! Error types for agent-replay operations.
//!
//! One taxonomy per subsystem:
//! - Setup and task discovery
//! - Collaborator (LLM) calls and task selection
//! - Workspace provisioning and release
//! - Agent execution
//! - Diff comparison
//! - Database persistence
//!
//! Setup errors abort a run before any task executes. Everything else is
//! scoped to a single task or record and never takes the whole run down.

use thiserror::Error;

/// Fatal errors raised before any task runs.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Could not parse repository target '{0}': expected a GitHub URL or local git path")]
    InvalidTarget(String),

    #[error("Path is not a git repository: {0}")]
    NotARepository(String),

    #[error("Failed to clone repository '{url}': {reason}")]
    CloneFailed { url: String, reason: String },

    #[error("Task discovery is unavailable: {0}")]
    DiscoveryUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the selection/prompt-generation collaborator.
///
/// Selection errors are recoverable: the run falls back to a default
/// selection instead of aborting.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("Collaborator returned no usable selection: {0}")]
    UnusableResponse(String),

    #[error("Collaborator call failed: {0}")]
    Collaborator(#[from] CollaboratorError),
}

/// Errors from a single LLM completion call.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("Missing API key: set OPENROUTER_API_KEY or pass --api-key")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Empty completion from model '{0}'")]
    EmptyCompletion(String),

    #[error("Failed to parse completion: {0}")]
    ParseError(String),
}

impl CollaboratorError {
    /// Whether a bounded retry is worth attempting.
    ///
    /// Collaborator calls are idempotent reads against a stateless service,
    /// so transient transport failures and rate limits may be retried.
    /// Configuration errors and parse failures are not transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollaboratorError::RequestFailed(_)
                | CollaboratorError::RateLimited(_)
                | CollaboratorError::ApiError { code: 500..=599, .. }
        )
    }
}

/// Errors from workspace provisioning or release.
///
/// Fatal to one task only: the task is recorded as FAILED and the run
/// continues.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Base commit '{commit}' for task {task_id} could not be resolved: {reason}")]
    UnresolvableCommit {
        task_id: u64,
        commit: String,
        reason: String,
    },

    #[error("Worktree checkout failed for task {task_id}: {reason}")]
    CheckoutFailed { task_id: u64, reason: String },

    #[error("Worktree removal failed at {path}: {reason}")]
    RemovalFailed { path: String, reason: String },

    #[error("Failed to archive failed workspace to {path}: {reason}")]
    ArchiveFailed { path: String, reason: String },

    #[error("Git command failed: {0}")]
    Git(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from running the agent subprocess.
///
/// Always recorded on the session record, never dropped, never aborts the run.
#[derive(Debug, Error)]
pub enum AgentExecutionError {
    #[error("Agent executable '{0}' is not available")]
    AgentNotFound(String),

    #[error("Failed to spawn agent process: {0}")]
    SpawnFailed(String),

    #[error("Agent exited with code {code}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Agent timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Agent exited cleanly but no session log was found under {0}")]
    MissingLog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from diff comparison.
///
/// A session record stands without a comparison when one of these occurs;
/// aggregation is never blocked.
#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error("Could not capture workspace diff: {0}")]
    CaptureFailed(String),

    #[error("Unreadable diff: {0}")]
    UnreadableDiff(String),
}

/// Errors from database persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database not found at {0}")]
    NotFound(String),
}
