//! Agent execution for a single task.
//!
//! One runner invocation drives one task through a fixed state machine:
//! Pending, PromptReady, Running, then exactly one of Completed, Failed,
//! or TimedOut. Every invocation produces exactly one [`SessionOutcome`],
//! whatever went wrong. The agent is never retried: its side effects on
//! the workspace are not idempotent, so a failed or timed-out session is
//! recorded as-is.
//!
//! The agent writes its session log under a projects directory keyed by
//! the encoded workspace path. On timeout the partially written log is
//! still harvested, so long sessions contribute events even when they
//! never finish.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AgentExecutionError;
use crate::events;
use crate::session::SessionSummary;
use crate::storage::SessionStatus;
use crate::workspace::Workspace;

/// Lifecycle states of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Pending,
    PromptReady,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl RunnerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunnerState::Completed | RunnerState::Failed | RunnerState::TimedOut
        )
    }

    /// Legal forward edges of the state machine.
    pub fn can_advance_to(&self, next: RunnerState) -> bool {
        matches!(
            (self, next),
            (RunnerState::Pending, RunnerState::PromptReady)
                | (RunnerState::PromptReady, RunnerState::Running)
                | (RunnerState::PromptReady, RunnerState::Failed)
                | (RunnerState::Running, RunnerState::Completed)
                | (RunnerState::Running, RunnerState::Failed)
                | (RunnerState::Running, RunnerState::TimedOut)
        )
    }
}

/// Allow-list of tools the agent may use inside its workspace.
#[derive(Debug, Clone)]
pub struct CapabilityProfile {
    tools: Vec<String>,
}

impl Default for CapabilityProfile {
    fn default() -> Self {
        Self {
            tools: ["Read", "Edit", "Write", "MultiEdit", "Bash", "Grep", "Glob"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl CapabilityProfile {
    pub fn new(tools: Vec<String>) -> Self {
        Self { tools }
    }

    pub fn allows(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }

    /// Comma-joined form for the agent's --allowedTools flag.
    pub fn as_flag_value(&self) -> String {
        self.tools.join(",")
    }
}

/// Configuration for the agent subprocess.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent executable name or path.
    pub executable: String,
    pub model: String,
    pub timeout_secs: u64,
    pub capabilities: CapabilityProfile,
    /// Root directory where the agent writes per-project session logs.
    pub log_root: PathBuf,
}

impl AgentConfig {
    pub fn new(model: &str, timeout_secs: u64) -> Self {
        Self {
            executable: "claude".to_string(),
            model: model.to_string(),
            timeout_secs,
            capabilities: CapabilityProfile::default(),
            log_root: default_log_root(),
        }
    }
}

fn default_log_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".claude")
        .join("projects")
}

/// The single record-shaped result of one agent invocation.
#[derive(Debug)]
pub struct SessionOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    pub error: Option<String>,
    pub summary: Option<SessionSummary>,
}

/// Runs the agent once per task.
pub struct TaskRunner {
    config: AgentConfig,
}

impl TaskRunner {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Execute the agent against a provisioned workspace.
    ///
    /// Infallible by construction: every error path folds into the
    /// outcome's terminal status instead of escaping.
    pub async fn run(&self, task_id: u64, prompt: &str, workspace: &Workspace) -> SessionOutcome {
        let mut state = RunnerState::Pending;
        let session_id = Uuid::new_v4().to_string();

        advance(&mut state, RunnerState::PromptReady, task_id);
        advance(&mut state, RunnerState::Running, task_id);
        info!(task_id, session_id = %session_id, "launching agent");

        let (terminal, error) = match self.execute(prompt, &session_id, &workspace.root).await {
            Ok(()) => (RunnerState::Completed, None),
            Err(AgentExecutionError::Timeout { seconds }) => (
                RunnerState::TimedOut,
                Some(AgentExecutionError::Timeout { seconds }.to_string()),
            ),
            Err(e) => (RunnerState::Failed, Some(e.to_string())),
        };
        advance(&mut state, terminal, task_id);

        // The log is harvested for every terminal state. A timed-out
        // session usually has a partial log worth keeping.
        let summary = self.harvest_log(&session_id, workspace);

        let status = match (terminal, &summary) {
            (RunnerState::Completed, None) => {
                // Clean exit with no log means nothing to analyze.
                warn!(task_id, session_id = %session_id, "agent exited cleanly but left no session log");
                return SessionOutcome {
                    session_id: session_id.clone(),
                    status: SessionStatus::Failed,
                    error: Some(
                        AgentExecutionError::MissingLog(
                            self.config.log_root.display().to_string(),
                        )
                        .to_string(),
                    ),
                    summary: None,
                };
            }
            (RunnerState::Completed, Some(_)) => SessionStatus::Completed,
            (RunnerState::TimedOut, _) => SessionStatus::TimedOut,
            _ => SessionStatus::Failed,
        };

        SessionOutcome {
            session_id,
            status,
            error,
            summary,
        }
    }

    async fn execute(
        &self,
        prompt: &str,
        session_id: &str,
        workspace_root: &Path,
    ) -> Result<(), AgentExecutionError> {
        let mut command = Command::new(&self.config.executable);
        command
            .arg("-p")
            .arg(prompt)
            .arg("--model")
            .arg(&self.config.model)
            .arg("--session-id")
            .arg(session_id)
            .arg("--allowedTools")
            .arg(self.config.capabilities.as_flag_value())
            .arg("--output-format")
            .arg("json")
            .current_dir(workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentExecutionError::AgentNotFound(self.config.executable.clone())
            } else {
                AgentExecutionError::SpawnFailed(e.to_string())
            }
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(drain(stdout));
        let stderr_task = tokio::spawn(drain(stderr));

        let wait = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            child.wait(),
        )
        .await;

        let status = match wait {
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                return Err(AgentExecutionError::Timeout {
                    seconds: self.config.timeout_secs,
                });
            }
            Ok(result) => result?,
        };

        let stdout_text = stdout_task.await.unwrap_or_default();
        let stderr_text = stderr_task.await.unwrap_or_default();
        debug!(bytes = stdout_text.len(), "agent stdout captured");

        if !status.success() {
            return Err(AgentExecutionError::NonZeroExit {
                code: status.code().unwrap_or(-1),
                stderr: stderr_text,
            });
        }

        Ok(())
    }

    /// Locate and fold the session log into a summary.
    ///
    /// The exact session file is preferred; when the agent recorded under a
    /// different id, the most-recently-modified log in the workspace's
    /// project directory is taken instead.
    fn harvest_log(&self, session_id: &str, workspace: &Workspace) -> Option<SessionSummary> {
        let exact = session_log_path(&self.config.log_root, &workspace.root, session_id);
        let path = if exact.exists() {
            exact
        } else {
            let fallback = newest_log(exact.parent()?)?;
            debug!(path = %fallback.display(), "session log found under a different id");
            fallback
        };

        match events::normalize_file(&path, session_id, Some(&workspace.root)) {
            Ok(stream) => Some(SessionSummary::from_events(stream)),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no session log to harvest");
                None
            }
        }
    }
}

fn advance(state: &mut RunnerState, next: RunnerState, task_id: u64) {
    debug_assert!(state.can_advance_to(next), "illegal transition {state:?} -> {next:?}");
    debug!(task_id, from = ?state, to = ?next, "runner state change");
    *state = next;
}

async fn drain<R: AsyncReadExt + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).to_string()
}

/// Most-recently-modified .jsonl log in a project directory.
fn newest_log(project_dir: &Path) -> Option<PathBuf> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(project_dir).ok()? {
        let entry = entry.ok()?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let modified = entry.metadata().ok()?.modified().ok()?;
        let newer = newest.as_ref().map_or(true, |(t, _)| modified > *t);
        if newer {
            newest = Some((modified, path));
        }
    }
    newest.map(|(_, path)| path)
}

/// Path where the agent writes this session's log.
///
/// The agent keys project directories by the workspace path with every
/// path separator replaced by '-'.
pub fn session_log_path(log_root: &Path, workspace_root: &Path, session_id: &str) -> PathBuf {
    let encoded = workspace_root.to_string_lossy().replace('/', "-");
    log_root.join(encoded).join(format!("{session_id}.jsonl"))
}
