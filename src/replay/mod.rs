//! Sequential replay of selected tasks.
//!
//! The controller walks the selected tasks one at a time: reverse-engineer
//! a prompt, provision a workspace at the task's base commit, run the
//! agent, capture and compare the resulting diff, then record and release.
//! Tasks never run concurrently, so a buggy agent cannot cross-contaminate
//! checkouts.
//!
//! Every task that starts ends in exactly one database record, flushed
//! immediately, so a crash or cancellation loses at most the in-flight
//! task. Failures inside one task never abort the run.

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::compare;
use crate::discovery::Task;
use crate::llm::{select_tasks, BoundedRetry, Collaborator};
use crate::runner::{SessionOutcome, TaskRunner};
use crate::storage::{RecordStore, SessionRecord, SessionStatus};
use crate::workspace::{ReleaseOutcome, WorkspaceManager};

/// Counts for one finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Tasks never started: dropped at selection or left behind by a
    /// cancelled run.
    pub skipped: u64,
    pub cancelled: bool,
}

/// Drives the replay of a task list against one agent.
pub struct ReplayController<C: Collaborator> {
    collaborator: BoundedRetry<C>,
    workspaces: WorkspaceManager,
    runner: TaskRunner,
    model: String,
}

impl<C: Collaborator> ReplayController<C> {
    pub fn new(
        collaborator: C,
        workspaces: WorkspaceManager,
        runner: TaskRunner,
        model: &str,
    ) -> Self {
        Self {
            collaborator: BoundedRetry::new(collaborator),
            workspaces,
            runner,
            model: model.to_string(),
        }
    }

    /// Pick `count` tasks, falling back to the first `count` candidates
    /// when the collaborator's selection is unusable.
    pub async fn select(
        &self,
        candidates: &[Task],
        count: usize,
        instructions: Option<&str>,
    ) -> Vec<Task> {
        match select_tasks(&self.collaborator, &self.model, candidates, count, instructions).await {
            Ok(selected) => selected,
            Err(e) => {
                warn!(error = %e, "selection unusable, taking the first {count} candidates");
                candidates.iter().take(count).cloned().collect()
            }
        }
    }

    /// Replay each task in order, appending one record per task.
    ///
    /// Cancellation is observed between tasks: the in-flight task finishes
    /// and is recorded before the run stops.
    pub async fn run(
        &self,
        tasks: &[Task],
        store: &mut RecordStore,
        cancel: &mut watch::Receiver<bool>,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        for (i, task) in tasks.iter().enumerate() {
            if *cancel.borrow() {
                info!(remaining = tasks.len() - i, "run cancelled");
                summary.skipped += (tasks.len() - i) as u64;
                summary.cancelled = true;
                break;
            }

            info!(task_id = task.id, title = %task.title, "replaying task {}/{}", i + 1, tasks.len());
            let record = self.replay_one(task).await;

            match record.status {
                SessionStatus::Completed => summary.completed += 1,
                SessionStatus::Failed => summary.failed += 1,
                SessionStatus::TimedOut => summary.timed_out += 1,
            }
            summary.executed += 1;

            if let Err(e) = store.append(record) {
                // Persistence failure is the one thing worth surfacing loudly:
                // the run continues but this record is lost on disk.
                error!(task_id = task.id, error = %e, "failed to flush session record");
            }
        }

        summary
    }

    /// Take one task to a terminal state and build its record.
    async fn replay_one(&self, task: &Task) -> SessionRecord {
        let started_at = Utc::now();

        let prompt = match crate::llm::generate_replay_prompt(&self.collaborator, &self.model, task)
            .await
        {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(task_id = task.id, error = %e, "prompt generation failed");
                return failed_record(task, String::new(), e.to_string(), started_at);
            }
        };
        info!(task_id = task.id, "replay prompt ready");

        let workspace = match self.workspaces.provision(task) {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(task_id = task.id, error = %e, "workspace provisioning failed");
                return failed_record(task, prompt, e.to_string(), started_at);
            }
        };

        let outcome = self.runner.run(task.id, &prompt, &workspace).await;

        // Diff capture happens before release, while the checkout exists.
        // A capture failure costs the comparison, never the record.
        let (agent_diff, comparison) = match compare::capture_workspace_changes(&workspace.root) {
            Ok(diff) => {
                let cmp = compare::compare_diffs(&diff, &task.diff);
                (Some(diff), Some(cmp))
            }
            Err(e) => {
                warn!(task_id = task.id, error = %e, "could not capture agent diff");
                (None, None)
            }
        };

        let release = match outcome.status {
            SessionStatus::Completed => ReleaseOutcome::Remove,
            SessionStatus::Failed | SessionStatus::TimedOut => ReleaseOutcome::Archive,
        };
        if let Err(e) = self.workspaces.release(workspace, release) {
            warn!(task_id = task.id, error = %e, "workspace release failed");
        }

        build_record(task, prompt, outcome, agent_diff, comparison, started_at)
    }
}

fn build_record(
    task: &Task,
    prompt: String,
    outcome: SessionOutcome,
    agent_diff: Option<String>,
    comparison: Option<compare::DiffComparison>,
    started_at: chrono::DateTime<Utc>,
) -> SessionRecord {
    SessionRecord {
        task_id: task.id,
        task_title: task.title.clone(),
        task_url: task.url.clone(),
        prompt,
        session_id: Some(outcome.session_id),
        status: outcome.status,
        error: outcome.error,
        summary: outcome.summary,
        comparison,
        agent_diff,
        started_at,
        finished_at: Utc::now(),
    }
}

fn failed_record(
    task: &Task,
    prompt: String,
    error: String,
    started_at: chrono::DateTime<Utc>,
) -> SessionRecord {
    SessionRecord {
        task_id: task.id,
        task_title: task.title.clone(),
        task_url: task.url.clone(),
        prompt,
        session_id: None,
        status: SessionStatus::Failed,
        error: Some(error),
        summary: None,
        comparison: None,
        agent_diff: None,
        started_at,
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::llm::testing::StubCollaborator;
    use crate::runner::{AgentConfig, CapabilityProfile};
    use crate::storage::Database;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    fn run_git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("run git");
        assert!(output.status.success(), "git {args:?} failed");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn seed_repo(dir: &Path) -> String {
        run_git(dir, &["init", "-q"]);
        run_git(dir, &["config", "user.email", "test@test"]);
        run_git(dir, &["config", "user.name", "test"]);
        fs::write(dir.join("a.txt"), "one\n").expect("write");
        run_git(dir, &["add", "."]);
        run_git(dir, &["commit", "-q", "-m", "init"]);
        run_git(dir, &["rev-parse", "HEAD"])
    }

    fn task(id: u64, base_commit: &str) -> Task {
        Task {
            id,
            title: format!("change {id}"),
            body: None,
            url: format!("https://github.com/o/r/pull/{id}"),
            author: "dev".to_string(),
            base_commit: base_commit.to_string(),
            head_commit: "head".to_string(),
            merged_at: String::new(),
            additions: 1,
            deletions: 0,
            changed_files: 1,
            diff: "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1 +1,2 @@
 one
+two
"
            .to_string(),
        }
    }

    /// A fake agent that records a session log and edits a workspace file.
    fn fake_agent(dir: &Path, log_root: &Path) -> String {
        let script = format!(
            "#!/bin/sh\n\
             sid=\"\"\n\
             while [ $# -gt 0 ]; do\n\
               if [ \"$1\" = \"--session-id\" ]; then sid=\"$2\"; fi\n\
               shift\n\
             done\n\
             project=\"{log_root}/$(pwd | tr '/' '-')\"\n\
             mkdir -p \"$project\"\n\
             log=\"$project/$sid.jsonl\"\n\
             echo '{{\"message\":{{\"content\":[{{\"type\":\"tool_use\",\"name\":\"Read\",\"input\":{{\"file_path\":\"a.txt\"}}}}]}}}}' > \"$log\"\n\
             echo '{{\"message\":{{\"content\":[{{\"type\":\"tool_use\",\"name\":\"Edit\",\"input\":{{\"file_path\":\"a.txt\"}}}}]}}}}' >> \"$log\"\n\
             echo 'agent-change' >> a.txt\n\
             exit 0\n",
            log_root = log_root.display(),
        );
        let path = dir.join("fake-agent.sh");
        fs::write(&path, script).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path.to_string_lossy().to_string()
    }

    struct Harness {
        _dir: TempDir,
        controller: ReplayController<StubCollaborator>,
        store: RecordStore,
        base_commit: String,
        worktree_base: std::path::PathBuf,
    }

    fn harness(collaborator: StubCollaborator) -> Harness {
        let dir = TempDir::new().expect("tempdir");
        let repo = dir.path().join("repo");
        fs::create_dir(&repo).expect("mkdir");
        let base_commit = seed_repo(&repo);

        let work_base = dir.path().join("work");
        let logs = dir.path().join("logs");
        let agent = fake_agent(dir.path(), &logs);

        let workspaces = WorkspaceManager::open(&repo, &work_base);
        let runner = TaskRunner::new(AgentConfig {
            executable: agent,
            model: "test-model".to_string(),
            timeout_secs: 30,
            capabilities: CapabilityProfile::default(),
            log_root: logs,
        });

        let db = Database::new("o", "r", "u", 30);
        let store = RecordStore::create(dir.path().join("db.json"), db).expect("store");

        Harness {
            controller: ReplayController::new(collaborator, workspaces, runner, "test-model"),
            store,
            base_commit,
            worktree_base: work_base.join("worktrees"),
            _dir: dir,
        }
    }

    fn fresh_cancel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn completed_task_produces_full_record() {
        let mut h = harness(StubCollaborator::always("Add the second line."));
        let tasks = vec![task(1, &h.base_commit)];
        let (_tx, mut cancel) = fresh_cancel();

        let summary = h.controller.run(&tasks, &mut h.store, &mut cancel).await;
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.skipped, 0);
        assert!(!summary.cancelled);

        let db = h.store.database();
        assert_eq!(db.sessions.len(), 1);
        let record = &db.sessions[0];
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(record.prompt, "Add the second line.");
        assert!(record.session_id.is_some());

        let session = record.summary.as_ref().expect("summary");
        assert_eq!(session.files_read, vec!["a.txt"]);
        assert_eq!(session.files_edited, vec!["a.txt"]);

        let cmp = record.comparison.as_ref().expect("comparison");
        assert_eq!(cmp.common_files, vec!["a.txt"]);

        // Completed workspaces are removed.
        assert!(!h.worktree_base.join("task-1").exists());
    }

    #[tokio::test]
    async fn prompt_failure_yields_failed_record() {
        let mut h = harness(StubCollaborator::new(vec![Err(
            CollaboratorError::ParseError("bad".to_string()),
        )]));
        let tasks = vec![task(1, &h.base_commit)];
        let (_tx, mut cancel) = fresh_cancel();

        let summary = h.controller.run(&tasks, &mut h.store, &mut cancel).await;
        assert_eq!(summary.failed, 1);

        let record = &h.store.database().sessions[0];
        assert_eq!(record.status, SessionStatus::Failed);
        assert!(record.session_id.is_none());
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn unresolvable_commit_yields_failed_record() {
        let mut h = harness(StubCollaborator::always("prompt"));
        let tasks = vec![task(1, "0000000000000000000000000000000000000000")];
        let (_tx, mut cancel) = fresh_cancel();

        let summary = h.controller.run(&tasks, &mut h.store, &mut cancel).await;
        assert_eq!(summary.failed, 1);

        let record = &h.store.database().sessions[0];
        assert_eq!(record.status, SessionStatus::Failed);
        assert!(record
            .error
            .as_ref()
            .expect("error")
            .contains("could not be resolved"));
    }

    #[tokio::test]
    async fn two_tasks_run_sequentially_into_two_records() {
        let mut h = harness(StubCollaborator::always("prompt"));
        let tasks = vec![task(1, &h.base_commit), task(2, &h.base_commit)];
        let (_tx, mut cancel) = fresh_cancel();

        let summary = h.controller.run(&tasks, &mut h.store, &mut cancel).await;
        assert_eq!(summary.executed, 2);
        assert_eq!(summary.completed, 2);

        let db = h.store.database();
        assert_eq!(db.sessions.len(), 2);
        assert_ne!(db.sessions[0].session_id, db.sessions[1].session_id);
        assert_eq!(db.sessions[0].task_id, 1);
        assert_eq!(db.sessions[1].task_id, 2);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_task() {
        let mut h = harness(StubCollaborator::always("prompt"));
        let tasks = vec![task(1, &h.base_commit), task(2, &h.base_commit)];
        let (tx, mut cancel) = fresh_cancel();
        tx.send(true).expect("send");

        let summary = h.controller.run(&tasks, &mut h.store, &mut cancel).await;
        assert_eq!(summary.executed, 0);
        assert_eq!(summary.skipped, 2);
        assert!(summary.cancelled);
        assert!(h.store.database().sessions.is_empty());
    }

    #[tokio::test]
    async fn selection_falls_back_on_unusable_response() {
        let h = harness(StubCollaborator::always("no json here"));
        let candidates: Vec<Task> = (1..=5).map(|i| task(i, &h.base_commit)).collect();

        let selected = h.controller.select(&candidates, 2, None).await;
        let ids: Vec<u64> = selected.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
