//! Offline end-to-end test of the analysis pipeline: normalize a raw
//! session log, fold it into a summary, persist the run database, reload
//! it and aggregate statistics.

use std::io::Cursor;

use chrono::Utc;

use agent_replay::events;
use agent_replay::session::SessionSummary;
use agent_replay::stats::AggregateStats;
use agent_replay::storage::{Database, SessionRecord, SessionStatus};
use tempfile::TempDir;

fn tool_line(name: &str, input: serde_json::Value) -> String {
    serde_json::json!({
        "timestamp": "2026-05-01T10:00:00Z",
        "message": {
            "content": [{"type": "tool_use", "name": name, "id": "tu", "input": input}]
        }
    })
    .to_string()
}

fn session_log() -> String {
    [
        tool_line("Read", serde_json::json!({"file_path": "a.py"})),
        tool_line("Read", serde_json::json!({"file_path": "b.py"})),
        tool_line("Edit", serde_json::json!({"file_path": "a.py", "old_string": "x"})),
        tool_line("Bash", serde_json::json!({"command": "pytest  -q"})),
    ]
    .join("\n")
}

fn record_for(task_id: u64, summary: SessionSummary) -> SessionRecord {
    SessionRecord {
        task_id,
        task_title: format!("task {task_id}"),
        task_url: format!("https://github.com/o/r/pull/{task_id}"),
        prompt: "replay it".to_string(),
        session_id: Some(format!("session-{task_id}")),
        status: SessionStatus::Completed,
        error: None,
        summary: Some(summary),
        comparison: None,
        agent_diff: None,
        started_at: Utc::now(),
        finished_at: Utc::now(),
    }
}

#[test]
fn log_to_database_to_stats() {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("db.json");

    // Three identical sessions, as if three tasks replayed the same way.
    let mut database = Database::new("octo", "repo", "https://github.com/octo/repo", 30);
    for task_id in 1..=3 {
        let stream = events::normalize(Cursor::new(session_log()), "session", None);
        let summary = SessionSummary::from_events(stream);
        assert_eq!(summary.counts.total(), 4);
        database.push(record_for(task_id, summary));
    }
    database.save(&db_path).expect("save");

    let loaded = Database::load(&db_path).expect("load");
    assert_eq!(loaded.sessions.len(), 3);

    let stats = AggregateStats::compute(&loaded);
    assert_eq!(stats.total_sessions, 3);
    assert_eq!(stats.completed, 3);

    // Two reads per session across three sessions land on the root dir.
    assert_eq!(stats.directory_reads.get("."), 6);
    assert_eq!(stats.file_edits.get("a.py"), 3);
    // The command counter sees the whitespace-normalized form.
    assert_eq!(stats.commands.get("pytest -q"), 3);
    assert_eq!(stats.tool_usage.get("Read"), 6);
    assert_eq!(stats.tool_usage.get("Edit"), 3);

    let report = stats.report(10);
    let text = report.render_text();
    assert!(text.contains("3 total"));
    assert!(text.contains("a.py"));
}
