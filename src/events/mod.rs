//! Event normalization: raw session logs into a canonical event stream.
//!
//! The agent writes one append-only, newline-delimited JSON record per
//! message under its session log. Record shapes vary by agent version, so
//! nothing here assumes a fixed schema: all field access is gated behind
//! presence checks, and any record that cannot be recognized maps to the
//! [`EventKind::OtherTool`] fallback with its raw payload preserved. No
//! record is ever silently dropped.
//!
//! Normalization is lazy: [`normalize`] returns an iterator, so large
//! sessions are never materialized in memory at once. Event order follows
//! the log's record order (its implicit sequence numbers), not wall-clock
//! timestamps, which are skewed or absent for some record kinds.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of canonical event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    FileRead,
    FileWrite,
    ShellCommand,
    Search,
    /// Total-mapping fallback: unknown tools and unrecognized records.
    OtherTool,
}

/// One atomic record lifted from the session log: a tool invocation, or
/// an unrecognized record preserved whole. Append-only, totally ordered
/// by `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Session-scoped sequence number, assigned in log order.
    pub seq: u64,
    /// Tool name as recorded, or a marker for unrecognized records.
    pub tool: String,
    /// Raw input payload, preserved verbatim.
    pub input: Value,
    /// Timestamp as recorded, when present.
    pub timestamp: Option<String>,
}

/// One canonical event extracted from the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Session-scoped sequence number, assigned in log order.
    pub seq: u64,
    /// Session this event belongs to.
    pub session_id: String,
    /// Canonical kind.
    pub kind: EventKind,
    /// Tool name as it appeared in the log.
    pub tool: String,
    /// File or search target, normalized relative to the workspace root.
    pub target: Option<String>,
    /// Shell command text, for `ShellCommand` events.
    pub command: Option<String>,
    /// Timestamp as recorded in the log, when present.
    pub timestamp: Option<String>,
    /// True when the target points outside the workspace tree. Reportable
    /// as a sandbox-escape anomaly, not fatal.
    pub outside_workspace: bool,
    /// Raw tool input, preserved verbatim.
    pub raw_input: Value,
}

/// Normalize a session log read from `reader`.
///
/// `workspace_root` anchors target-path normalization; targets outside it
/// are preserved but flagged.
pub fn normalize<R: BufRead>(
    reader: R,
    session_id: &str,
    workspace_root: Option<&Path>,
) -> EventStream<R> {
    EventStream {
        lines: reader.lines(),
        session_id: session_id.to_string(),
        workspace_root: workspace_root.map(Path::to_path_buf),
        seq: 0,
        pending: VecDeque::new(),
        done: false,
    }
}

/// Normalize a session log file. A missing file yields an empty stream via
/// the caller's error handling.
pub fn normalize_file(
    path: &Path,
    session_id: &str,
    workspace_root: Option<&Path>,
) -> io::Result<EventStream<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(normalize(BufReader::new(file), session_id, workspace_root))
}

/// Lazy iterator over normalized events.
pub struct EventStream<R: BufRead> {
    lines: io::Lines<R>,
    session_id: String,
    workspace_root: Option<PathBuf>,
    seq: u64,
    pending: VecDeque<NormalizedEvent>,
    done: bool,
}

impl<R: BufRead> Iterator for EventStream<R> {
    type Item = NormalizedEvent;

    fn next(&mut self) -> Option<NormalizedEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.done {
                return None;
            }

            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "unreadable log line, stopping stream");
                    self.done = true;
                    return None;
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            self.ingest_record(&line);
        }
    }
}

impl<R: BufRead> EventStream<R> {
    fn ingest_record(&mut self, line: &str) {
        let entry: Value = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(_) => {
                // Not even JSON: preserve the raw payload in the fallback
                // bucket rather than dropping the record.
                self.push_raw("unparseable", Value::String(line.to_string()), None);
                return;
            }
        };

        let timestamp = entry
            .get("timestamp")
            .and_then(Value::as_str)
            .map(String::from);

        // Nested shape: {"message": {"content": [{"type": "tool_use", ...}]}}
        if let Some(content) = entry
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
        {
            for item in content {
                if item.get("type").and_then(Value::as_str) == Some("tool_use") {
                    self.ingest_tool_use(item, timestamp.clone());
                }
            }
            return;
        }

        // Flat shape: {"type": "tool_use", "name": ..., "input": ...}
        if entry.get("type").and_then(Value::as_str) == Some("tool_use") {
            self.ingest_tool_use(&entry, timestamp);
            return;
        }

        // Known conversation records carry no tool interaction.
        if entry.get("message").is_some()
            || matches!(
                entry.get("type").and_then(Value::as_str),
                Some("summary") | Some("user") | Some("assistant") | Some("system")
            )
        {
            return;
        }

        // Unrecognized record kind: total mapping demands an event.
        self.push_raw("unknown-record", entry, timestamp);
    }

    fn ingest_tool_use(&mut self, item: &Value, timestamp: Option<String>) {
        let tool = item.get("name").and_then(Value::as_str).unwrap_or("unknown");
        let input = item.get("input").cloned().unwrap_or(Value::Null);
        self.push_raw(tool, input, timestamp);
    }

    fn push_raw(&mut self, tool: &str, input: Value, timestamp: Option<String>) {
        let raw = RawEvent {
            seq: self.seq,
            tool: tool.to_string(),
            input,
            timestamp,
        };
        self.seq += 1;
        self.pending.push_back(normalize_raw(
            raw,
            &self.session_id,
            self.workspace_root.as_deref(),
        ));
    }
}

/// Total mapping from a raw record to a canonical event.
///
/// Never fails and never drops: tools outside the known set, and records
/// that were not tool invocations at all, land in `OtherTool` with their
/// payload intact.
pub fn normalize_raw(
    raw: RawEvent,
    session_id: &str,
    workspace_root: Option<&Path>,
) -> NormalizedEvent {
    let (kind, target, command) = classify_tool(&raw.tool, &raw.input);

    let (target, outside_workspace) = match target {
        Some(t) => {
            let (normalized, outside) = normalize_target(&t, workspace_root);
            (Some(normalized), outside)
        }
        None => (None, false),
    };

    NormalizedEvent {
        seq: raw.seq,
        session_id: session_id.to_string(),
        kind,
        tool: raw.tool,
        target,
        command,
        timestamp: raw.timestamp,
        outside_workspace,
        raw_input: raw.input,
    }
}

/// Map a tool name and input onto the closed kind set.
fn classify_tool(tool: &str, input: &Value) -> (EventKind, Option<String>, Option<String>) {
    let file_path = input
        .get("file_path")
        .or_else(|| input.get("path"))
        .and_then(Value::as_str)
        .map(String::from);

    match tool {
        "Read" => (EventKind::FileRead, file_path, None),
        "Edit" | "Write" | "MultiEdit" | "NotebookEdit" => (EventKind::FileWrite, file_path, None),
        "Bash" => {
            let command = input
                .get("command")
                .and_then(Value::as_str)
                .map(String::from);
            (EventKind::ShellCommand, None, command)
        }
        "Grep" | "Glob" => {
            let pattern = input
                .get("pattern")
                .and_then(Value::as_str)
                .map(String::from);
            (EventKind::Search, file_path, pattern)
        }
        _ => (EventKind::OtherTool, file_path, None),
    }
}

/// Normalize a target path relative to the workspace root.
///
/// Returns the normalized path and whether it escaped the workspace.
/// Relative paths are assumed workspace-relative already. Absolute paths
/// outside the root are preserved verbatim and flagged.
fn normalize_target(target: &str, workspace_root: Option<&Path>) -> (String, bool) {
    let path = Path::new(target);
    if path.is_relative() {
        return (target.to_string(), false);
    }

    match workspace_root {
        Some(root) => match path.strip_prefix(root) {
            Ok(rel) => (rel.to_string_lossy().to_string(), false),
            Err(_) => (target.to_string(), true),
        },
        None => (target.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn tool_line(name: &str, input: Value) -> String {
        json!({
            "timestamp": "2026-05-01T10:00:00Z",
            "message": {
                "content": [{"type": "tool_use", "name": name, "id": "tu_1", "input": input}]
            }
        })
        .to_string()
    }

    fn collect(log: &str, root: Option<&Path>) -> Vec<NormalizedEvent> {
        normalize(Cursor::new(log.to_string()), "session-1", root).collect()
    }

    #[test]
    fn known_tools_map_to_their_kinds() {
        let log = [
            tool_line("Read", json!({"file_path": "src/a.py"})),
            tool_line("Edit", json!({"file_path": "src/a.py", "old_string": "x"})),
            tool_line("Bash", json!({"command": "ls -la"})),
            tool_line("Grep", json!({"pattern": "fn main", "path": "src"})),
        ]
        .join("\n");

        let events = collect(&log, None);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].kind, EventKind::FileRead);
        assert_eq!(events[0].target.as_deref(), Some("src/a.py"));
        assert_eq!(events[1].kind, EventKind::FileWrite);
        assert_eq!(events[2].kind, EventKind::ShellCommand);
        assert_eq!(events[2].command.as_deref(), Some("ls -la"));
        assert_eq!(events[3].kind, EventKind::Search);
        assert_eq!(events[3].command.as_deref(), Some("fn main"));
    }

    #[test]
    fn unknown_tool_falls_back_to_other_tool() {
        let log = tool_line("FancyNewTool", json!({"anything": true}));
        let events = collect(&log, None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::OtherTool);
        assert_eq!(events[0].tool, "FancyNewTool");
        assert_eq!(events[0].raw_input, json!({"anything": true}));
    }

    #[test]
    fn one_unrecognized_record_among_five_yields_six_events() {
        let mut lines: Vec<String> = (0..5)
            .map(|i| tool_line("Read", json!({"file_path": format!("f{i}.py")})))
            .collect();
        lines.insert(2, json!({"weird_shape": [1, 2, 3]}).to_string());

        let events = collect(&lines.join("\n"), None);
        assert_eq!(events.len(), 6);
        let other: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::OtherTool)
            .collect();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].tool, "unknown-record");
    }

    #[test]
    fn unparseable_line_preserves_raw_payload() {
        let log = format!(
            "{}\nnot json at all{{{{\n{}",
            tool_line("Read", json!({"file_path": "a"})),
            tool_line("Read", json!({"file_path": "b"}))
        );
        let events = collect(&log, None);
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].kind, EventKind::OtherTool);
        assert_eq!(events[1].raw_input, json!("not json at all{{"));
    }

    #[test]
    fn sequence_numbers_are_non_decreasing_in_log_order() {
        let log = [
            tool_line("Read", json!({"file_path": "a"})),
            tool_line("Bash", json!({"command": "ls"})),
            tool_line("Read", json!({"file_path": "b"})),
        ]
        .join("\n");

        let events = collect(&log, None);
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn conversation_records_yield_no_events() {
        let log = [
            json!({"type": "summary", "summary": "did things"}).to_string(),
            json!({"message": {"role": "assistant", "content": [{"type": "text", "text": "hi"}]}})
                .to_string(),
            tool_line("Read", json!({"file_path": "a"})),
        ]
        .join("\n");

        let events = collect(&log, None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::FileRead);
    }

    #[test]
    fn absolute_targets_are_normalized_to_workspace_root() {
        let root = Path::new("/tmp/work/task-1");
        let log = tool_line("Read", json!({"file_path": "/tmp/work/task-1/src/a.py"}));
        let events = collect(&log, Some(root));
        assert_eq!(events[0].target.as_deref(), Some("src/a.py"));
        assert!(!events[0].outside_workspace);
    }

    #[test]
    fn escape_outside_workspace_is_flagged_not_fatal() {
        let root = Path::new("/tmp/work/task-1");
        let log = tool_line("Read", json!({"file_path": "/etc/passwd"}));
        let events = collect(&log, Some(root));
        assert_eq!(events[0].target.as_deref(), Some("/etc/passwd"));
        assert!(events[0].outside_workspace);
    }

    #[test]
    fn flat_tool_records_are_accepted() {
        let log = json!({
            "type": "tool_use",
            "name": "Write",
            "input": {"file_path": "out.txt", "content": "x"}
        })
        .to_string();
        let events = collect(&log, None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::FileWrite);
    }

    #[test]
    fn empty_log_is_empty_stream() {
        assert!(collect("", None).is_empty());
        assert!(collect("\n\n\n", None).is_empty());
    }

    #[test]
    fn normalize_raw_is_total_over_arbitrary_tools() {
        let raw = RawEvent {
            seq: 7,
            tool: "Telepathy".to_string(),
            input: json!({"thought": "?"}),
            timestamp: None,
        };
        let event = normalize_raw(raw, "session-9", None);
        assert_eq!(event.seq, 7);
        assert_eq!(event.session_id, "session-9");
        assert_eq!(event.kind, EventKind::OtherTool);
        assert_eq!(event.raw_input, json!({"thought": "?"}));
    }

    #[test]
    fn kind_serializes_kebab_case() {
        let json = serde_json::to_string(&EventKind::OtherTool).expect("serialize");
        assert_eq!(json, "\"other-tool\"");
        assert_eq!(
            serde_json::to_string(&EventKind::FileRead).expect("serialize"),
            "\"file-read\""
        );
    }
}
