//! Per-session aggregation of normalized events.
//!
//! [`SessionSummary::from_events`] is a pure fold over an event stream: it
//! holds no handles to workspaces or logs, so summaries can be rebuilt from
//! stored events long after a run. File lists keep first-seen order with
//! duplicates removed; per-file and per-directory counts keep full
//! multiplicity, so run-level heatmaps are sums over summaries and never
//! walk paths again at query time.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::events::{EventKind, NormalizedEvent};

/// Event counts by canonical kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub file_reads: u64,
    pub file_writes: u64,
    pub shell_commands: u64,
    pub searches: u64,
    pub other_tools: u64,
}

impl EventCounts {
    pub fn total(&self) -> u64 {
        self.file_reads + self.file_writes + self.shell_commands + self.searches + self.other_tools
    }

    fn bump(&mut self, kind: EventKind) {
        match kind {
            EventKind::FileRead => self.file_reads += 1,
            EventKind::FileWrite => self.file_writes += 1,
            EventKind::ShellCommand => self.shell_commands += 1,
            EventKind::Search => self.searches += 1,
            EventKind::OtherTool => self.other_tools += 1,
        }
    }
}

/// Aggregated view of one session's activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub counts: EventCounts,
    /// Distinct files read, in first-seen order.
    pub files_read: Vec<String>,
    /// Distinct files edited, in first-seen order.
    pub files_edited: Vec<String>,
    /// Shell commands in execution order, duplicates kept.
    pub commands: Vec<String>,
    /// Read events per file, with multiplicity.
    pub read_counts: BTreeMap<String, u64>,
    /// Write events per file, with multiplicity.
    pub edit_counts: BTreeMap<String, u64>,
    /// Read events per ancestor directory, with multiplicity.
    pub dir_read_counts: BTreeMap<String, u64>,
    /// Write events per ancestor directory, with multiplicity.
    pub dir_edit_counts: BTreeMap<String, u64>,
    /// Distinct directories read under, in first-seen order.
    pub dirs_read: Vec<String>,
    /// Distinct directories edited under, in first-seen order.
    pub dirs_edited: Vec<String>,
    /// Events per tool name, with multiplicity.
    pub tool_counts: BTreeMap<String, u64>,
    /// Targets that pointed outside the workspace.
    pub outside_workspace: Vec<String>,
}

impl SessionSummary {
    /// Fold an event stream into a summary.
    pub fn from_events<I>(events: I) -> Self
    where
        I: IntoIterator<Item = NormalizedEvent>,
    {
        let mut summary = SessionSummary::default();
        let mut seen_reads: HashSet<String> = HashSet::new();
        let mut seen_edits: HashSet<String> = HashSet::new();
        let mut seen_read_dirs: HashSet<String> = HashSet::new();
        let mut seen_edit_dirs: HashSet<String> = HashSet::new();

        for event in events {
            summary.counts.bump(event.kind);
            *summary.tool_counts.entry(event.tool.clone()).or_insert(0) += 1;

            if event.outside_workspace {
                if let Some(target) = &event.target {
                    summary.outside_workspace.push(target.clone());
                }
            }

            match event.kind {
                EventKind::FileRead => {
                    if let Some(target) = event.target {
                        *summary.read_counts.entry(target.clone()).or_insert(0) += 1;
                        for dir in ancestor_dirs(&target) {
                            *summary.dir_read_counts.entry(dir.clone()).or_insert(0) += 1;
                            if seen_read_dirs.insert(dir.clone()) {
                                summary.dirs_read.push(dir);
                            }
                        }
                        if seen_reads.insert(target.clone()) {
                            summary.files_read.push(target);
                        }
                    }
                }
                EventKind::FileWrite => {
                    if let Some(target) = event.target {
                        *summary.edit_counts.entry(target.clone()).or_insert(0) += 1;
                        for dir in ancestor_dirs(&target) {
                            *summary.dir_edit_counts.entry(dir.clone()).or_insert(0) += 1;
                            if seen_edit_dirs.insert(dir.clone()) {
                                summary.dirs_edited.push(dir);
                            }
                        }
                        if seen_edits.insert(target.clone()) {
                            summary.files_edited.push(target);
                        }
                    }
                }
                EventKind::ShellCommand => {
                    if let Some(command) = event.command {
                        summary.commands.push(command);
                    }
                }
                EventKind::Search | EventKind::OtherTool => {}
            }
        }

        summary
    }
}

/// Ancestor directories of a workspace-relative path, root first.
///
/// The workspace root is reported as ".", so every file event contributes
/// to it. "src/a/b.py" yields ".", "src", "src/a".
pub fn ancestor_dirs(file: &str) -> Vec<String> {
    let mut dirs = vec![".".to_string()];
    let mut prefix = String::new();
    let components: Vec<&str> = file.split('/').collect();
    for part in &components[..components.len().saturating_sub(1)] {
        if part.is_empty() {
            continue;
        }
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        dirs.push(prefix.clone());
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn event(seq: u64, kind: EventKind, target: Option<&str>, command: Option<&str>) -> NormalizedEvent {
        NormalizedEvent {
            seq,
            session_id: "s".to_string(),
            kind,
            tool: "t".to_string(),
            target: target.map(String::from),
            command: command.map(String::from),
            timestamp: None,
            outside_workspace: false,
            raw_input: Value::Null,
        }
    }

    #[test]
    fn counts_every_kind() {
        let events = vec![
            event(0, EventKind::FileRead, Some("a.py"), None),
            event(1, EventKind::FileWrite, Some("a.py"), None),
            event(2, EventKind::ShellCommand, None, Some("ls")),
            event(3, EventKind::Search, None, Some("fn")),
            event(4, EventKind::OtherTool, None, None),
        ];
        let summary = SessionSummary::from_events(events);
        assert_eq!(summary.counts.total(), 5);
        assert_eq!(summary.counts.file_reads, 1);
        assert_eq!(summary.counts.other_tools, 1);
    }

    #[test]
    fn file_lists_dedup_in_first_seen_order() {
        let events = vec![
            event(0, EventKind::FileRead, Some("b.py"), None),
            event(1, EventKind::FileRead, Some("a.py"), None),
            event(2, EventKind::FileRead, Some("b.py"), None),
        ];
        let summary = SessionSummary::from_events(events);
        assert_eq!(summary.files_read, vec!["b.py", "a.py"]);
        assert_eq!(summary.read_counts["b.py"], 2);
        assert_eq!(summary.read_counts["a.py"], 1);
    }

    #[test]
    fn commands_keep_duplicates_in_order() {
        let events = vec![
            event(0, EventKind::ShellCommand, None, Some("cargo test")),
            event(1, EventKind::ShellCommand, None, Some("ls")),
            event(2, EventKind::ShellCommand, None, Some("cargo test")),
        ];
        let summary = SessionSummary::from_events(events);
        assert_eq!(summary.commands, vec!["cargo test", "ls", "cargo test"]);
    }

    #[test]
    fn outside_workspace_targets_are_collected() {
        let mut escape = event(0, EventKind::FileRead, Some("/etc/passwd"), None);
        escape.outside_workspace = true;
        let events = vec![escape, event(1, EventKind::FileRead, Some("a.py"), None)];
        let summary = SessionSummary::from_events(events);
        assert_eq!(summary.outside_workspace, vec!["/etc/passwd"]);
        assert_eq!(summary.counts.file_reads, 2);
    }

    #[test]
    fn directory_counts_are_pre_derived() {
        let events = vec![
            event(0, EventKind::FileRead, Some("src/a.py"), None),
            event(1, EventKind::FileRead, Some("src/a.py"), None),
            event(2, EventKind::FileRead, Some("src/deep/b.py"), None),
            event(3, EventKind::FileWrite, Some("src/a.py"), None),
        ];
        let summary = SessionSummary::from_events(events);
        assert_eq!(summary.dir_read_counts["."], 3);
        assert_eq!(summary.dir_read_counts["src"], 3);
        assert_eq!(summary.dir_read_counts["src/deep"], 1);
        assert_eq!(summary.dirs_read, vec![".", "src", "src/deep"]);
        assert_eq!(summary.dir_edit_counts["."], 1);
        assert_eq!(summary.dir_edit_counts["src"], 1);
        assert_eq!(summary.dirs_edited, vec![".", "src"]);
    }

    #[test]
    fn tool_counts_keep_each_tool_name() {
        let mut edit = event(0, EventKind::FileWrite, Some("a.py"), None);
        edit.tool = "Edit".to_string();
        let mut write = event(1, EventKind::FileWrite, Some("b.py"), None);
        write.tool = "Write".to_string();
        let mut edit2 = event(2, EventKind::FileWrite, Some("a.py"), None);
        edit2.tool = "Edit".to_string();

        let summary = SessionSummary::from_events(vec![edit, write, edit2]);
        assert_eq!(summary.tool_counts["Edit"], 2);
        assert_eq!(summary.tool_counts["Write"], 1);
        assert_eq!(summary.counts.file_writes, 3);
    }

    #[test]
    fn ancestors_include_root_and_each_prefix() {
        assert_eq!(ancestor_dirs("a.py"), vec!["."]);
        assert_eq!(ancestor_dirs("src/a.py"), vec![".", "src"]);
        assert_eq!(ancestor_dirs("src/deep/c.py"), vec![".", "src", "src/deep"]);
    }

    #[test]
    fn empty_stream_is_empty_summary() {
        let summary = SessionSummary::from_events(Vec::new());
        assert_eq!(summary.counts.total(), 0);
        assert!(summary.files_read.is_empty());
        assert!(summary.commands.is_empty());
    }
}
