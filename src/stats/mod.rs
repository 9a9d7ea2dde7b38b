//! Run-level aggregation across session records.
//!
//! Statistics are recomputed from a stored [`Database`] on demand, never
//! persisted alongside it. Aggregation is a commutative fold: merging the
//! same session summaries in any order produces identical counts. An empty
//! database aggregates to zeroed stats.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::session::EventCounts;
use crate::storage::{Database, SessionStatus};

/// Multiset counter that remembers first-seen order for stable ranking.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    counts: HashMap<String, u64>,
    order: Vec<String>,
}

impl Counter {
    pub fn add(&mut self, key: &str, n: u64) {
        if n == 0 {
            return;
        }
        if !self.counts.contains_key(key) {
            self.order.push(key.to_string());
        }
        *self.counts.entry(key.to_string()).or_insert(0) += n;
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Top `n` entries by count. Ties rank by first-seen order, then
    /// lexicographically.
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        let index: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_str(), i))
            .collect();

        let mut entries: Vec<(String, u64)> = self
            .counts
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| index.get(a.0.as_str()).cmp(&index.get(b.0.as_str())))
                .then_with(|| a.0.cmp(&b.0))
        });
        entries.truncate(n);
        entries
    }

    pub fn merge(&mut self, other: &Counter) {
        for key in &other.order {
            self.add(key, other.counts[key]);
        }
    }
}

/// Aggregated statistics over a whole run.
#[derive(Debug, Clone, Default)]
pub struct AggregateStats {
    pub total_sessions: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub events: EventCounts,
    pub tool_usage: Counter,
    pub file_reads: Counter,
    pub file_edits: Counter,
    pub directory_reads: Counter,
    pub directory_edits: Counter,
    pub commands: Counter,
    pub command_patterns: Counter,
    pub sandbox_escapes: Vec<String>,
}

impl AggregateStats {
    /// Fold every session record in the database into one stats value.
    pub fn compute(database: &Database) -> Self {
        let mut stats = AggregateStats::default();

        for record in &database.sessions {
            stats.total_sessions += 1;
            match record.status {
                SessionStatus::Completed => stats.completed += 1,
                SessionStatus::Failed => stats.failed += 1,
                SessionStatus::TimedOut => stats.timed_out += 1,
            }

            let Some(summary) = &record.summary else { continue };

            stats.events.file_reads += summary.counts.file_reads;
            stats.events.file_writes += summary.counts.file_writes;
            stats.events.shell_commands += summary.counts.shell_commands;
            stats.events.searches += summary.counts.searches;
            stats.events.other_tools += summary.counts.other_tools;

            // Counters are fed in the summaries' first-seen event order so
            // tie-breaking ranks by when a path was first touched, not by
            // the count maps' alphabetical iteration order.
            for file in &summary.files_read {
                stats
                    .file_reads
                    .add(file, summary.read_counts.get(file).copied().unwrap_or(0));
            }
            for file in &summary.files_edited {
                stats
                    .file_edits
                    .add(file, summary.edit_counts.get(file).copied().unwrap_or(0));
            }
            for dir in &summary.dirs_read {
                stats
                    .directory_reads
                    .add(dir, summary.dir_read_counts.get(dir).copied().unwrap_or(0));
            }
            for dir in &summary.dirs_edited {
                stats
                    .directory_edits
                    .add(dir, summary.dir_edit_counts.get(dir).copied().unwrap_or(0));
            }
            for (tool, n) in &summary.tool_counts {
                stats.tool_usage.add(tool, *n);
            }
            for command in &summary.commands {
                stats.commands.add(&normalize_command(command), 1);
                let pattern = command_pattern(command);
                if !pattern.is_empty() {
                    stats.command_patterns.add(&pattern, 1);
                }
            }
            for target in &summary.outside_workspace {
                stats.sandbox_escapes.push(target.clone());
            }
        }

        stats
    }

    /// Combine stats from another run.
    pub fn merge(&mut self, other: &AggregateStats) {
        self.total_sessions += other.total_sessions;
        self.completed += other.completed;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
        self.events.file_reads += other.events.file_reads;
        self.events.file_writes += other.events.file_writes;
        self.events.shell_commands += other.events.shell_commands;
        self.events.searches += other.events.searches;
        self.events.other_tools += other.events.other_tools;
        self.tool_usage.merge(&other.tool_usage);
        self.file_reads.merge(&other.file_reads);
        self.file_edits.merge(&other.file_edits);
        self.directory_reads.merge(&other.directory_reads);
        self.directory_edits.merge(&other.directory_edits);
        self.commands.merge(&other.commands);
        self.command_patterns.merge(&other.command_patterns);
        self.sandbox_escapes
            .extend(other.sandbox_escapes.iter().cloned());
    }

    /// Ranked, serializable view for export and rendering.
    pub fn report(&self, top_n: usize) -> StatsReport {
        StatsReport {
            total_sessions: self.total_sessions,
            completed: self.completed,
            failed: self.failed,
            timed_out: self.timed_out,
            events: self.events,
            top_tools: self.tool_usage.top(top_n),
            top_read_files: self.file_reads.top(top_n),
            top_edited_files: self.file_edits.top(top_n),
            top_commands: self.commands.top(top_n),
            top_command_patterns: self.command_patterns.top(top_n),
            directory_read_heatmap: self.directory_reads.top(top_n),
            directory_edit_heatmap: self.directory_edits.top(top_n),
            sandbox_escapes: self.sandbox_escapes.clone(),
        }
    }
}

/// Ranked stats snapshot, stable for JSON export.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub total_sessions: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub events: EventCounts,
    pub top_tools: Vec<(String, u64)>,
    pub top_read_files: Vec<(String, u64)>,
    pub top_edited_files: Vec<(String, u64)>,
    pub top_commands: Vec<(String, u64)>,
    pub top_command_patterns: Vec<(String, u64)>,
    pub directory_read_heatmap: Vec<(String, u64)>,
    pub directory_edit_heatmap: Vec<(String, u64)>,
    pub sandbox_escapes: Vec<String>,
}

impl StatsReport {
    /// Plain-text rendering for the terminal.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Sessions: {} total ({} completed, {} failed, {} timed out)\n",
            self.total_sessions, self.completed, self.failed, self.timed_out
        ));
        out.push_str(&format!(
            "Events: {} reads, {} writes, {} commands, {} searches, {} other\n",
            self.events.file_reads,
            self.events.file_writes,
            self.events.shell_commands,
            self.events.searches,
            self.events.other_tools
        ));

        let section = |out: &mut String, title: &str, entries: &[(String, u64)]| {
            if entries.is_empty() {
                return;
            }
            out.push_str(&format!("\n{title}:\n"));
            for (name, count) in entries {
                out.push_str(&format!("  {count:>6}  {name}\n"));
            }
        };

        section(&mut out, "Tool usage", &self.top_tools);
        section(&mut out, "Most read files", &self.top_read_files);
        section(&mut out, "Most edited files", &self.top_edited_files);
        section(&mut out, "Most run commands", &self.top_commands);
        section(&mut out, "Command patterns", &self.top_command_patterns);
        section(&mut out, "Directory read heatmap", &self.directory_read_heatmap);
        section(&mut out, "Directory edit heatmap", &self.directory_edit_heatmap);

        if !self.sandbox_escapes.is_empty() {
            out.push_str(&format!(
                "\nTargets outside the workspace ({}):\n",
                self.sandbox_escapes.len()
            ));
            for target in &self.sandbox_escapes {
                out.push_str(&format!("  {target}\n"));
            }
        }

        out
    }
}

/// Canonicalize a shell command for counting.
///
/// Whitespace runs collapse to single spaces and a flag token repeated
/// within the same command keeps only its first occurrence, so trivially
/// different spellings count as one command.
pub fn normalize_command(command: &str) -> String {
    let mut seen_flags: HashSet<&str> = HashSet::new();
    let mut tokens: Vec<&str> = Vec::new();

    for token in command.split_whitespace() {
        if token.starts_with('-') && token.len() > 1 {
            if !seen_flags.insert(token) {
                continue;
            }
        }
        tokens.push(token);
    }

    tokens.join(" ")
}

/// Coarse pattern for a command: the base program, plus the subcommand for
/// tools that take one. "git commit -m x" and "git commit --amend" bucket
/// together as "git commit".
pub fn command_pattern(command: &str) -> String {
    const SUBCOMMAND_TOOLS: [&str; 6] = ["git", "cargo", "npm", "pip", "docker", "uv"];

    let normalized = normalize_command(command);
    let mut tokens = normalized.split(' ').filter(|t| !t.is_empty());
    let Some(base) = tokens.next() else {
        return String::new();
    };
    let base_name = base.rsplit('/').next().unwrap_or(base);

    if SUBCOMMAND_TOOLS.contains(&base_name) {
        if let Some(sub) = tokens.find(|t| !t.starts_with('-')) {
            return format!("{base_name} {sub}");
        }
    }
    base_name.to_string()
}
