//! Agent-vs-human diff comparison.
//!
//! Both sides are unified diffs: the human's from the merged change, the
//! agent's captured from its workspace after the session ends. Comparison
//! is a pure function over the two texts, so it can run long after the
//! workspace is gone. File-set operations are symmetric: swapping the two
//! inputs swaps the only-in-agent and only-in-human sets exactly.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ComparisonError;
use crate::workspace::git;

/// Line-delta stats for one file in a unified diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiffStats {
    pub additions: u64,
    pub deletions: u64,
}

/// Per-file pairing of agent and human stats. A missing side means that
/// side did not touch the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileComparison {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<FileDiffStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human: Option<FileDiffStats>,
}

/// How far the agent's file set strayed from the human's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Divergence {
    /// Same file set on both sides.
    Identical,
    /// The agent touched every human file plus extras.
    AgentSuperset,
    /// The agent touched a strict subset of the human's files.
    AgentSubset,
    /// Some files in common, some unique to each side.
    Overlapping,
    /// No file in common.
    Disjoint,
    /// The agent produced no changes at all.
    AgentEmpty,
}

/// Comparison of an agent diff against the human's merged diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffComparison {
    pub common_files: Vec<String>,
    pub agent_only: Vec<String>,
    pub human_only: Vec<String>,
    pub agent_additions: u64,
    pub agent_deletions: u64,
    pub human_additions: u64,
    pub human_deletions: u64,
    /// |common| / |union| over the two file sets; 1.0 when both are empty.
    pub overlap_ratio: f64,
    pub divergence: Divergence,
    pub per_file: BTreeMap<String, FileComparison>,
}

/// Compare two unified diffs file by file.
pub fn compare_diffs(agent_diff: &str, human_diff: &str) -> DiffComparison {
    let agent = parse_unified_diff(agent_diff);
    let human = parse_unified_diff(human_diff);

    let agent_files: BTreeSet<&String> = agent.keys().collect();
    let human_files: BTreeSet<&String> = human.keys().collect();

    let common_files: Vec<String> = agent_files
        .intersection(&human_files)
        .map(|f| (*f).clone())
        .collect();
    let agent_only: Vec<String> = agent_files
        .difference(&human_files)
        .map(|f| (*f).clone())
        .collect();
    let human_only: Vec<String> = human_files
        .difference(&agent_files)
        .map(|f| (*f).clone())
        .collect();

    let union = agent_files.union(&human_files).count();
    let overlap_ratio = if union == 0 {
        1.0
    } else {
        common_files.len() as f64 / union as f64
    };

    let divergence = if agent.is_empty() {
        Divergence::AgentEmpty
    } else if agent_files == human_files {
        Divergence::Identical
    } else if common_files.is_empty() {
        Divergence::Disjoint
    } else if human_only.is_empty() {
        Divergence::AgentSuperset
    } else if agent_only.is_empty() {
        Divergence::AgentSubset
    } else {
        Divergence::Overlapping
    };

    let mut per_file: BTreeMap<String, FileComparison> = BTreeMap::new();
    for (file, stats) in &agent {
        per_file.entry(file.clone()).or_default().agent = Some(*stats);
    }
    for (file, stats) in &human {
        per_file.entry(file.clone()).or_default().human = Some(*stats);
    }

    let total = |m: &BTreeMap<String, FileDiffStats>| {
        m.values().fold((0u64, 0u64), |(a, d), s| {
            (a + s.additions, d + s.deletions)
        })
    };
    let (agent_additions, agent_deletions) = total(&agent);
    let (human_additions, human_deletions) = total(&human);

    DiffComparison {
        common_files,
        agent_only,
        human_only,
        agent_additions,
        agent_deletions,
        human_additions,
        human_deletions,
        overlap_ratio,
        divergence,
        per_file,
    }
}

/// Parse a unified diff into per-file line-delta stats.
///
/// File boundaries come from `diff --git` headers; the b-side path names
/// the file, or the a-side for deletions against /dev/null. Header lines
/// (`+++`, `---`) are not counted as content changes.
pub fn parse_unified_diff(diff: &str) -> BTreeMap<String, FileDiffStats> {
    let header = Regex::new(r"^diff --git a/(.+) b/(.+)$").expect("valid regex");

    let mut files: BTreeMap<String, FileDiffStats> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in diff.lines() {
        if let Some(caps) = header.captures(line) {
            let a_side = &caps[1];
            let b_side = &caps[2];
            let file = if b_side == "/dev/null" { a_side } else { b_side };
            current = Some(file.to_string());
            files.entry(file.to_string()).or_default();
            continue;
        }

        let Some(file) = &current else { continue };
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if let Some(stats) = files.get_mut(file) {
            if line.starts_with('+') {
                stats.additions += 1;
            } else if line.starts_with('-') {
                stats.deletions += 1;
            }
        }
    }

    files
}

/// Capture everything the agent changed in a workspace as one unified diff.
///
/// `git diff HEAD` covers tracked files; untracked files the agent created
/// do not appear there, so a synthetic new-file diff is appended for each.
pub fn capture_workspace_changes(workspace_root: &Path) -> Result<String, ComparisonError> {
    let mut diff = git(workspace_root, &["diff", "HEAD"])
        .map_err(ComparisonError::CaptureFailed)?;

    let tracked: BTreeSet<String> = git(workspace_root, &["ls-files"])
        .map_err(ComparisonError::CaptureFailed)?
        .lines()
        .map(String::from)
        .collect();

    for entry in WalkDir::new(workspace_root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(workspace_root)
            .map_err(|e| ComparisonError::CaptureFailed(e.to_string()))?
            .to_string_lossy()
            .to_string();
        if tracked.contains(&rel) {
            continue;
        }
        debug!(file = %rel, "synthesizing diff for untracked file");
        diff.push_str(&synthetic_new_file_diff(&rel, entry.path()));
    }

    Ok(diff)
}

/// Build a `new file` diff hunk for an untracked file.
fn synthetic_new_file_diff(rel: &str, path: &Path) -> String {
    let content = match std::fs::read(path) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                return format!(
                    "diff --git a/{rel} b/{rel}\nnew file mode 100644\nBinary files /dev/null and b/{rel} differ\n"
                );
            }
        },
        Err(_) => return String::new(),
    };

    let lines: Vec<&str> = content.lines().collect();
    let mut out = format!(
        "diff --git a/{rel} b/{rel}\nnew file mode 100644\n--- /dev/null\n+++ b/{rel}\n@@ -0,0 +1,{} @@\n",
        lines.len()
    );
    for line in lines {
        out.push('+');
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    const HUMAN_DIFF: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,4 @@
+pub mod retry;
 pub mod client;
-pub mod old;
diff --git a/src/retry.rs b/src/retry.rs
new file mode 100644
--- /dev/null
+++ b/src/retry.rs
@@ -0,0 +1,2 @@
+pub fn retry() {}
+
";

    #[test]
    fn parse_counts_per_file_deltas() {
        let files = parse_unified_diff(HUMAN_DIFF);
        assert_eq!(files.len(), 2);
        assert_eq!(
            files["src/lib.rs"],
            FileDiffStats { additions: 1, deletions: 1 }
        );
        assert_eq!(
            files["src/retry.rs"],
            FileDiffStats { additions: 2, deletions: 0 }
        );
    }

    #[test]
    fn parse_handles_deleted_files() {
        let diff = "\
diff --git a/gone.rs b/gone.rs
deleted file mode 100644
--- a/gone.rs
+++ /dev/null
@@ -1,1 +0,0 @@
-pub fn gone() {}
";
        let files = parse_unified_diff(diff);
        assert!(files.contains_key("gone.rs"));
        assert_eq!(files["gone.rs"].deletions, 1);
    }

    #[test]
    fn empty_diff_parses_to_no_files() {
        assert!(parse_unified_diff("").is_empty());
    }

    #[test]
    fn comparison_partitions_file_sets() {
        let agent_diff = "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,1 +1,2 @@
+pub mod retry;
diff --git a/src/extra.rs b/src/extra.rs
new file mode 100644
--- /dev/null
+++ b/src/extra.rs
@@ -0,0 +1,1 @@
+pub fn extra() {}
";
        let cmp = compare_diffs(agent_diff, HUMAN_DIFF);
        assert_eq!(cmp.common_files, vec!["src/lib.rs"]);
        assert_eq!(cmp.agent_only, vec!["src/extra.rs"]);
        assert_eq!(cmp.human_only, vec!["src/retry.rs"]);
        assert_eq!(cmp.divergence, Divergence::Overlapping);
        assert!((cmp.overlap_ratio - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn superset_and_subset_classification() {
        let lib_only = "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1 +1,2 @@
+pub mod retry;
";
        let subset = compare_diffs(lib_only, HUMAN_DIFF);
        assert_eq!(subset.divergence, Divergence::AgentSubset);

        let superset = compare_diffs(HUMAN_DIFF, lib_only);
        assert_eq!(superset.divergence, Divergence::AgentSuperset);

        let identical = compare_diffs(HUMAN_DIFF, HUMAN_DIFF);
        assert_eq!(identical.divergence, Divergence::Identical);
    }

    #[test]
    fn comparison_is_symmetric_in_the_only_sets() {
        let a = "\
diff --git a/x.rs b/x.rs
--- a/x.rs
+++ b/x.rs
@@ -1 +1 @@
+x
";
        let cmp_ab = compare_diffs(a, HUMAN_DIFF);
        let cmp_ba = compare_diffs(HUMAN_DIFF, a);
        assert_eq!(cmp_ab.agent_only, cmp_ba.human_only);
        assert_eq!(cmp_ab.human_only, cmp_ba.agent_only);
        assert_eq!(cmp_ab.common_files, cmp_ba.common_files);
    }

    #[test]
    fn empty_agent_diff_is_classified() {
        let cmp = compare_diffs("", HUMAN_DIFF);
        assert_eq!(cmp.divergence, Divergence::AgentEmpty);
        assert_eq!(cmp.agent_additions, 0);
        assert_eq!(cmp.human_only.len(), 2);
    }

    #[test]
    fn both_empty_is_full_overlap() {
        let cmp = compare_diffs("", "");
        assert_eq!(cmp.overlap_ratio, 1.0);
    }

    fn run_git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_repo(dir: &Path) {
        run_git(dir, &["init", "-q"]);
        run_git(dir, &["config", "user.email", "test@test"]);
        run_git(dir, &["config", "user.name", "test"]);
    }

    #[test]
    fn capture_includes_tracked_edits_and_untracked_files() {
        let dir = TempDir::new().expect("tempdir");
        init_repo(dir.path());
        fs::write(dir.path().join("a.txt"), "one\n").expect("write");
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-q", "-m", "init"]);

        fs::write(dir.path().join("a.txt"), "one\ntwo\n").expect("write");
        fs::write(dir.path().join("brand_new.txt"), "hello\n").expect("write");

        let diff = capture_workspace_changes(dir.path()).expect("capture");
        let files = parse_unified_diff(&diff);
        assert!(files.contains_key("a.txt"));
        assert!(files.contains_key("brand_new.txt"));
        assert_eq!(files["brand_new.txt"].additions, 1);
    }

    #[test]
    fn capture_on_clean_workspace_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        init_repo(dir.path());
        fs::write(dir.path().join("a.txt"), "one\n").expect("write");
        run_git(dir.path(), &["add", "."]);
        run_git(dir.path(), &["commit", "-q", "-m", "init"]);

        let diff = capture_workspace_changes(dir.path()).expect("capture");
        assert!(parse_unified_diff(&diff).is_empty());
    }
}
