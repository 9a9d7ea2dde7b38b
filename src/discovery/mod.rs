//! Task discovery: finding merged changes to replay.
//!
//! A `Task` is a historical, already-solved change request (a merged pull
//! request) used as a replay scenario. Tasks are immutable once discovered.

mod github;

pub use github::{DiscoveryClient, DiscoveryConfig};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SetupError;

/// A merged change request selected for replay.
///
/// Created by discovery, read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Pull request number (unique within the repository).
    pub id: u64,
    /// Title of the change.
    pub title: String,
    /// Description body, if the author wrote one.
    pub body: Option<String>,
    /// Web URL of the change.
    pub url: String,
    /// Login of the human author.
    pub author: String,
    /// Commit the change was based on. Workspaces are pinned here.
    pub base_commit: String,
    /// Merge commit of the human solution.
    pub head_commit: String,
    /// ISO-8601 merge timestamp.
    pub merged_at: String,
    /// Lines added by the human solution.
    pub additions: u64,
    /// Lines deleted by the human solution.
    pub deletions: u64,
    /// Number of files the human solution touched.
    pub changed_files: u64,
    /// Unified diff of the human solution.
    pub diff: String,
}

impl Task {
    /// One-line summary for logs and tables.
    pub fn summary(&self) -> String {
        format!(
            "#{}: {} (+{}/-{})",
            self.id, self.title, self.additions, self.deletions
        )
    }
}

/// A repository target as given on the command line: either a GitHub URL
/// or a local clone with a GitHub origin remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoIdentity {
    pub owner: String,
    pub name: String,
}

impl RepoIdentity {
    /// Parse "owner/name" out of an https or ssh GitHub URL.
    pub fn from_url(url: &str) -> Option<Self> {
        let patterns = [
            r"^https?://github\.com/([^/]+)/([^/]+?)(?:\.git)?/?$",
            r"^git@github\.com:([^/]+)/([^/]+?)(?:\.git)?$",
        ];
        for pattern in patterns {
            let re = Regex::new(pattern).ok()?;
            if let Some(caps) = re.captures(url) {
                return Some(Self {
                    owner: caps[1].to_string(),
                    name: caps[2].to_string(),
                });
            }
        }
        None
    }

    /// Parse a target, failing with a setup error when it is neither a
    /// GitHub URL nor convertible to one.
    pub fn parse(target: &str) -> Result<Self, SetupError> {
        Self::from_url(target).ok_or_else(|| SetupError::InvalidTarget(target.to_string()))
    }

    /// "owner/name" form used in queries and reports.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Canonical https clone URL.
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.name)
    }
}

/// Whether a target string looks like a remote URL rather than a local path.
pub fn is_url(target: &str) -> bool {
    target.starts_with("http://")
        || target.starts_with("https://")
        || target.starts_with("git@")
        || target.starts_with("git://")
}
