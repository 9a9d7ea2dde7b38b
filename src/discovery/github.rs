//! GitHub Search API client for merged pull requests.
//!
//! Uses the Search API to find merged PRs in a repository/time window, then
//! the pulls API to hydrate each candidate with its base commit and unified
//! diff. The Search API has its own rate limit (30 requests/min
//! authenticated, 10 unauthenticated) separate from the REST API (5000/h).
//!
//! Failures on individual candidates degrade to fewer candidates; they never
//! abort the run.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde_json::Value;

use super::{RepoIdentity, Task};
use crate::error::SetupError;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "agent-replay/0.1";

/// Configuration for merged-change discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// How many days back to search for merged changes.
    pub days_back: u32,
    /// Upper bound on candidates returned.
    pub max_candidates: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            days_back: 30,
            max_candidates: 100,
        }
    }
}

/// GitHub client for task discovery.
pub struct DiscoveryClient {
    client: Client,
    token: Option<String>,
    api_base: String,
}

impl DiscoveryClient {
    /// Create a new client with an optional GitHub token.
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            token,
            api_base: API_BASE.to_string(),
        }
    }

    /// Override the API base URL. Used by tests against a local server.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Build the search query string for merged PRs in the window.
    pub fn build_query(repo: &RepoIdentity, days_back: u32) -> String {
        let since = Utc::now() - ChronoDuration::days(i64::from(days_back));
        format!(
            "repo:{} is:pr is:merged merged:>={}",
            repo.full_name(),
            since.format("%Y-%m-%d")
        )
    }

    /// Find merged changes in the repository within the configured window.
    ///
    /// Returns fully hydrated `Task`s. Candidates whose details or diff
    /// cannot be fetched are skipped with a warning. Fails with a
    /// `SetupError` only when the search itself is unreachable on the first
    /// page, since that means discovery as a whole is unavailable.
    pub async fn find_merged_tasks(
        &self,
        repo: &RepoIdentity,
        config: &DiscoveryConfig,
    ) -> Result<Vec<Task>, SetupError> {
        let query = Self::build_query(repo, config.days_back);
        let per_page = 100.min(config.max_candidates.max(1));
        let max_pages = config.max_candidates.div_ceil(per_page);

        let mut tasks = Vec::new();
        for page in 1..=max_pages {
            let url = format!(
                "{}/search/issues?q={}&sort=updated&order=desc&per_page={}&page={}",
                self.api_base,
                query.replace(' ', "+"),
                per_page,
                page
            );

            let items = match self.fetch_search_page(&url).await {
                Ok(items) => items,
                Err(e) if page == 1 => {
                    return Err(SetupError::DiscoveryUnavailable(e));
                }
                Err(e) => {
                    tracing::warn!(page, error = %e, "search page failed, degrading to fewer candidates");
                    break;
                }
            };

            if items.is_empty() {
                break;
            }

            for item in &items {
                let Some(number) = item.get("number").and_then(Value::as_u64) else {
                    continue;
                };
                match self.hydrate_task(repo, number, item).await {
                    Ok(task) => tasks.push(task),
                    Err(e) => {
                        tracing::warn!(pr = number, error = %e, "skipping candidate without details");
                    }
                }
                if tasks.len() >= config.max_candidates {
                    break;
                }
            }

            tracing::info!(
                page,
                candidates = tasks.len(),
                "search page processed"
            );

            if tasks.len() >= config.max_candidates {
                break;
            }

            // Stay under the search rate limit between pages
            tokio::time::sleep(Duration::from_millis(2100)).await;
        }

        tracing::info!(total = tasks.len(), "task discovery completed");
        Ok(tasks)
    }

    async fn fetch_search_page(&self, url: &str) -> Result<Vec<Value>, String> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| format!("search request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 403 || status.as_u16() == 429 {
                return Err(format!("rate limited (HTTP {status})"));
            }
            return Err(format!("search returned HTTP {status}: {body}"));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| format!("failed to parse search response: {e}"))?;

        Ok(raw
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Fetch pull details and the unified diff for one search result.
    async fn hydrate_task(
        &self,
        repo: &RepoIdentity,
        number: u64,
        search_item: &Value,
    ) -> Result<Task, String> {
        let pull_url = format!(
            "{}/repos/{}/pulls/{}",
            self.api_base,
            repo.full_name(),
            number
        );

        let pull: Value = self
            .authorized(self.client.get(&pull_url))
            .send()
            .await
            .map_err(|e| format!("pull request fetch failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("pull request fetch failed: {e}"))?
            .json()
            .await
            .map_err(|e| format!("failed to parse pull response: {e}"))?;

        let diff = self
            .authorized(
                self.client
                    .get(&pull_url)
                    .header("Accept", "application/vnd.github.v3.diff"),
            )
            .send()
            .await
            .map_err(|e| format!("diff fetch failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("diff fetch failed: {e}"))?
            .text()
            .await
            .map_err(|e| format!("failed to read diff body: {e}"))?;

        parse_task(number, search_item, &pull, diff)
    }

    fn authorized(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request = request
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        request
    }
}

/// Combine a search item and pull details into a `Task`.
///
/// Every field access is gated behind presence checks; the GitHub payloads
/// are treated as dynamically shaped.
fn parse_task(number: u64, search_item: &Value, pull: &Value, diff: String) -> Result<Task, String> {
    let base_commit = pull
        .get("base")
        .and_then(|b| b.get("sha"))
        .and_then(Value::as_str)
        .ok_or_else(|| "missing base commit".to_string())?
        .to_string();

    let head_commit = pull
        .get("merge_commit_sha")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let title = search_item
        .get("title")
        .or_else(|| pull.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("Untitled change")
        .to_string();

    let body = search_item
        .get("body")
        .or_else(|| pull.get("body"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let author = pull
        .get("user")
        .and_then(|u| u.get("login"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    Ok(Task {
        id: number,
        title,
        body,
        url: search_item
            .get("html_url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        author,
        base_commit,
        head_commit,
        merged_at: pull
            .get("merged_at")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        additions: pull.get("additions").and_then(Value::as_u64).unwrap_or(0),
        deletions: pull.get("deletions").and_then(Value::as_u64).unwrap_or(0),
        changed_files: pull
            .get("changed_files")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        diff,
    })
}
