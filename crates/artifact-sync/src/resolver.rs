//! Duplicate avoidance for issues and wiki pages.
//!
//! Neither remote offers compare-and-swap, so uniqueness is eventual and
//! bounded:
//!
//! - Issues: search by exact summary in the project, skipping completed
//!   issues. A hit is reused. A failed search counts as no hit.
//! - Pages: probe `Base`, `Base (1)`, `Base (2)`, ... up to
//!   `title_probe_limit`, then fall back to a timestamp suffix. The create
//!   itself retries up to `create_retry_limit` times on failures matching the
//!   configured conflict markers, with a fresh suffix each time.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use toolcall::{CallResult, ToolCallError};

use crate::config::ResolverConfig;
use crate::operations::{IssueRef, JiraOperations, PageRef, WikiOperations};

const SEARCH_LIMIT: u32 = 10;

/// Per-run resolver over the issue and page operations.
pub struct IdempotencyResolver<'a> {
    jira: &'a JiraOperations,
    wiki: &'a WikiOperations,
    config: &'a ResolverConfig,
}

impl<'a> IdempotencyResolver<'a> {
    pub fn new(
        jira: &'a JiraOperations,
        wiki: &'a WikiOperations,
        config: &'a ResolverConfig,
    ) -> Self {
        Self { jira, wiki, config }
    }

    /// An open issue in `project_key` whose summary is exactly `summary`.
    pub async fn find_existing_issue(&self, project_key: &str, summary: &str) -> Option<IssueRef> {
        let jql = existing_issue_jql(project_key, summary);
        let issues = match self.jira.search_issues(&jql, SEARCH_LIMIT).await {
            Ok(issues) => issues,
            Err(e) => {
                warn!(summary, error = %e, "Issue search failed, treating as no match");
                return None;
            }
        };

        // `~` is a fuzzy text match; keep only exact summaries. Results that
        // did not echo a summary came from the exact-phrase query and count.
        let wanted = summary.trim();
        let found = issues.into_iter().find(|issue| {
            issue
                .summary
                .as_deref()
                .map_or(true, |s| s.trim() == wanted)
        });
        match &found {
            Some(issue) => info!(issue = %issue.key, summary, "Found existing issue"),
            None => debug!(summary, "No existing issue"),
        }
        found
    }

    /// First free candidate title, or a timestamped one once the probe
    /// bound is spent.
    pub async fn predict_title(&self, space_key: &str, base: &str) -> String {
        for n in 0..self.config.title_probe_limit {
            let candidate = candidate_title(base, n);
            let taken = match self.wiki.lookup_page(space_key, &candidate).await {
                Ok(response) => page_taken(&response),
                Err(e) => {
                    debug!(title = %candidate, error = %e, "Page lookup failed, treating as free");
                    false
                }
            };
            if !taken {
                debug!(title = %candidate, "Title is free");
                return candidate;
            }
            debug!(title = %candidate, "Title is taken");
        }

        let fallback = timestamped_title(base, None);
        info!(
            title = %fallback,
            probes = self.config.title_probe_limit,
            "All candidate titles taken, using timestamp"
        );
        fallback
    }

    /// Create the page under `title`, retrying conflicts with a fresh
    /// suffix. Non-conflict failures are returned immediately.
    pub async fn create_page_with_retry(
        &self,
        space_key: &str,
        base: &str,
        title: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> CallResult<PageRef> {
        let limit = self.config.create_retry_limit.max(1);
        let mut title = title.to_string();

        for attempt in 1..=limit {
            let err = match self.wiki.create_page(space_key, &title, body, parent_id).await {
                Ok(page) => return Ok(page),
                Err(e) => e,
            };

            let message = err.to_string();
            if err.is_configuration() || !self.config.is_conflict(&message) {
                return Err(err);
            }
            if attempt == limit {
                return Err(ToolCallError::Conflict(format!(
                    "could not create \"{base}\" after {limit} attempts: {message}"
                )));
            }

            warn!(title = %title, attempt, error = %message, "Page create conflicted, retrying");
            title = timestamped_title(base, Some(attempt));
        }

        Err(ToolCallError::Conflict(format!("could not create \"{base}\"")))
    }
}

/// `Base` for 0, `Base (n)` otherwise.
pub fn candidate_title(base: &str, n: u32) -> String {
    if n == 0 {
        base.to_string()
    } else {
        format!("{base} ({n})")
    }
}

/// `Base (2026-10-19 08:15:02.123)`, with `-attempt` appended on retries.
pub fn timestamped_title(base: &str, attempt: Option<u32>) -> String {
    let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
    match attempt {
        Some(n) => format!("{base} ({stamp}-{n})"),
        None => format!("{base} ({stamp})"),
    }
}

/// Whether a lookup response unambiguously names an existing page.
pub fn page_taken(response: &Value) -> bool {
    match response {
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => {
            let has_id = map.get("id").is_some_and(|id| match id {
                Value::String(s) => !s.trim().is_empty(),
                Value::Number(_) => true,
                _ => false,
            });
            has_id
                || map.get("page").is_some_and(|p| p.is_object() && page_taken(p))
                || map
                    .get("results")
                    .and_then(Value::as_array)
                    .is_some_and(|r| !r.is_empty())
                || ["size", "totalSize", "total"].iter().any(|k| {
                    map.get(*k)
                        .and_then(Value::as_u64)
                        .is_some_and(|n| n > 0)
                })
        }
        _ => false,
    }
}

/// JQL for open issues with an exact-phrase summary in a project.
pub fn existing_issue_jql(project_key: &str, summary: &str) -> String {
    format!(
        "project = \"{}\" AND summary ~ \"\\\"{}\\\"\" AND statusCategory != Done ORDER BY created DESC",
        jql_escape(project_key),
        jql_escape(summary)
    )
}

fn jql_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "")
}
