//! Domain operations over the tool invoker.
//!
//! Each wrapper owns its fallback policy (stub-then-update creates, direct
//! upload before the tool path, local git before giving up) and parses the
//! loosely shaped tool output into typed references here, at the boundary.

pub mod git;
pub mod jira;
pub mod upload;
pub mod wiki;

pub use git::{BranchOutcome, GitOperations};
pub use jira::JiraOperations;
pub use upload::{DirectUploader, UploadTarget};
pub use wiki::WikiOperations;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body used for the placeholder when a full create has to be split.
pub const STUB_BODY: &str = "Documentation is being generated and will appear here shortly.";

/// A tracker issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub key: String,
    pub id: Option<String>,
    pub summary: Option<String>,
    /// Browse URL for humans.
    pub url: Option<String>,
    /// REST URL of the issue itself.
    pub self_link: Option<String>,
}

impl IssueRef {
    /// Parse an issue from a create or fetch response.
    ///
    /// Accepts the issue object itself or one nested under `issue`.
    pub fn from_response(value: &Value, base_url: Option<&str>) -> Option<Self> {
        let issue = value.get("issue").filter(|v| v.is_object()).unwrap_or(value);
        let key = str_field(issue, &["key", "issue_key", "issueKey"])?;
        let self_link = str_field(issue, &["self"]);
        let summary = issue
            .get("fields")
            .and_then(|f| str_field(f, &["summary"]))
            .or_else(|| str_field(issue, &["summary"]));

        let url = str_field(issue, &["url", "browse_url"])
            .or_else(|| base_url.map(|base| browse_url(base, &key)))
            .or_else(|| {
                self_link
                    .as_deref()
                    .and_then(origin_of)
                    .map(|origin| browse_url(origin, &key))
            });

        Some(Self {
            id: str_field(issue, &["id"]),
            key,
            summary,
            url,
            self_link,
        })
    }

    /// Parse every issue in a search response.
    pub fn list_from_response(value: &Value, base_url: Option<&str>) -> Vec<Self> {
        let items = match value {
            Value::Array(items) => items.as_slice(),
            _ => value
                .get("issues")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        };
        items
            .iter()
            .filter_map(|item| Self::from_response(item, base_url))
            .collect()
    }
}

/// A wiki page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub self_link: Option<String>,
}

impl PageRef {
    /// Parse a page from a create, update or lookup response.
    ///
    /// Accepts the page itself, one nested under `page`, or the first entry
    /// of a `results` array.
    pub fn from_response(value: &Value, base_url: Option<&str>) -> Option<Self> {
        let page = value
            .get("page")
            .filter(|v| v.is_object())
            .or_else(|| value.get("results").and_then(|r| r.get(0)))
            .unwrap_or(value);
        let id = str_field(page, &["id", "page_id", "pageId"])?;
        let links = page.get("_links");

        let self_link = str_field(page, &["self"])
            .or_else(|| links.and_then(|l| str_field(l, &["self"])));
        let webui = links.and_then(|l| str_field(l, &["webui"]));
        let links_base = links.and_then(|l| str_field(l, &["base"]));

        let url = str_field(page, &["url", "web_url", "webUrl"]).or_else(|| {
            let webui = webui?;
            if webui.starts_with("http") {
                return Some(webui);
            }
            let base = links_base.as_deref().or(base_url)?;
            Some(format!("{}{webui}", base.trim_end_matches('/')))
        });

        Some(Self {
            id,
            title: str_field(page, &["title"]),
            url,
            self_link,
        })
    }
}

/// A source-control branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    pub name: String,
    pub url: Option<String>,
}

impl BranchRef {
    /// Parse a branch from a tool response, falling back to the requested
    /// name when the server answered in prose.
    pub fn from_response(value: &Value, requested: &str) -> Self {
        let branch = value.get("branch").filter(|v| v.is_object()).unwrap_or(value);
        Self {
            name: str_field(branch, &["name", "branch", "branch_name", "ref"])
                .map(|n| n.trim_start_matches("refs/heads/").to_string())
                .unwrap_or_else(|| requested.to_string()),
            url: str_field(branch, &["url", "web_url", "html_url"]),
        }
    }
}

/// First present key, as a string. Numbers are stringified since ids come
/// back either way.
pub(crate) fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match value.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn browse_url(base: &str, key: &str) -> String {
    format!("{}/browse/{key}", base.trim_end_matches('/'))
}

/// `scheme://host[:port]` of a URL.
fn origin_of(url: &str) -> Option<&str> {
    let scheme_end = url.find("://")? + 3;
    let path_start = url[scheme_end..].find('/').map_or(url.len(), |i| scheme_end + i);
    Some(&url[..path_start])
}
