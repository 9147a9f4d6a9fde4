use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use toolcall::{CallResult, EndpointRouter, HttpToolInvoker, ServerEndpoint, ToolCallError};

/// Endpoint key for the issue tracker tool server.
pub const JIRA_SERVER: &str = "jira";
/// Endpoint key for the wiki tool server.
pub const WIKI_SERVER: &str = "wiki";
/// Endpoint key for the git tool server.
pub const GIT_SERVER: &str = "git";

/// Substrings that mark a create failure as a naming race or transient
/// server error worth retrying under a new title.
pub const DEFAULT_CONFLICT_MARKERS: [&str; 5] =
    ["exist", "conflict", "unique", "500", "internal server error"];

/// Issue tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    /// Tool server URL (JSON-RPC endpoint).
    pub mcp_url: String,
    /// `Authorization` value for the tool server.
    pub mcp_auth_header: Option<String>,
    /// Native REST base, e.g. `https://acme.atlassian.net`.
    pub base_url: Option<String>,
    /// `Authorization` value for direct REST uploads.
    pub auth_header: Option<String>,
    pub project_key: String,
    pub issue_type: String,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            mcp_url: std::env::var("JIRA_MCP_URL").unwrap_or_default(),
            mcp_auth_header: std::env::var("JIRA_MCP_AUTH_HEADER").ok(),
            base_url: std::env::var("JIRA_BASE_URL").ok(),
            auth_header: auth_from_env("JIRA"),
            project_key: std::env::var("JIRA_PROJECT_KEY").unwrap_or_default(),
            issue_type: std::env::var("JIRA_ISSUE_TYPE").unwrap_or_else(|_| "Task".into()),
        }
    }
}

/// Wiki settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikiConfig {
    pub mcp_url: String,
    pub mcp_auth_header: Option<String>,
    /// Native REST base, e.g. `https://acme.atlassian.net/wiki`.
    pub base_url: Option<String>,
    pub auth_header: Option<String>,
    pub space_key: String,
    /// Page new documentation is filed under.
    pub parent_id: Option<String>,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            mcp_url: std::env::var("CONFLUENCE_MCP_URL").unwrap_or_default(),
            mcp_auth_header: std::env::var("CONFLUENCE_MCP_AUTH_HEADER").ok(),
            base_url: std::env::var("CONFLUENCE_BASE_URL").ok(),
            auth_header: auth_from_env("CONFLUENCE"),
            space_key: std::env::var("CONFLUENCE_SPACE_KEY").unwrap_or_default(),
            parent_id: std::env::var("CONFLUENCE_PARENT_ID").ok(),
        }
    }
}

/// Source-control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Tool server URL; empty means branches are created locally only.
    pub mcp_url: String,
    pub mcp_auth_header: Option<String>,
    pub repo_path: PathBuf,
    pub base_branch: String,
    pub branch_prefix: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            mcp_url: std::env::var("GIT_MCP_URL").unwrap_or_default(),
            mcp_auth_header: std::env::var("GIT_MCP_AUTH_HEADER").ok(),
            repo_path: std::env::var("GIT_REPO_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            base_branch: std::env::var("GIT_BASE_BRANCH").unwrap_or_else(|_| "main".into()),
            branch_prefix: std::env::var("GIT_BRANCH_PREFIX")
                .unwrap_or_else(|_| "feature/".into()),
        }
    }
}

/// Bounds and heuristics for duplicate avoidance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Candidate titles probed before falling back to a timestamp suffix.
    pub title_probe_limit: u32,
    /// Create attempts for a wiki page, first attempt included.
    pub create_retry_limit: u32,
    /// Lowercase substrings classifying a create failure as retryable.
    pub conflict_markers: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            title_probe_limit: 5,
            create_retry_limit: 3,
            conflict_markers: DEFAULT_CONFLICT_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl ResolverConfig {
    /// Whether an error message matches a configured conflict marker.
    pub fn is_conflict(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        self.conflict_markers
            .iter()
            .any(|m| !m.is_empty() && lower.contains(&m.to_lowercase()))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub jira: JiraConfig,
    pub wiki: WikiConfig,
    pub git: GitConfig,
    pub resolver: ResolverConfig,
    /// Per-request timeout for tool calls and direct uploads.
    pub call_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            jira: JiraConfig::default(),
            wiki: WikiConfig::default(),
            git: GitConfig::default(),
            resolver: ResolverConfig::default(),
            call_timeout_secs: std::env::var("SYNC_CALL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }
}

impl SyncConfig {
    /// Environment-only configuration.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Load a TOML file; keys it omits fall back to the environment.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        let config: SyncConfig =
            toml::from_str(&content).context("Failed to parse sync config TOML")?;
        Ok(config)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn git_tools_enabled(&self) -> bool {
        !self.git.mcp_url.trim().is_empty()
    }

    /// Check everything the workflow needs before any remote side effect.
    pub fn validate(&self) -> CallResult<()> {
        let mut missing = Vec::new();
        if self.jira.mcp_url.trim().is_empty() {
            missing.push("jira.mcp_url (JIRA_MCP_URL)");
        }
        if self.jira.project_key.trim().is_empty() {
            missing.push("jira.project_key (JIRA_PROJECT_KEY)");
        }
        if self.wiki.mcp_url.trim().is_empty() {
            missing.push("wiki.mcp_url (CONFLUENCE_MCP_URL)");
        }
        if self.wiki.space_key.trim().is_empty() {
            missing.push("wiki.space_key (CONFLUENCE_SPACE_KEY)");
        }
        if self.resolver.create_retry_limit == 0 {
            missing.push("resolver.create_retry_limit (must be >= 1)");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ToolCallError::Configuration(format!(
                "missing or invalid settings: {}",
                missing.join(", ")
            )))
        }
    }

    /// Routing table sending `jira_*`, `confluence_*` and `git_*` tools to
    /// their servers.
    pub fn routing_table(&self) -> EndpointRouter {
        let mut router = EndpointRouter::new()
            .with_endpoint(endpoint(JIRA_SERVER, &self.jira.mcp_url, &self.jira.mcp_auth_header))
            .with_endpoint(endpoint(WIKI_SERVER, &self.wiki.mcp_url, &self.wiki.mcp_auth_header))
            .route_prefix("jira_", JIRA_SERVER)
            .route_prefix("confluence_", WIKI_SERVER);
        if self.git_tools_enabled() {
            router = router
                .with_endpoint(endpoint(GIT_SERVER, &self.git.mcp_url, &self.git.mcp_auth_header))
                .route_prefix("git_", GIT_SERVER);
        }
        router
    }

    /// Build the HTTP invoker for this configuration.
    pub fn build_invoker(&self) -> CallResult<HttpToolInvoker> {
        HttpToolInvoker::new(self.routing_table(), self.call_timeout())
    }
}

fn endpoint(key: &str, url: &str, auth: &Option<String>) -> ServerEndpoint {
    let ep = ServerEndpoint::new(key, url.trim());
    match auth {
        Some(header) => ep.with_auth(header.clone()),
        None => ep,
    }
}

/// `Authorization` header for `user:secret` basic auth.
pub fn basic_auth(user: &str, secret: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{secret}"));
    format!("Basic {encoded}")
}

/// `<PREFIX>_AUTH_HEADER`, else bearer `<PREFIX>_BEARER_TOKEN`, else basic
/// auth from `<PREFIX>_EMAIL` + `<PREFIX>_API_TOKEN`.
fn auth_from_env(prefix: &str) -> Option<String> {
    if let Ok(header) = std::env::var(format!("{prefix}_AUTH_HEADER")) {
        return Some(header);
    }
    if let Ok(token) = std::env::var(format!("{prefix}_BEARER_TOKEN")) {
        return Some(format!("Bearer {token}"));
    }
    let email = std::env::var(format!("{prefix}_EMAIL")).ok()?;
    let token = std::env::var(format!("{prefix}_API_TOKEN")).ok()?;
    Some(basic_auth(&email, &token))
}
