//! Server endpoints and the tool-name routing table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CallResult, ToolCallError};

/// A tool server reachable over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    /// Routing key, also the session cache key.
    pub key: String,
    /// URL every JSON-RPC request is POSTed to.
    pub url: String,
    /// Full `Authorization` header value, if the server wants one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_header: Option<String>,
}

impl ServerEndpoint {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            auth_header: None,
        }
    }

    pub fn with_auth(mut self, header: impl Into<String>) -> Self {
        self.auth_header = Some(header.into());
        self
    }
}

/// Maps tool names to endpoints by longest matching prefix.
#[derive(Debug, Clone, Default)]
pub struct EndpointRouter {
    endpoints: HashMap<String, ServerEndpoint>,
    routes: Vec<(String, String)>,
    fallback: Option<String>,
}

impl EndpointRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint under its key.
    pub fn with_endpoint(mut self, endpoint: ServerEndpoint) -> Self {
        self.endpoints.insert(endpoint.key.clone(), endpoint);
        self
    }

    /// Route every tool whose name starts with `prefix` to `key`.
    pub fn route_prefix(mut self, prefix: &str, key: &str) -> Self {
        self.routes.push((prefix.to_string(), key.to_string()));
        // Longest prefix first so `jira_dev_` can shadow `jira_`.
        self.routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    /// Endpoint used when no prefix matches.
    pub fn with_fallback(mut self, key: &str) -> Self {
        self.fallback = Some(key.to_string());
        self
    }

    pub fn endpoint(&self, key: &str) -> Option<&ServerEndpoint> {
        self.endpoints.get(key)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &ServerEndpoint> {
        self.endpoints.values()
    }

    /// Resolve the endpoint that serves `tool_name`.
    pub fn resolve(&self, tool_name: &str) -> CallResult<&ServerEndpoint> {
        let key = self
            .routes
            .iter()
            .find(|(prefix, _)| tool_name.starts_with(prefix.as_str()))
            .map(|(_, key)| key.as_str())
            .or(self.fallback.as_deref())
            .ok_or_else(|| {
                ToolCallError::Configuration(format!("no endpoint routes tool '{tool_name}'"))
            })?;

        self.endpoints.get(key).ok_or_else(|| {
            ToolCallError::Configuration(format!(
                "tool '{tool_name}' routes to unknown endpoint '{key}'"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> EndpointRouter {
        EndpointRouter::new()
            .with_endpoint(ServerEndpoint::new("jira", "http://jira.local/mcp"))
            .with_endpoint(ServerEndpoint::new("wiki", "http://wiki.local/mcp"))
            .with_endpoint(ServerEndpoint::new("jira-dev", "http://dev.local/mcp"))
            .route_prefix("jira_", "jira")
            .route_prefix("confluence_", "wiki")
            .route_prefix("jira_dev_", "jira-dev")
    }

    #[test]
    fn test_resolves_by_prefix() {
        let r = router();
        assert_eq!(r.resolve("jira_create_issue").unwrap().key, "jira");
        assert_eq!(r.resolve("confluence_get_page").unwrap().key, "wiki");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let r = router();
        assert_eq!(r.resolve("jira_dev_create_issue").unwrap().key, "jira-dev");
    }

    #[test]
    fn test_unrouted_tool_is_configuration_error() {
        let err = router().resolve("git_create_branch").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_fallback_route() {
        let r = router().with_fallback("jira");
        assert_eq!(r.resolve("anything").unwrap().key, "jira");
    }

    #[test]
    fn test_route_to_missing_endpoint() {
        let r = EndpointRouter::new().route_prefix("git_", "git");
        let err = r.resolve("git_create_branch").unwrap_err();
        assert!(err.to_string().contains("unknown endpoint 'git'"));
    }
}
