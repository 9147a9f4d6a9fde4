//! Error taxonomy for tool calls.
//!
//! | Kind          | Raised by                          | Meaning                                   |
//! |---------------|------------------------------------|-------------------------------------------|
//! | Transport     | invoker                            | network, HTTP status, unparsable body, JSON-RPC `error` |
//! | Tool          | invoker                            | remote executed the tool and set `isError` |
//! | Conflict      | resource operations / resolver     | naming collision that survived retries    |
//! | NotFound      | resource operations                | empty search or lookup                    |
//! | Configuration | config validation, routing, upload | missing URL, credential or route          |

use thiserror::Error;

/// Result type alias for tool-call operations.
pub type CallResult<T> = Result<T, ToolCallError>;

/// Unified error type for the tool-call client and the operations built on it.
#[derive(Debug, Error)]
pub enum ToolCallError {
    /// The request never produced a usable response envelope.
    #[error("Transport failure [{server}]: {message}")]
    Transport { server: String, message: String },

    /// The remote ran the tool and reported a business failure.
    #[error("Tool failure [{tool}]: {message}")]
    Tool { tool: String, message: String },

    /// A naming collision on the remote side.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A search or lookup returned nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A required URL, credential or route is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ToolCallError {
    pub fn transport(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            server: server.into(),
            message: message.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Self::Tool { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Stable label used in logs and in per-artifact error strings.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Tool { .. } => "tool",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Configuration(_) => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_origin() {
        let err = ToolCallError::transport("jira", "HTTP 502");
        assert_eq!(err.to_string(), "Transport failure [jira]: HTTP 502");

        let err = ToolCallError::tool("confluence_create_page", "Space not found");
        assert_eq!(
            err.to_string(),
            "Tool failure [confluence_create_page]: Space not found"
        );
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ToolCallError::transport("a", "b").kind(), "transport");
        assert_eq!(ToolCallError::tool("a", "b").kind(), "tool");
        assert_eq!(ToolCallError::Conflict("x".into()).kind(), "conflict");
        assert_eq!(ToolCallError::NotFound("x".into()).kind(), "not_found");
        assert!(ToolCallError::Configuration("x".into()).is_configuration());
    }
}
