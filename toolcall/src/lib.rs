//! Tool-call client for MCP-style JSON-RPC servers.
//!
//! This library provides:
//! - Lazy per-endpoint session handshakes that tolerate servers rejecting
//!   `initialize` while still accepting scoped tool calls
//! - `tools/call` framing with session stamping (query parameter plus both
//!   session header variants)
//! - Response parsing that accepts bare JSON, SSE `data:` frames, and
//!   double-encoded `result.content[0].text` payloads
//! - Separate error channels for transport/protocol failures and tool-level
//!   (`isError`) failures
//!
//! # Usage
//!
//! ```rust,ignore
//! use toolcall::{EndpointRouter, HttpToolInvoker, ServerEndpoint, ToolInvoker};
//!
//! let router = EndpointRouter::new()
//!     .with_endpoint(ServerEndpoint::new("jira", "http://localhost:9000/mcp"))
//!     .route_prefix("jira_", "jira");
//! let invoker = HttpToolInvoker::new(router, Duration::from_secs(60))?;
//! let issue = invoker.call("jira_get_issue", json!({"issue_key": "UI-12"})).await?;
//! ```

pub mod endpoint;
pub mod error;
pub mod invoker;
pub mod rpc;
pub mod session;

pub use endpoint::{EndpointRouter, ServerEndpoint};
pub use error::{CallResult, ToolCallError};
pub use invoker::{HttpToolInvoker, ToolInvoker};
pub use rpc::{RpcRequest, PROTOCOL_VERSION};
pub use session::{Session, SessionRegistry};
