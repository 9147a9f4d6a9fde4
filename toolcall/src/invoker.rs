//! Tool invocation over HTTP.
//!
//! [`HttpToolInvoker`] hides an unreliable transport behind
//! `call(tool_name, arguments)`:
//!
//! 1. Resolve the endpoint for the tool through the routing table.
//! 2. Reuse the cached session for that endpoint, or handshake. A rejected
//!    `initialize` is logged and the temporary id adopted, because some
//!    servers refuse the handshake yet accept scoped tool calls.
//! 3. POST a `tools/call` envelope stamped with the session id as the
//!    `sessionId` query parameter and both `X-Session-ID` and
//!    `mcp-session-id` headers.
//! 4. Parse whichever response shape came back and split the error channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::endpoint::{EndpointRouter, ServerEndpoint};
use crate::error::{CallResult, ToolCallError};
use crate::rpc::{self, RpcRequest};
use crate::session::{Session, SessionRegistry};

/// Header carrying the server-assigned session id.
pub const MCP_SESSION_HEADER: &str = "mcp-session-id";
/// Legacy session header still read by several servers.
pub const X_SESSION_HEADER: &str = "X-Session-ID";

const ACCEPT_VALUE: &str = "application/json, text/event-stream";
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Anything that can execute a named tool with JSON arguments.
///
/// `HttpToolInvoker` is the production implementation; tests substitute
/// scripted invokers.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke `tool_name`, returning the unwrapped payload.
    ///
    /// Transport and tool failures are both returned as errors and are never
    /// swallowed here.
    async fn call(&self, tool_name: &str, arguments: Value) -> CallResult<Value>;
}

#[async_trait]
impl<T: ToolInvoker + ?Sized> ToolInvoker for Arc<T> {
    async fn call(&self, tool_name: &str, arguments: Value) -> CallResult<Value> {
        (**self).call(tool_name, arguments).await
    }
}

/// reqwest-backed invoker holding one session per endpoint.
///
/// Cheap to clone; clones share the HTTP pool, the session cache and the
/// request id counter.
#[derive(Clone)]
pub struct HttpToolInvoker {
    client: reqwest::Client,
    router: Arc<EndpointRouter>,
    sessions: SessionRegistry,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
    client_name: String,
}

impl HttpToolInvoker {
    /// Create an invoker enforcing `timeout` on every request.
    pub fn new(router: EndpointRouter, timeout: Duration) -> CallResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ToolCallError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            router: Arc::new(router),
            sessions: SessionRegistry::new(),
            next_id: Arc::new(AtomicU64::new(1)),
            timeout,
            client_name: "artifact-sync".to_string(),
        })
    }

    /// Name announced in `clientInfo` and used as the temporary id prefix.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn router(&self) -> &EndpointRouter {
        &self.router
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Establish (or reuse) the session for an endpoint key.
    pub async fn connect(&self, server_key: &str) -> CallResult<Session> {
        let endpoint = self.router.endpoint(server_key).ok_or_else(|| {
            ToolCallError::Configuration(format!("unknown endpoint '{server_key}'"))
        })?;
        Ok(self.ensure_session(endpoint).await)
    }

    /// Names of the tools an endpoint advertises via `tools/list`.
    pub async fn list_tools(&self, server_key: &str) -> CallResult<Vec<String>> {
        let endpoint = self.router.endpoint(server_key).ok_or_else(|| {
            ToolCallError::Configuration(format!("unknown endpoint '{server_key}'"))
        })?;
        let session = self.ensure_session(endpoint).await;
        let request = RpcRequest::new(self.next_id(), "tools/list", serde_json::json!({}));
        let envelope = self.exchange(endpoint, &session.session_id, &request).await?;

        if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
            return Err(ToolCallError::transport(&endpoint.key, err.to_string()));
        }
        Ok(envelope
            .pointer("/result/tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| t.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn request(
        &self,
        endpoint: &ServerEndpoint,
        session_id: &str,
        body: &RpcRequest,
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&endpoint.url)
            .query(&[("sessionId", session_id)])
            .header(ACCEPT, ACCEPT_VALUE)
            .header(CONTENT_TYPE, "application/json")
            .header(X_SESSION_HEADER, session_id)
            .header(MCP_SESSION_HEADER, session_id)
            .timeout(self.timeout)
            .json(body);
        if let Some(auth) = &endpoint.auth_header {
            req = req.header(AUTHORIZATION, auth);
        }
        req
    }

    async fn ensure_session(&self, endpoint: &ServerEndpoint) -> Session {
        if let Some(session) = self.sessions.get(&endpoint.key).await {
            return session;
        }
        let session = self.handshake(endpoint).await;
        self.sessions.insert(session.clone()).await;
        session
    }

    /// Run `initialize`. Never fails: a rejected or unreachable handshake
    /// yields an unconfirmed session under the temporary id.
    async fn handshake(&self, endpoint: &ServerEndpoint) -> Session {
        let temp_id = format!("{}-{}", self.client_name, Uuid::new_v4());
        let init = RpcRequest::initialize(
            self.next_id(),
            &self.client_name,
            env!("CARGO_PKG_VERSION"),
        );

        match self.request(endpoint, &temp_id, &init).send().await {
            Ok(resp) if resp.status().is_success() => {
                let session_id = match session_header(resp.headers()) {
                    Some(assigned) => {
                        debug!(server = %endpoint.key, session = %assigned, "Server assigned session id");
                        assigned
                    }
                    None => {
                        debug!(server = %endpoint.key, "No session header on initialize; keeping temporary id");
                        temp_id
                    }
                };
                self.notify_initialized(endpoint, &session_id).await;
                info!(server = %endpoint.key, session = %session_id, "Tool server session established");
                Session {
                    server_key: endpoint.key.clone(),
                    session_id,
                    confirmed: true,
                }
            }
            Ok(resp) => {
                warn!(
                    server = %endpoint.key,
                    status = %resp.status(),
                    session = %temp_id,
                    "initialize rejected; continuing with temporary session id"
                );
                Session {
                    server_key: endpoint.key.clone(),
                    session_id: temp_id,
                    confirmed: false,
                }
            }
            Err(e) => {
                warn!(
                    server = %endpoint.key,
                    error = %e,
                    session = %temp_id,
                    "initialize failed; continuing with temporary session id"
                );
                Session {
                    server_key: endpoint.key.clone(),
                    session_id: temp_id,
                    confirmed: false,
                }
            }
        }
    }

    /// Fire-and-forget `notifications/initialized`.
    async fn notify_initialized(&self, endpoint: &ServerEndpoint, session_id: &str) {
        let note = RpcRequest::notification("notifications/initialized", serde_json::json!({}));
        if let Err(e) = self.request(endpoint, session_id, &note).send().await {
            debug!(server = %endpoint.key, error = %e, "initialized notification failed (ignored)");
        }
    }

    /// POST one request and recover its envelope.
    async fn exchange(
        &self,
        endpoint: &ServerEndpoint,
        session_id: &str,
        request: &RpcRequest,
    ) -> CallResult<Value> {
        let response = self
            .request(endpoint, session_id, request)
            .send()
            .await
            .map_err(|e| ToolCallError::transport(&endpoint.key, self.describe(&e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolCallError::transport(&endpoint.key, self.describe(&e)))?;

        if !status.is_success() {
            // A non-2xx reply that still carries an RPC error or an isError
            // result keeps its own channel.
            if let Ok(envelope) = rpc::parse_body(&body) {
                let carries_error = envelope.get("error").is_some_and(|e| !e.is_null())
                    || envelope.pointer("/result/isError").and_then(Value::as_bool) == Some(true);
                if carries_error {
                    return Ok(envelope);
                }
            }
            return Err(ToolCallError::transport(
                &endpoint.key,
                format!("HTTP {status}: {}", rpc::preview(body.trim())),
            ));
        }

        rpc::parse_body(&body).map_err(|e| ToolCallError::transport(&endpoint.key, e))
    }

    fn describe(&self, err: &reqwest::Error) -> String {
        if err.is_timeout() {
            format!("request timed out after {}s", self.timeout.as_secs_f32())
        } else {
            err.to_string()
        }
    }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn call(&self, tool_name: &str, arguments: Value) -> CallResult<Value> {
        let endpoint = self.router.resolve(tool_name)?;
        let session = self.ensure_session(endpoint).await;
        let request = RpcRequest::tool_call(self.next_id(), tool_name, arguments);

        debug!(
            tool = tool_name,
            server = %endpoint.key,
            session = %session.session_id,
            "tools/call"
        );

        let result = self
            .exchange(endpoint, &session.session_id, &request)
            .await
            .and_then(|envelope| rpc::into_tool_output(&endpoint.key, tool_name, envelope));

        match &result {
            Ok(_) => debug!(tool = tool_name, server = %endpoint.key, "Tool call succeeded"),
            Err(e) if e.is_transport() => {
                warn!(tool = tool_name, server = %endpoint.key, kind = e.kind(), error = %e, "Tool call transport failure")
            }
            Err(e) => info!(tool = tool_name, server = %endpoint.key, kind = e.kind(), error = %e, "Tool reported failure"),
        }
        result
    }
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    [MCP_SESSION_HEADER, X_SESSION_HEADER]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}
