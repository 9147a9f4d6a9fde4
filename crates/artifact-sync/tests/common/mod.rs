//! In-process fake of the jira / wiki / git tool servers plus the native
//! attachment REST endpoints, all served from one wiremock server.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use artifact_sync::{
    AttachmentPipeline, StaticContentGenerator, SyncConfig, WorkItemContext, WorkflowCoordinator,
};

/// A canned reply overriding a tool's default behaviour.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Result payload, double-encoded into `content[0].text`.
    Payload(Value),
    /// Plain prose in `content[0].text`.
    Text(String),
    /// `isError: true` with this message.
    ToolError(String),
    /// Bare HTTP status with an HTML body.
    Http(u16),
}

#[derive(Default)]
struct State {
    calls: Vec<(String, Value)>,
    uploads: Vec<String>,
    open_issues: Vec<Value>,
    taken_titles: HashSet<String>,
    scripted: HashMap<String, VecDeque<Reply>>,
    sticky: HashMap<String, Reply>,
    fail_direct_uploads: bool,
    next_issue: u32,
    next_page: u32,
}

/// Cheap-to-clone handle; every clone sees the same state.
#[derive(Clone)]
pub struct FakeToolServer {
    base: String,
    state: Arc<Mutex<State>>,
}

impl FakeToolServer {
    pub async fn start() -> (MockServer, FakeToolServer) {
        let server = MockServer::start().await;
        let fake = FakeToolServer {
            base: server.uri(),
            state: Arc::new(Mutex::new(State::default())),
        };
        Mock::given(method("POST"))
            .respond_with(fake.clone())
            .mount(&server)
            .await;
        (server, fake)
    }

    // ── Scenario setup ────────────────────────────────────────────────────

    pub fn with_open_issue(&self, key: &str, summary: &str) {
        self.state.lock().unwrap().open_issues.push(json!({
            "key": key,
            "self": format!("{}/rest/api/2/issue/{key}", self.base),
            "fields": { "summary": summary, "status": { "name": "In Progress" } }
        }));
    }

    pub fn with_taken_title(&self, title: &str) {
        self.state.lock().unwrap().taken_titles.insert(title.to_string());
    }

    /// Queue a one-shot reply for the next call of `tool`.
    pub fn script(&self, tool: &str, reply: Reply) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(tool.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Reply to every call of `tool` this way.
    pub fn always(&self, tool: &str, reply: Reply) {
        self.state
            .lock()
            .unwrap()
            .sticky
            .insert(tool.to_string(), reply);
    }

    pub fn fail_direct_uploads(&self) {
        self.state.lock().unwrap().fail_direct_uploads = true;
    }

    // ── Inspection ────────────────────────────────────────────────────────

    pub fn calls(&self, tool: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(t, _)| t == tool)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn tool_sequence(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    /// Config pointing all three tool servers at this fake.
    pub fn config(&self, repo: &Path) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.jira.mcp_url = format!("{}/jira", self.base);
        config.jira.mcp_auth_header = None;
        config.jira.base_url = None;
        config.jira.auth_header = Some("Bearer test-token".into());
        config.jira.project_key = "UI".into();
        config.jira.issue_type = "Task".into();
        config.wiki.mcp_url = format!("{}/wiki", self.base);
        config.wiki.mcp_auth_header = None;
        config.wiki.base_url = None;
        config.wiki.auth_header = Some("Bearer test-token".into());
        config.wiki.space_key = "DS".into();
        config.wiki.parent_id = None;
        config.git.mcp_url = format!("{}/git", self.base);
        config.git.mcp_auth_header = None;
        config.git.repo_path = repo.to_path_buf();
        config.git.base_branch = "main".into();
        config.git.branch_prefix = "feature/".into();
        config.call_timeout_secs = 5;
        config
    }

    // ── Tool behaviour ────────────────────────────────────────────────────

    fn dispatch(&self, state: &mut State, tool: &str, args: &Value) -> Reply {
        if let Some(reply) = state.scripted.get_mut(tool).and_then(VecDeque::pop_front) {
            return reply;
        }
        if let Some(reply) = state.sticky.get(tool) {
            return reply.clone();
        }

        match tool {
            "jira_search" => Reply::Payload(json!({
                "total": state.open_issues.len(),
                "issues": state.open_issues,
            })),
            "jira_create_issue" => {
                state.next_issue += 1;
                let id = 10000 + state.next_issue;
                let key = format!("UI-{}", state.next_issue);
                let issue = json!({
                    "id": id.to_string(),
                    "key": key,
                    "self": format!("{}/rest/api/2/issue/{id}", self.base),
                });
                let mut listed = issue.clone();
                listed["fields"] = json!({ "summary": args["summary"] });
                state.open_issues.push(listed);
                Reply::Payload(json!({ "message": "Issue created", "issue": issue }))
            }
            "jira_update_issue" | "jira_add_attachment" => {
                Reply::Payload(json!({ "key": args["issue_key"], "updated": true }))
            }
            "jira_create_remote_issue_link" => Reply::Payload(json!({ "id": 1, "self": "link" })),
            "confluence_get_page" => {
                let title = args["title"].as_str().unwrap_or_default();
                if state.taken_titles.contains(title) {
                    Reply::Payload(json!({ "page": { "id": "9", "title": title } }))
                } else {
                    Reply::Text(format!("No page titled '{title}' in space"))
                }
            }
            "confluence_create_page" => {
                let title = args["title"].as_str().unwrap_or_default().to_string();
                if state.taken_titles.contains(&title) {
                    return Reply::ToolError("A page with this title already exists".into());
                }
                state.next_page += 1;
                let id = 20000 + state.next_page;
                state.taken_titles.insert(title.clone());
                Reply::Payload(json!({
                    "id": id.to_string(),
                    "title": title,
                    "_links": {
                        "base": format!("{}/wiki", self.base),
                        "webui": format!("/spaces/DS/pages/{id}"),
                        "self": format!("{}/wiki/rest/api/content/{id}", self.base),
                    }
                }))
            }
            "confluence_update_page" => Reply::Payload(json!({
                "id": args["page_id"],
                "title": args["title"],
            })),
            "confluence_add_attachment" => Reply::Payload(json!({ "results": [{ "id": "att1" }] })),
            "git_create_branch" => {
                let name = args["branch_name"].as_str().unwrap_or_default();
                Reply::Payload(json!({
                    "name": name,
                    "url": format!("{}/git/tree/{name}", self.base),
                }))
            }
            other => Reply::ToolError(format!("Unknown tool: {other}")),
        }
    }
}

fn rpc_result(id: &Value, result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

impl Respond for FakeToolServer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();

        let Ok(envelope) = serde_json::from_slice::<Value>(&request.body) else {
            // Multipart attachment upload to the native REST API.
            let has_xsrf = request.headers.contains_key("x-atlassian-token");
            state.uploads.push(request.url.path().to_string());
            if state.fail_direct_uploads || !has_xsrf {
                return ResponseTemplate::new(500).set_body_string("upload rejected");
            }
            return ResponseTemplate::new(200).set_body_json(json!([{ "id": "att-1" }]));
        };

        let id = envelope.get("id").cloned().unwrap_or(Value::Null);
        match envelope["method"].as_str().unwrap_or_default() {
            "initialize" => rpc_result(
                &id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "fake-tools", "version": "0" }
                }),
            )
            .insert_header("mcp-session-id", "fake-session"),
            "notifications/initialized" => ResponseTemplate::new(202),
            "tools/list" => rpc_result(&id, json!({ "tools": [] })),
            "tools/call" => {
                let tool = envelope["params"]["name"].as_str().unwrap_or_default().to_string();
                let args = envelope["params"]["arguments"].clone();
                state.calls.push((tool.clone(), args.clone()));

                match self.dispatch(&mut state, &tool, &args) {
                    Reply::Payload(payload) => rpc_result(
                        &id,
                        json!({ "content": [{ "type": "text", "text": payload.to_string() }] }),
                    ),
                    Reply::Text(text) => rpc_result(
                        &id,
                        json!({ "content": [{ "type": "text", "text": text }] }),
                    ),
                    Reply::ToolError(message) => rpc_result(
                        &id,
                        json!({ "content": [{ "type": "text", "text": message }], "isError": true }),
                    ),
                    Reply::Http(status) => ResponseTemplate::new(status)
                        .set_body_string("<html><body>Internal Server Error</body></html>"),
                }
            }
            other => ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("unsupported method {other}") }
            })),
        }
    }
}

/// Tiny valid PNG as a data URI.
pub const PNG_DATA_URI: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Files left in a directory.
pub fn leftover_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

pub const DESIGN_MARKDOWN: &str = "# LoginButton\n\nPrimary call to action on the **sign-in** screen.\n\n## States\n- default\n- hover\n- disabled\n";

/// Coordinator wired to the fake, writing temp files under `temp_dir`.
pub fn coordinator(fake: &FakeToolServer, repo: &Path, temp_dir: &Path) -> WorkflowCoordinator {
    let config = fake.config(repo);
    let invoker = Arc::new(config.build_invoker().unwrap());
    let pipeline = AttachmentPipeline::new()
        .with_temp_dir(temp_dir)
        .with_timeout(config.call_timeout());
    WorkflowCoordinator::new(
        config,
        invoker,
        Arc::new(StaticContentGenerator::new(DESIGN_MARKDOWN)),
    )
    .unwrap()
    .with_attachment_pipeline(pipeline)
}

pub fn login_button() -> WorkItemContext {
    WorkItemContext {
        frame_data: vec![json!({ "id": "12:7", "name": "LoginButton", "type": "COMPONENT" })],
        screenshot: Some(PNG_DATA_URI.to_string()),
        figma_url: Some("https://www.figma.com/file/abc123/Auth?node-id=12-7".into()),
        ..WorkItemContext::new("LoginButton")
    }
}
