use std::sync::Arc;

use base64::Engine;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use toolcall::{CallResult, ToolCallError, ToolInvoker};

use super::upload::{DirectUploader, UploadTarget};
use super::{IssueRef, STUB_BODY};
use crate::attachment::PreparedAttachment;
use crate::config::JiraConfig;
use crate::resolver::existing_issue_jql;

pub const SEARCH_TOOL: &str = "jira_search";
pub const CREATE_TOOL: &str = "jira_create_issue";
pub const UPDATE_TOOL: &str = "jira_update_issue";
pub const ATTACH_TOOL: &str = "jira_add_attachment";
pub const REMOTE_LINK_TOOL: &str = "jira_create_remote_issue_link";

/// Issue tracker operations.
pub struct JiraOperations {
    invoker: Arc<dyn ToolInvoker>,
    config: JiraConfig,
    uploader: DirectUploader,
}

impl JiraOperations {
    pub fn new(invoker: Arc<dyn ToolInvoker>, config: JiraConfig, uploader: DirectUploader) -> Self {
        Self {
            invoker,
            config,
            uploader,
        }
    }

    pub fn config(&self) -> &JiraConfig {
        &self.config
    }

    /// Run a JQL search.
    pub async fn search_issues(&self, jql: &str, limit: u32) -> CallResult<Vec<IssueRef>> {
        let output = self
            .invoker
            .call(
                SEARCH_TOOL,
                json!({ "jql": jql, "fields": "summary,status", "limit": limit }),
            )
            .await?;
        let issues = IssueRef::list_from_response(&output, self.base_url());
        debug!(jql, count = issues.len(), "Issue search finished");
        Ok(issues)
    }

    /// Create an issue with the full description.
    ///
    /// When the full request fails in transit (large descriptions often time
    /// out), a stub is created and then enriched through the update path. A
    /// stub whose enrichment fails is still returned. Before the stub, an
    /// exact-summary search picks up a full create that landed anyway.
    pub async fn create_issue(
        &self,
        project_key: &str,
        summary: &str,
        description: &str,
    ) -> CallResult<IssueRef> {
        let full = self.create_raw(project_key, summary, description).await;
        let err = match full {
            Ok(issue) => {
                info!(issue = %issue.key, summary, "Issue created");
                return Ok(issue);
            }
            Err(e) if !e.is_transport() => return Err(e),
            Err(e) => e,
        };

        // A timed-out create may still have landed.
        if let Some(issue) = self.find_by_summary(project_key, summary).await {
            info!(
                issue = %issue.key,
                summary,
                error = %err,
                "Full create landed despite transport failure"
            );
            return Ok(issue);
        }

        warn!(
            summary,
            bytes = description.len(),
            error = %err,
            "Full issue create failed, retrying as stub then update"
        );
        let stub = self.create_raw(project_key, summary, STUB_BODY).await?;
        info!(issue = %stub.key, "Stub issue created");

        if let Err(e) = self.update_description(&stub.key, description).await {
            warn!(issue = %stub.key, error = %e, "Stub enrichment failed, keeping stub");
        }
        Ok(stub)
    }

    async fn find_by_summary(&self, project_key: &str, summary: &str) -> Option<IssueRef> {
        let jql = existing_issue_jql(project_key, summary);
        match self.search_issues(&jql, 5).await {
            Ok(issues) => issues
                .into_iter()
                .find(|issue| issue.summary.as_deref().map(str::trim) == Some(summary.trim())),
            Err(e) => {
                debug!(summary, error = %e, "Post-failure search failed");
                None
            }
        }
    }

    async fn create_raw(
        &self,
        project_key: &str,
        summary: &str,
        description: &str,
    ) -> CallResult<IssueRef> {
        let output = self
            .invoker
            .call(
                CREATE_TOOL,
                json!({
                    "project_key": project_key,
                    "summary": summary,
                    "issue_type": self.config.issue_type,
                    "description": description,
                }),
            )
            .await?;
        IssueRef::from_response(&output, self.base_url()).ok_or_else(|| {
            ToolCallError::tool(CREATE_TOOL, format!("response carried no issue key: {output}"))
        })
    }

    pub async fn update_description(&self, issue_key: &str, description: &str) -> CallResult<()> {
        self.invoker
            .call(
                UPDATE_TOOL,
                json!({
                    "issue_key": issue_key,
                    "fields": { "description": description },
                }),
            )
            .await?;
        debug!(issue = issue_key, "Issue description updated");
        Ok(())
    }

    /// Attach a file: direct upload first, tool path on failure.
    pub async fn add_attachment(
        &self,
        issue: &IssueRef,
        attachment: &PreparedAttachment,
    ) -> CallResult<()> {
        let target = UploadTarget::Issue {
            key: &issue.key,
            self_link: issue.self_link.as_deref(),
        };
        let url = target.upload_url(self.base_url())?;

        match self
            .uploader
            .upload(&url, self.config.auth_header.as_deref(), attachment)
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) => warn!(
                issue = %issue.key,
                error = %e,
                "Direct upload failed, falling back to tool"
            ),
        }

        let arguments = attachment_arguments(attachment, json!({ "issue_key": issue.key })).await?;
        self.invoker.call(ATTACH_TOOL, arguments).await?;
        info!(issue = %issue.key, filename = attachment.filename(), "Attachment added via tool");
        Ok(())
    }

    /// Add a remote link (e.g. to the wiki page) to an issue.
    pub async fn link_remote(&self, issue_key: &str, url: &str, title: &str) -> CallResult<()> {
        self.invoker
            .call(
                REMOTE_LINK_TOOL,
                json!({
                    "issue_key": issue_key,
                    "url": url,
                    "title": title,
                    "relationship": "documentation",
                }),
            )
            .await?;
        info!(issue = issue_key, url, "Remote link added");
        Ok(())
    }

    fn base_url(&self) -> Option<&str> {
        self.config.base_url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// Tool-path attachment arguments: inline base64 plus the local path for
/// servers sharing the filesystem.
pub(crate) async fn attachment_arguments(
    attachment: &PreparedAttachment,
    target: Value,
) -> CallResult<Value> {
    let bytes = attachment.read().await.map_err(|e| {
        ToolCallError::transport(
            "attachment",
            format!("failed to read {}: {e}", attachment.path().display()),
        )
    })?;
    let mut arguments = json!({
        "filename": attachment.filename(),
        "content_type": attachment.content_type(),
        "content_base64": base64::engine::general_purpose::STANDARD.encode(bytes),
        "file_path": attachment.path().display().to_string(),
    });
    if let (Some(args), Value::Object(extra)) = (arguments.as_object_mut(), target) {
        args.extend(extra);
    }
    Ok(arguments)
}
