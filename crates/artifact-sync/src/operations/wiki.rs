use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use toolcall::{CallResult, ToolCallError, ToolInvoker};

use super::jira::attachment_arguments;
use super::upload::{DirectUploader, UploadTarget};
use super::{PageRef, STUB_BODY};
use crate::attachment::PreparedAttachment;
use crate::config::WikiConfig;
use crate::markup::escape_xml;

pub const GET_PAGE_TOOL: &str = "confluence_get_page";
pub const CREATE_TOOL: &str = "confluence_create_page";
pub const UPDATE_TOOL: &str = "confluence_update_page";
pub const ATTACH_TOOL: &str = "confluence_add_attachment";

/// Wiki page operations. Bodies are in storage format.
pub struct WikiOperations {
    invoker: Arc<dyn ToolInvoker>,
    config: WikiConfig,
    uploader: DirectUploader,
}

impl WikiOperations {
    pub fn new(invoker: Arc<dyn ToolInvoker>, config: WikiConfig, uploader: DirectUploader) -> Self {
        Self {
            invoker,
            config,
            uploader,
        }
    }

    pub fn config(&self) -> &WikiConfig {
        &self.config
    }

    /// Look a page up by exact title. Returns the raw response; deciding
    /// whether it names a page is left to the caller since servers disagree
    /// on the shape.
    pub async fn lookup_page(&self, space_key: &str, title: &str) -> CallResult<Value> {
        self.invoker
            .call(
                GET_PAGE_TOOL,
                json!({
                    "space_key": space_key,
                    "title": title,
                    "include_metadata": false,
                }),
            )
            .await
    }

    /// Create a page, splitting into stub then update when the full request
    /// fails in transit.
    pub async fn create_page(
        &self,
        space_key: &str,
        title: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> CallResult<PageRef> {
        let err = match self.create_raw(space_key, title, body, parent_id).await {
            Ok(page) => {
                info!(page = %page.id, title, "Wiki page created");
                return Ok(page);
            }
            Err(e) if !e.is_transport() => return Err(e),
            Err(e) => e,
        };

        warn!(
            title,
            bytes = body.len(),
            error = %err,
            "Full page create failed, retrying as stub then update"
        );
        let stub_body = format!("<p>{}</p>", escape_xml(STUB_BODY));
        let stub = self.create_raw(space_key, title, &stub_body, parent_id).await?;
        info!(page = %stub.id, title, "Stub page created");

        match self.update_page(&stub, title, body).await {
            Ok(updated) => Ok(merge_page(stub, updated)),
            Err(e) => {
                warn!(page = %stub.id, error = %e, "Stub enrichment failed, keeping stub");
                Ok(stub)
            }
        }
    }

    async fn create_raw(
        &self,
        space_key: &str,
        title: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> CallResult<PageRef> {
        let mut arguments = json!({
            "space_key": space_key,
            "title": title,
            "content": body,
            "content_format": "storage",
        });
        if let Some(parent) = parent_id {
            arguments["parent_id"] = json!(parent);
        }
        let output = self.invoker.call(CREATE_TOOL, arguments).await?;
        let mut page = PageRef::from_response(&output, self.base_url()).ok_or_else(|| {
            ToolCallError::tool(CREATE_TOOL, format!("response carried no page id: {output}"))
        })?;
        // Servers that omit the title still created it under the requested one.
        if page.title.is_none() {
            page.title = Some(title.to_string());
        }
        Ok(page)
    }

    /// Replace a page body. Returns the refreshed reference when the server
    /// echoes the page back.
    pub async fn update_page(
        &self,
        page: &PageRef,
        title: &str,
        body: &str,
    ) -> CallResult<Option<PageRef>> {
        let output = self
            .invoker
            .call(
                UPDATE_TOOL,
                json!({
                    "page_id": page.id,
                    "title": title,
                    "content": body,
                    "content_format": "storage",
                    "is_minor_edit": true,
                }),
            )
            .await?;
        debug!(page = %page.id, "Wiki page updated");
        Ok(PageRef::from_response(&output, self.base_url()))
    }

    /// Attach a file: direct upload first, tool path on failure.
    pub async fn add_attachment(
        &self,
        page: &PageRef,
        attachment: &PreparedAttachment,
    ) -> CallResult<()> {
        let target = UploadTarget::Page {
            id: &page.id,
            self_link: page.self_link.as_deref(),
        };
        let url = target.upload_url(self.base_url())?;

        match self
            .uploader
            .upload(&url, self.config.auth_header.as_deref(), attachment)
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) => warn!(page = %page.id, error = %e, "Direct upload failed, falling back to tool"),
        }

        let arguments = attachment_arguments(attachment, json!({ "page_id": page.id })).await?;
        self.invoker.call(ATTACH_TOOL, arguments).await?;
        info!(page = %page.id, filename = attachment.filename(), "Attachment added via tool");
        Ok(())
    }

    fn base_url(&self) -> Option<&str> {
        self.config.base_url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// Keep what the stub response knew when the update echo is sparser.
fn merge_page(stub: PageRef, updated: Option<PageRef>) -> PageRef {
    match updated {
        Some(page) if page.id == stub.id => PageRef {
            title: page.title.or(stub.title),
            url: page.url.or(stub.url),
            self_link: page.self_link.or(stub.self_link),
            id: page.id,
        },
        _ => stub,
    }
}
