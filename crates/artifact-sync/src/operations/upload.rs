//! Direct multipart attachment upload to the native REST APIs.
//!
//! Tool servers routinely mangle binary payloads, so attachments go straight
//! to `{self}/attachments` (issues) or `{self}/child/attachment` (pages)
//! first. Callers fall back to the tool path when this fails.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

use toolcall::{rpc, CallResult, ToolCallError};

use crate::attachment::PreparedAttachment;

const XSRF_HEADER: &str = "X-Atlassian-Token";

/// What an attachment is being added to.
#[derive(Debug, Clone, Copy)]
pub enum UploadTarget<'a> {
    Issue {
        key: &'a str,
        self_link: Option<&'a str>,
    },
    Page {
        id: &'a str,
        self_link: Option<&'a str>,
    },
}

impl UploadTarget<'_> {
    /// Resolve the upload URL from the self link, else the configured base.
    pub fn upload_url(&self, base_url: Option<&str>) -> CallResult<String> {
        let base_url = base_url.map(|b| b.trim_end_matches('/')).filter(|b| !b.is_empty());
        match *self {
            UploadTarget::Issue { key, self_link } => {
                let resource = match (self_link, base_url) {
                    (Some(link), _) => link.trim_end_matches('/').to_string(),
                    (None, Some(base)) => format!("{base}/rest/api/2/issue/{key}"),
                    (None, None) => {
                        return Err(ToolCallError::Configuration(format!(
                            "no self link or jira.base_url to upload attachments for {key}"
                        )))
                    }
                };
                Ok(format!("{resource}/attachments"))
            }
            UploadTarget::Page { id, self_link } => {
                let resource = match (self_link, base_url) {
                    (Some(link), _) => link.trim_end_matches('/').to_string(),
                    (None, Some(base)) => format!("{base}/rest/api/content/{id}"),
                    (None, None) => {
                        return Err(ToolCallError::Configuration(format!(
                            "no self link or wiki.base_url to upload attachments for page {id}"
                        )))
                    }
                };
                Ok(format!("{resource}/child/attachment"))
            }
        }
    }
}

/// Multipart uploader shared by the issue and page operations.
#[derive(Clone)]
pub struct DirectUploader {
    http: reqwest::Client,
    timeout: Duration,
}

impl DirectUploader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// POST the file as `multipart/form-data` field `file`.
    pub async fn upload(
        &self,
        url: &str,
        auth_header: Option<&str>,
        attachment: &PreparedAttachment,
    ) -> CallResult<()> {
        let bytes = attachment.read().await.map_err(|e| {
            ToolCallError::transport("upload", format!("failed to read {}: {e}", attachment.path().display()))
        })?;
        let size = bytes.len();

        let part = Part::bytes(bytes)
            .file_name(attachment.filename().to_string())
            .mime_str(attachment.content_type())
            .map_err(|e| ToolCallError::transport("upload", format!("invalid content type: {e}")))?;
        let form = Form::new().part("file", part).text("minorEdit", "true");

        let mut request = self
            .http
            .post(url)
            .timeout(self.timeout)
            .header(XSRF_HEADER, "no-check")
            .multipart(form);
        if let Some(auth) = auth_header {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolCallError::transport("upload", e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            debug!(url, size, filename = attachment.filename(), "Direct attachment upload succeeded");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(url, status = %status, "Direct attachment upload rejected");
        Err(ToolCallError::transport(
            "upload",
            format!("HTTP {status}: {}", rpc::preview(&body)),
        ))
    }
}
