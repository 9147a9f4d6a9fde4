//! Caller-supplied inputs of a workflow run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Design-selection context produced upstream. Read-only to the workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemContext {
    pub component_name: String,
    #[serde(default)]
    pub frame_data: Vec<Value>,
    /// Screenshot as a path, base64 string, data URI, URL or JSON wrapper.
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub figma_url: Option<String>,
    #[serde(default)]
    pub file_context: Option<Value>,
}

impl WorkItemContext {
    pub fn new(component_name: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            ..Default::default()
        }
    }

    /// The screenshot if present, else the image path.
    pub fn image_source(&self) -> Option<&str> {
        [self.screenshot.as_deref(), self.image_path.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    /// Component name with a fallback for blank input.
    pub fn display_name(&self) -> &str {
        let name = self.component_name.trim();
        if name.is_empty() {
            "Untitled component"
        } else {
            name
        }
    }

    /// File name from `fileContext.fileName` or `fileContext.name`.
    pub fn file_name(&self) -> Option<&str> {
        let ctx = self.file_context.as_ref()?;
        ctx.get("fileName")
            .or_else(|| ctx.get("name"))
            .and_then(Value::as_str)
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessOptions {
    /// When false the content is generated and returned with no remote
    /// side effects.
    pub enable_active_creation: bool,
    /// Overrides the configured project key.
    pub project_key: Option<String>,
    /// Overrides the configured space key.
    pub space_key: Option<String>,
    /// Skip the branch stage when false.
    pub create_branch: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            enable_active_creation: false,
            project_key: None,
            space_key: None,
            create_branch: true,
        }
    }
}

impl ProcessOptions {
    pub fn active() -> Self {
        Self {
            enable_active_creation: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_camel_case() {
        let ctx: WorkItemContext = serde_json::from_value(json!({
            "componentName": "LoginButton",
            "frameData": [{"id": "1:2"}],
            "screenshot": "data:image/png;base64,AAAA",
            "figmaUrl": "https://figma.com/file/x",
            "fileContext": {"fileName": "Auth Flows"}
        }))
        .unwrap();
        assert_eq!(ctx.component_name, "LoginButton");
        assert_eq!(ctx.frame_data.len(), 1);
        assert_eq!(ctx.image_source(), Some("data:image/png;base64,AAAA"));
        assert_eq!(ctx.file_name(), Some("Auth Flows"));
    }

    #[test]
    fn test_image_source_falls_back_to_path() {
        let ctx = WorkItemContext {
            screenshot: Some("  ".into()),
            image_path: Some("/tmp/shot.png".into()),
            ..WorkItemContext::new("Card")
        };
        assert_eq!(ctx.image_source(), Some("/tmp/shot.png"));
        assert_eq!(WorkItemContext::new("Card").image_source(), None);
    }

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(WorkItemContext::new(" ").display_name(), "Untitled component");
    }

    #[test]
    fn test_options_defaults() {
        let opts: ProcessOptions = serde_json::from_value(json!({})).unwrap();
        assert!(!opts.enable_active_creation);
        assert!(opts.create_branch);
        assert!(ProcessOptions::active().enable_active_creation);
    }
}
