//! Content generation seam and per-target body assembly.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::context::WorkItemContext;
use crate::markup::DialectConverter;

/// Maximum length of the slug part of a branch name.
const BRANCH_SLUG_MAX: usize = 60;

/// Produces the Markdown body for a work item.
///
/// The AI-backed generator lives upstream; this crate only consumes the
/// text it returns.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, context: &WorkItemContext) -> Result<String>;
}

/// Returns a pre-generated body verbatim.
pub struct StaticContentGenerator {
    content: String,
}

impl StaticContentGenerator {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl ContentGenerator for StaticContentGenerator {
    async fn generate(&self, _context: &WorkItemContext) -> Result<String> {
        Ok(self.content.clone())
    }
}

/// Builds a plain specification from the context alone. Used when no
/// generated body is supplied.
pub struct TemplateContentGenerator;

#[async_trait]
impl ContentGenerator for TemplateContentGenerator {
    async fn generate(&self, context: &WorkItemContext) -> Result<String> {
        let name = context.display_name();
        let mut out = format!(
            "# {name}\n\n## Overview\n\nImplementation specification for the `{name}` component.\n"
        );

        if let Some(file) = context.file_name() {
            out.push_str(&format!("\nSource file: **{file}**\n"));
        }

        if !context.frame_data.is_empty() {
            out.push_str("\n## Frames\n\n");
            for frame in &context.frame_data {
                out.push_str(&format!("- {}\n", describe_frame(frame)));
            }
        }

        out.push_str(
            "\n## Acceptance criteria\n\n\
             - Matches the design at all documented breakpoints\n\
             - Keyboard accessible with visible focus state\n\
             - Covered by component tests\n",
        );

        if let Some(url) = &context.figma_url {
            out.push_str(&format!("\n## Design reference\n\n[Open in Figma]({url})\n"));
        }
        Ok(out)
    }
}

fn describe_frame(frame: &Value) -> String {
    let name = frame
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("unnamed frame");
    let size = match (
        frame.get("width").and_then(Value::as_f64),
        frame.get("height").and_then(Value::as_f64),
    ) {
        (Some(w), Some(h)) => format!(" ({w}×{h})"),
        _ => String::new(),
    };
    match frame.get("type").and_then(Value::as_str) {
        Some(kind) => format!("{name} [{}]{size}", kind.to_lowercase()),
        None => format!("{name}{size}"),
    }
}

/// Summary the tracker issue is created (and searched) under.
pub fn issue_summary(context: &WorkItemContext) -> String {
    format!("Implement {} component", context.display_name())
}

/// Base title for the wiki page before disambiguation.
pub fn wiki_title(context: &WorkItemContext) -> String {
    format!("{} Design Specification", context.display_name())
}

/// Branch name such as `feature/ui-12-login-button`.
pub fn branch_name(prefix: &str, issue_key: Option<&str>, component: &str) -> String {
    let mut slug = String::new();
    if let Some(key) = issue_key {
        slug.push_str(&slugify(key));
        slug.push('-');
    }
    slug.push_str(&slugify(component));
    let slug: String = slug.chars().take(BRANCH_SLUG_MAX).collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "component" } else { slug };
    format!("{prefix}{slug}")
}

/// Lowercase kebab-case, splitting camelCase words.
pub fn slugify(text: &str) -> String {
    let mut out = String::new();
    let mut prev_lower = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower && !out.ends_with('-') {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        } else {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            prev_lower = false;
        }
    }
    out.trim_matches('-').to_string()
}

/// Issue description in the tracker dialect.
pub fn jira_description(
    converter: &dyn DialectConverter,
    markdown: &str,
    context: &WorkItemContext,
) -> String {
    let mut body = converter.convert(markdown);
    if let Some(url) = &context.figma_url {
        body = append_block(&body, &format!("Design: {}", converter.link("Figma", url)));
    }
    body
}

/// Wiki page body in the wiki dialect, linking back to the issue if any.
pub fn wiki_body(
    converter: &dyn DialectConverter,
    markdown: &str,
    issue: Option<(&str, Option<&str>)>,
) -> String {
    let body = converter.convert(markdown);
    match issue {
        Some((key, Some(url))) => append_block(
            &body,
            &converter.convert(&format!("Tracked in [{key}]({url})")),
        ),
        Some((key, None)) => append_block(&body, &converter.convert(&format!("Tracked in {key}"))),
        None => body,
    }
}

/// Append a block separated by a blank line.
pub fn append_block(body: &str, block: &str) -> String {
    let body = body.trim_end();
    if body.is_empty() {
        block.to_string()
    } else {
        format!("{body}\n\n{block}")
    }
}
