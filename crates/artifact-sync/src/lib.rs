//! Design-to-artifact sync.
//!
//! Turns a generated Markdown body plus design-selection context into a
//! tracker issue, a wiki page and a source branch, reached through MCP tool
//! servers via [`toolcall`]. [`WorkflowCoordinator`] is the entry point.

pub mod artifact;
pub mod attachment;
pub mod config;
pub mod content;
pub mod context;
pub mod markup;
pub mod operations;
pub mod resolver;
pub mod workflow;

pub use artifact::{ArtifactKind, ArtifactResult, ArtifactStatus, WorkflowResults};
pub use attachment::{AttachmentPipeline, PreparedAttachment, ScreenshotSource};
pub use config::SyncConfig;
pub use content::{ContentGenerator, StaticContentGenerator, TemplateContentGenerator};
pub use context::{ProcessOptions, WorkItemContext};
pub use workflow::{ProcessOutcome, Stage, StageRecord, WorkflowCoordinator};
