//! Per-artifact status tracking with legal transition guards.
//!
//! Each artifact (issue, wiki page, branch) moves through:
//!
//! ```text
//! Pending → Generated | Failed
//! Generated → Created | Existing | FailedCreation | Failed
//! ```
//!
//! Statuses never regress: every terminal status is a sink and
//! [`ArtifactTracker::advance`] rejects anything off the table. The tracker
//! records each transition so a finished result carries its own history.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which remote artifact a result describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Jira,
    Wiki,
    Git,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jira => write!(f, "jira"),
            Self::Wiki => write!(f, "wiki"),
            Self::Git => write!(f, "git"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Nothing prepared yet.
    Pending,
    /// Target-specific content is ready; no remote write attempted.
    Generated,
    /// Created by this run.
    Created,
    /// A matching artifact already existed and was reused.
    Existing,
    /// The remote create failed.
    FailedCreation,
    /// Content for this artifact could not be prepared.
    Failed,
}

impl ArtifactStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Existing | Self::FailedCreation | Self::Failed
        )
    }

    /// Whether the artifact exists remotely after this status.
    pub fn is_available(self) -> bool {
        matches!(self, Self::Created | Self::Existing)
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Generated => write!(f, "generated"),
            Self::Created => write!(f, "created"),
            Self::Existing => write!(f, "existing"),
            Self::FailedCreation => write!(f, "failed_creation"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

fn is_legal_transition(from: ArtifactStatus, to: ArtifactStatus) -> bool {
    use ArtifactStatus::*;

    matches!(
        (from, to),
        (Pending, Generated)
            | (Pending, Failed)
            | (Generated, Created)
            | (Generated, Existing)
            | (Generated, FailedCreation)
            | (Generated, Failed)
    )
}

/// A single recorded status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: ArtifactStatus,
    pub to: ArtifactStatus,
    /// Milliseconds since the tracker was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Returned when a transition would move a status backwards or sideways.
#[derive(Debug, Clone, Error)]
#[error("Illegal {kind} status transition: {from} → {to}")]
pub struct IllegalTransition {
    pub kind: ArtifactKind,
    pub from: ArtifactStatus,
    pub to: ArtifactStatus,
}

/// Immutable view of one artifact's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactResult {
    pub kind: ArtifactKind,
    pub status: ArtifactStatus,
    /// Remote identifier: issue key, page id, or branch name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Target-dialect body prepared for this artifact.
    pub content: String,
    /// Non-fatal problems in follow-up stages (attach, embed, link).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
}

/// Mutable builder behind an [`ArtifactResult`].
pub struct ArtifactTracker {
    result: ArtifactResult,
    created_at: Instant,
}

impl ArtifactTracker {
    pub fn new(kind: ArtifactKind) -> Self {
        Self {
            result: ArtifactResult {
                kind,
                status: ArtifactStatus::Pending,
                id: None,
                url: None,
                error: None,
                content: String::new(),
                warnings: Vec::new(),
                transitions: Vec::new(),
            },
            created_at: Instant::now(),
        }
    }

    pub fn status(&self) -> ArtifactStatus {
        self.result.status
    }

    pub fn id(&self) -> Option<&str> {
        self.result.id.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.result.url.as_deref()
    }

    pub fn content(&self) -> &str {
        &self.result.content
    }

    /// Move to `to` if the transition table allows it.
    pub fn advance(
        &mut self,
        to: ArtifactStatus,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        let from = self.result.status;
        if !is_legal_transition(from, to) {
            return Err(IllegalTransition {
                kind: self.result.kind,
                from,
                to,
            });
        }

        tracing::debug!(
            artifact = %self.result.kind,
            from = %from,
            to = %to,
            "Artifact status transition"
        );

        self.result.transitions.push(TransitionRecord {
            from,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.result.status = to;
        Ok(())
    }

    /// Content is ready.
    pub fn generated(&mut self, content: String) -> Result<(), IllegalTransition> {
        self.advance(ArtifactStatus::Generated, None)?;
        self.result.content = content;
        Ok(())
    }

    pub fn created(
        &mut self,
        id: Option<String>,
        url: Option<String>,
    ) -> Result<(), IllegalTransition> {
        self.advance(ArtifactStatus::Created, None)?;
        self.result.id = id;
        self.result.url = url;
        Ok(())
    }

    pub fn existing(
        &mut self,
        id: Option<String>,
        url: Option<String>,
    ) -> Result<(), IllegalTransition> {
        self.advance(ArtifactStatus::Existing, Some("matched an existing artifact"))?;
        self.result.id = id;
        self.result.url = url;
        Ok(())
    }

    pub fn failed_creation(&mut self, error: impl Into<String>) -> Result<(), IllegalTransition> {
        let error = error.into();
        self.advance(ArtifactStatus::FailedCreation, Some(error.as_str()))?;
        self.result.error = Some(error);
        Ok(())
    }

    pub fn failed(&mut self, error: impl Into<String>) -> Result<(), IllegalTransition> {
        let error = error.into();
        self.advance(ArtifactStatus::Failed, Some(error.as_str()))?;
        self.result.error = Some(error);
        Ok(())
    }

    /// Record a non-fatal problem without touching the status.
    pub fn warn(&mut self, warning: impl Into<String>) {
        self.result.warnings.push(warning.into());
    }

    /// Replace the prepared body after a successful enrichment.
    pub fn set_content(&mut self, content: String) {
        self.result.content = content;
    }

    pub fn snapshot(&self) -> ArtifactResult {
        self.result.clone()
    }

    pub fn finish(self) -> ArtifactResult {
        self.result
    }
}

/// The three per-artifact results of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResults {
    pub jira: ArtifactResult,
    pub wiki: ArtifactResult,
    pub git: ArtifactResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut t = ArtifactTracker::new(ArtifactKind::Jira);
        assert_eq!(t.status(), ArtifactStatus::Pending);
        t.generated("body".into()).unwrap();
        t.created(Some("UI-1".into()), Some("https://j/browse/UI-1".into()))
            .unwrap();
        let r = t.finish();
        assert_eq!(r.status, ArtifactStatus::Created);
        assert_eq!(r.id.as_deref(), Some("UI-1"));
        assert_eq!(r.content, "body");
        assert_eq!(r.transitions.len(), 2);
    }

    #[test]
    fn test_status_never_regresses() {
        let mut t = ArtifactTracker::new(ArtifactKind::Wiki);
        t.generated("x".into()).unwrap();
        t.failed_creation("boom").unwrap();

        for to in [
            ArtifactStatus::Pending,
            ArtifactStatus::Generated,
            ArtifactStatus::Created,
            ArtifactStatus::Existing,
            ArtifactStatus::Failed,
        ] {
            let err = t.advance(to, None).unwrap_err();
            assert_eq!(err.from, ArtifactStatus::FailedCreation);
        }
        assert_eq!(t.status(), ArtifactStatus::FailedCreation);
        assert_eq!(t.snapshot().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_cannot_create_before_generated() {
        let mut t = ArtifactTracker::new(ArtifactKind::Git);
        let err = t.created(None, None).unwrap_err();
        assert_eq!(err.to, ArtifactStatus::Created);
        assert!(err.to_string().contains("git"));
        assert_eq!(t.status(), ArtifactStatus::Pending);
    }

    #[test]
    fn test_pending_can_fail_directly() {
        let mut t = ArtifactTracker::new(ArtifactKind::Jira);
        t.failed("generator unavailable").unwrap();
        assert!(t.status().is_terminal());
        assert!(!t.status().is_available());
    }

    #[test]
    fn test_warnings_do_not_change_status() {
        let mut t = ArtifactTracker::new(ArtifactKind::Jira);
        t.generated("x".into()).unwrap();
        t.existing(Some("UI-3".into()), None).unwrap();
        t.warn("attachment upload failed");
        let r = t.snapshot();
        assert_eq!(r.status, ArtifactStatus::Existing);
        assert_eq!(r.warnings.len(), 1);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ArtifactStatus::FailedCreation).unwrap();
        assert_eq!(json, "\"failed_creation\"");
        assert_eq!(ArtifactStatus::FailedCreation.to_string(), "failed_creation");
    }
}
