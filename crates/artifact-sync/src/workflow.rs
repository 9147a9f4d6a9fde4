//! Sequences one work item into an issue, a wiki page and a branch.
//!
//! ```text
//! content → issue (search or create) → issue attach → issue embed
//!         → wiki (predict title → create with retry) → wiki attach → wiki embed
//!         → cross-link → branch
//! ```
//!
//! Every stage after content generation is independently fallible. A
//! failure is recorded on the owning artifact (terminal status or warning)
//! and the run moves on; only a configuration error at construction aborts.
//! An embed only runs after its upload succeeded, and a failed embed leaves
//! the upload in place.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use toolcall::{CallResult, ToolInvoker};

use crate::artifact::{
    ArtifactKind, ArtifactStatus, ArtifactTracker, IllegalTransition, WorkflowResults,
};
use crate::attachment::{AttachmentPipeline, PreparedAttachment};
use crate::config::SyncConfig;
use crate::content::{self, ContentGenerator};
use crate::context::{ProcessOptions, WorkItemContext};
use crate::markup::{DialectConverter, RuleTable};
use crate::operations::{
    BranchOutcome, DirectUploader, GitOperations, IssueRef, JiraOperations, PageRef,
    WikiOperations,
};
use crate::resolver::IdempotencyResolver;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ContentReady,
    IssueResolved,
    IssueAttached,
    IssueEmbedded,
    WikiTitlePredicted,
    WikiCreated,
    WikiAttached,
    WikiEmbedded,
    CrossLinked,
    BranchCreated,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ContentReady => "content_ready",
            Self::IssueResolved => "issue_resolved",
            Self::IssueAttached => "issue_attached",
            Self::IssueEmbedded => "issue_embedded",
            Self::WikiTitlePredicted => "wiki_title_predicted",
            Self::WikiCreated => "wiki_created",
            Self::WikiAttached => "wiki_attached",
            Self::WikiEmbedded => "wiki_embedded",
            Self::CrossLinked => "cross_linked",
            Self::BranchCreated => "branch_created",
        };
        write!(f, "{s}")
    }
}

/// One executed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

/// What a run returns. The generated content is always present, even when
/// every remote write failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub results: WorkflowResults,
    pub content: String,
    pub stages: Vec<StageRecord>,
}

struct StageLog {
    started: Instant,
    records: Vec<StageRecord>,
}

impl StageLog {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            records: Vec::new(),
        }
    }

    fn ok(&mut self, stage: Stage, detail: Option<String>) {
        info!(stage = %stage, detail = detail.as_deref().unwrap_or(""), "Stage complete");
        self.push(stage, true, detail);
    }

    fn failed(&mut self, stage: Stage, error: String) {
        warn!(stage = %stage, error = %error, "Stage failed");
        self.push(stage, false, Some(error));
    }

    fn push(&mut self, stage: Stage, ok: bool, detail: Option<String>) {
        self.records.push(StageRecord {
            stage,
            ok,
            detail,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }
}

/// The three artifact trackers of a run.
struct Trackers {
    jira: ArtifactTracker,
    wiki: ArtifactTracker,
    git: ArtifactTracker,
}

impl Trackers {
    fn new() -> Self {
        Self {
            jira: ArtifactTracker::new(ArtifactKind::Jira),
            wiki: ArtifactTracker::new(ArtifactKind::Wiki),
            git: ArtifactTracker::new(ArtifactKind::Git),
        }
    }

    fn finish(self) -> WorkflowResults {
        WorkflowResults {
            jira: self.jira.finish(),
            wiki: self.wiki.finish(),
            git: self.git.finish(),
        }
    }
}

/// Log a rejected transition; the run continues.
fn settle(result: Result<(), IllegalTransition>) {
    if let Err(e) = result {
        warn!(error = %e, "Ignored illegal artifact transition");
    }
}

/// Drives [`process_work_item`](WorkflowCoordinator::process_work_item).
pub struct WorkflowCoordinator {
    config: SyncConfig,
    generator: Arc<dyn ContentGenerator>,
    attachments: AttachmentPipeline,
    jira_markup: Arc<dyn DialectConverter>,
    wiki_markup: Arc<dyn DialectConverter>,
    jira: JiraOperations,
    wiki: WikiOperations,
    git: GitOperations,
}

impl WorkflowCoordinator {
    /// Validates `config` before anything else; a configuration error here
    /// is the only failure that aborts a run.
    pub fn new(
        config: SyncConfig,
        invoker: Arc<dyn ToolInvoker>,
        generator: Arc<dyn ContentGenerator>,
    ) -> CallResult<Self> {
        config.validate()?;

        let uploader = DirectUploader::new(config.call_timeout());
        let attachments = AttachmentPipeline::new().with_timeout(config.call_timeout());
        let jira = JiraOperations::new(invoker.clone(), config.jira.clone(), uploader.clone());
        let wiki = WikiOperations::new(invoker.clone(), config.wiki.clone(), uploader);
        let git = GitOperations::new(invoker, config.git.clone(), config.git_tools_enabled());

        Ok(Self {
            config,
            generator,
            attachments,
            jira_markup: Arc::new(RuleTable::jira()),
            wiki_markup: Arc::new(RuleTable::confluence()),
            jira,
            wiki,
            git,
        })
    }

    pub fn with_attachment_pipeline(mut self, pipeline: AttachmentPipeline) -> Self {
        self.attachments = pipeline;
        self
    }

    /// Swap the dialect converters.
    pub fn with_converters(
        mut self,
        jira: Arc<dyn DialectConverter>,
        wiki: Arc<dyn DialectConverter>,
    ) -> Self {
        self.jira_markup = jira;
        self.wiki_markup = wiki;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Generate content and, when active creation is enabled, sync it to
    /// every target. Never fails: per-artifact problems are in the results.
    pub async fn process_work_item(
        &self,
        context: &WorkItemContext,
        options: &ProcessOptions,
    ) -> ProcessOutcome {
        let mut stages = StageLog::new();
        let mut trackers = Trackers::new();
        let component = context.display_name();
        info!(component, active = options.enable_active_creation, "Processing work item");

        let markdown = match self.generator.generate(context).await {
            Ok(markdown) => markdown,
            Err(e) => {
                let error = format!("content generation failed: {e:#}");
                stages.failed(Stage::ContentReady, error.clone());
                for tracker in [&mut trackers.jira, &mut trackers.wiki, &mut trackers.git] {
                    settle(tracker.failed(error.clone()));
                }
                return ProcessOutcome {
                    results: trackers.finish(),
                    content: String::new(),
                    stages: stages.records,
                };
            }
        };

        settle(trackers.jira.generated(content::jira_description(
            self.jira_markup.as_ref(),
            &markdown,
            context,
        )));
        settle(
            trackers
                .wiki
                .generated(content::wiki_body(self.wiki_markup.as_ref(), &markdown, None)),
        );
        stages.ok(Stage::ContentReady, Some(format!("{} bytes", markdown.len())));

        if !options.enable_active_creation {
            let branch = content::branch_name(&self.config.git.branch_prefix, None, component);
            settle(trackers.git.generated(branch));
            info!(component, "Active creation disabled, returning generated content");
            return ProcessOutcome {
                results: trackers.finish(),
                content: markdown,
                stages: stages.records,
            };
        }

        let mut attachment = self.attachments.prepare(context).await;
        self.sync_remote(
            context,
            options,
            &markdown,
            attachment.as_ref(),
            &mut trackers,
            &mut stages,
        )
        .await;
        // Both consumers are done. Drop covers any early exit.
        if let Some(attachment) = attachment.as_mut() {
            attachment.cleanup();
        }

        ProcessOutcome {
            results: trackers.finish(),
            content: markdown,
            stages: stages.records,
        }
    }

    async fn sync_remote(
        &self,
        context: &WorkItemContext,
        options: &ProcessOptions,
        markdown: &str,
        attachment: Option<&PreparedAttachment>,
        trackers: &mut Trackers,
        stages: &mut StageLog,
    ) {
        let resolver = IdempotencyResolver::new(&self.jira, &self.wiki, &self.config.resolver);
        let project_key = options
            .project_key
            .as_deref()
            .unwrap_or(&self.config.jira.project_key);
        let space_key = options
            .space_key
            .as_deref()
            .unwrap_or(&self.config.wiki.space_key);

        let issue = self
            .resolve_issue(&resolver, project_key, context, &mut trackers.jira, stages)
            .await;
        if let (Some(issue), Some(attachment)) = (issue.as_ref(), attachment) {
            // A reused issue gets the file but keeps its description.
            let embed = trackers.jira.status() == ArtifactStatus::Created;
            self.attach_to_issue(issue, attachment, embed, &mut trackers.jira, stages)
                .await;
        }

        if let Some(issue) = issue.as_ref() {
            trackers.wiki.set_content(content::wiki_body(
                self.wiki_markup.as_ref(),
                markdown,
                Some((issue.key.as_str(), issue.url.as_deref())),
            ));
        }

        let page = self
            .create_page(&resolver, space_key, context, &mut trackers.wiki, stages)
            .await;
        if let (Some(page), Some(attachment)) = (page.as_ref(), attachment) {
            self.attach_to_page(page, attachment, &mut trackers.wiki, stages)
                .await;
        }

        if let (Some(issue), Some(page)) = (issue.as_ref(), page.as_ref()) {
            self.cross_link(issue, page, &mut trackers.jira, stages).await;
        }

        let branch = content::branch_name(
            &self.config.git.branch_prefix,
            issue.as_ref().map(|i| i.key.as_str()),
            context.display_name(),
        );
        settle(trackers.git.generated(branch.clone()));
        if options.create_branch {
            self.create_branch(&branch, &mut trackers.git, stages).await;
        } else {
            trackers.git.warn("branch creation disabled for this run");
        }
    }

    async fn resolve_issue(
        &self,
        resolver: &IdempotencyResolver<'_>,
        project_key: &str,
        context: &WorkItemContext,
        tracker: &mut ArtifactTracker,
        stages: &mut StageLog,
    ) -> Option<IssueRef> {
        let summary = content::issue_summary(context);

        if let Some(existing) = resolver.find_existing_issue(project_key, &summary).await {
            settle(tracker.existing(Some(existing.key.clone()), existing.url.clone()));
            stages.ok(Stage::IssueResolved, Some(format!("existing {}", existing.key)));
            return Some(existing);
        }

        match self
            .jira
            .create_issue(project_key, &summary, tracker.content())
            .await
        {
            Ok(issue) => {
                settle(tracker.created(Some(issue.key.clone()), issue.url.clone()));
                stages.ok(Stage::IssueResolved, Some(format!("created {}", issue.key)));
                Some(issue)
            }
            Err(e) => {
                settle(tracker.failed_creation(e.to_string()));
                stages.failed(Stage::IssueResolved, e.to_string());
                None
            }
        }
    }

    async fn attach_to_issue(
        &self,
        issue: &IssueRef,
        attachment: &PreparedAttachment,
        embed: bool,
        tracker: &mut ArtifactTracker,
        stages: &mut StageLog,
    ) {
        if let Err(e) = self.jira.add_attachment(issue, attachment).await {
            tracker.warn(format!("attachment upload failed: {e}"));
            stages.failed(Stage::IssueAttached, e.to_string());
            return;
        }
        stages.ok(Stage::IssueAttached, Some(attachment.filename().to_string()));
        if !embed {
            return;
        }

        let body = content::append_block(
            tracker.content(),
            &self.jira_markup.image_embed(attachment.filename()),
        );
        match self.jira.update_description(&issue.key, &body).await {
            Ok(()) => {
                tracker.set_content(body);
                stages.ok(Stage::IssueEmbedded, None);
            }
            Err(e) => {
                tracker.warn(format!("image embed failed: {e}"));
                stages.failed(Stage::IssueEmbedded, e.to_string());
            }
        }
    }

    async fn create_page(
        &self,
        resolver: &IdempotencyResolver<'_>,
        space_key: &str,
        context: &WorkItemContext,
        tracker: &mut ArtifactTracker,
        stages: &mut StageLog,
    ) -> Option<PageRef> {
        let base = content::wiki_title(context);
        let title = resolver.predict_title(space_key, &base).await;
        stages.ok(Stage::WikiTitlePredicted, Some(title.clone()));

        let parent_id = self.config.wiki.parent_id.as_deref();
        match resolver
            .create_page_with_retry(space_key, &base, &title, tracker.content(), parent_id)
            .await
        {
            Ok(page) => {
                let url = page.url.clone().or_else(|| page.self_link.clone());
                settle(tracker.created(Some(page.id.clone()), url));
                stages.ok(
                    Stage::WikiCreated,
                    Some(page.title.clone().unwrap_or(title)),
                );
                Some(page)
            }
            Err(e) => {
                settle(tracker.failed_creation(e.to_string()));
                stages.failed(Stage::WikiCreated, e.to_string());
                None
            }
        }
    }

    async fn attach_to_page(
        &self,
        page: &PageRef,
        attachment: &PreparedAttachment,
        tracker: &mut ArtifactTracker,
        stages: &mut StageLog,
    ) {
        if let Err(e) = self.wiki.add_attachment(page, attachment).await {
            tracker.warn(format!("attachment upload failed: {e}"));
            stages.failed(Stage::WikiAttached, e.to_string());
            return;
        }
        stages.ok(Stage::WikiAttached, Some(attachment.filename().to_string()));

        let body = content::append_block(
            tracker.content(),
            &self.wiki_markup.image_embed(attachment.filename()),
        );
        let Some(title) = page.title.as_deref() else {
            tracker.warn("image embed skipped: wiki page title unknown");
            stages.failed(Stage::WikiEmbedded, "wiki page title unknown".into());
            return;
        };
        match self.wiki.update_page(page, title, &body).await {
            Ok(_) => {
                tracker.set_content(body);
                stages.ok(Stage::WikiEmbedded, None);
            }
            Err(e) => {
                tracker.warn(format!("image embed failed: {e}"));
                stages.failed(Stage::WikiEmbedded, e.to_string());
            }
        }
    }

    async fn cross_link(
        &self,
        issue: &IssueRef,
        page: &PageRef,
        tracker: &mut ArtifactTracker,
        stages: &mut StageLog,
    ) {
        let Some(url) = page.url.as_deref().or(page.self_link.as_deref()) else {
            tracker.warn("wiki page has no URL to link");
            stages.failed(Stage::CrossLinked, "wiki page has no URL".into());
            return;
        };
        let title = page.title.as_deref().unwrap_or("Design specification");
        match self.jira.link_remote(&issue.key, url, title).await {
            Ok(()) => stages.ok(Stage::CrossLinked, Some(format!("{} -> {}", issue.key, page.id))),
            Err(e) => {
                tracker.warn(format!("cross-link failed: {e}"));
                stages.failed(Stage::CrossLinked, e.to_string());
            }
        }
    }

    async fn create_branch(&self, name: &str, tracker: &mut ArtifactTracker, stages: &mut StageLog) {
        match self.git.create_branch(name).await {
            Ok(BranchOutcome::Created(branch)) => {
                settle(tracker.created(Some(branch.name.clone()), branch.url));
                stages.ok(Stage::BranchCreated, Some(branch.name));
            }
            Ok(BranchOutcome::Existing(branch)) => {
                settle(tracker.existing(Some(branch.name.clone()), branch.url));
                stages.ok(Stage::BranchCreated, Some(format!("existing {}", branch.name)));
            }
            Err(e) => {
                settle(tracker.failed_creation(e.to_string()));
                stages.failed(Stage::BranchCreated, e.to_string());
            }
        }
    }
}
