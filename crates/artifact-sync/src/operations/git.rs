use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info, warn};

use toolcall::{CallResult, ToolCallError, ToolInvoker};

use super::BranchRef;
use crate::config::GitConfig;

pub const CREATE_BRANCH_TOOL: &str = "git_create_branch";

/// Result of a branch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchOutcome {
    Created(BranchRef),
    /// The branch was already there; nothing was changed.
    Existing(BranchRef),
}

impl BranchOutcome {
    pub fn branch(&self) -> &BranchRef {
        match self {
            Self::Created(b) | Self::Existing(b) => b,
        }
    }
}

/// Branch creation through the git tool server, falling back to the local
/// repository.
pub struct GitOperations {
    invoker: Arc<dyn ToolInvoker>,
    config: GitConfig,
    tools_enabled: bool,
}

impl GitOperations {
    pub fn new(invoker: Arc<dyn ToolInvoker>, config: GitConfig, tools_enabled: bool) -> Self {
        Self {
            invoker,
            config,
            tools_enabled,
        }
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    pub async fn create_branch(&self, name: &str) -> CallResult<BranchOutcome> {
        if self.tools_enabled {
            match self.create_via_tool(name).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if mentions_existing(&e.to_string()) => {
                    info!(branch = name, "Branch already exists on the git server");
                    return Ok(BranchOutcome::Existing(BranchRef {
                        name: name.to_string(),
                        url: None,
                    }));
                }
                Err(e) => warn!(
                    branch = name,
                    error = %e,
                    "Git tool failed, falling back to local repository"
                ),
            }
        }
        self.create_locally(name).await
    }

    async fn create_via_tool(&self, name: &str) -> CallResult<BranchOutcome> {
        let output = self
            .invoker
            .call(
                CREATE_BRANCH_TOOL,
                json!({
                    "repo_path": self.config.repo_path.display().to_string(),
                    "branch_name": name,
                    "base_branch": self.config.base_branch,
                }),
            )
            .await?;

        let branch = BranchRef::from_response(&output, name);
        // Some servers report an existing branch as a successful call.
        let existed = output
            .get("existed")
            .or_else(|| output.get("already_exists"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
            || output.as_str().is_some_and(mentions_existing);

        if existed {
            info!(branch = %branch.name, "Branch already existed");
            Ok(BranchOutcome::Existing(branch))
        } else {
            info!(branch = %branch.name, "Branch created via git tool");
            Ok(BranchOutcome::Created(branch))
        }
    }

    /// `git branch <name> <base>` in the configured repository. Branches
    /// from HEAD when the base branch is absent.
    pub async fn create_locally(&self, name: &str) -> CallResult<BranchOutcome> {
        let repo = self.config.repo_path.as_path();
        let branch = BranchRef {
            name: name.to_string(),
            url: None,
        };

        if ref_exists(repo, &format!("refs/heads/{name}")).await? {
            info!(branch = name, repo = %repo.display(), "Local branch already exists");
            return Ok(BranchOutcome::Existing(branch));
        }

        let base = &self.config.base_branch;
        let mut args = vec!["branch", name];
        if ref_exists(repo, &format!("refs/heads/{base}")).await? {
            args.push(base.as_str());
        } else {
            debug!(base = %base, "Base branch missing locally, branching from HEAD");
        }

        let output = git(repo, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolCallError::tool("git branch", stderr.trim().to_string()));
        }
        info!(branch = name, repo = %repo.display(), "Local branch created");
        Ok(BranchOutcome::Created(branch))
    }
}

async fn git(repo: &Path, args: &[&str]) -> CallResult<std::process::Output> {
    Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .await
        .map_err(|e| ToolCallError::transport("git", format!("failed to run git: {e}")))
}

async fn ref_exists(repo: &Path, reference: &str) -> CallResult<bool> {
    let output = git(repo, &["rev-parse", "--verify", "--quiet", reference]).await?;
    Ok(output.status.success())
}

fn mentions_existing(message: &str) -> bool {
    message.to_lowercase().contains("already exists")
}
