use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use artifact_sync::{
    ContentGenerator, ProcessOptions, StaticContentGenerator, SyncConfig,
    TemplateContentGenerator, WorkItemContext, WorkflowCoordinator,
};

#[derive(Parser)]
#[command(name = "artifact-sync", version, about = "Sync design documentation to tracker, wiki and git")]
struct Cli {
    /// TOML config file; unset keys fall back to the environment.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process one work item and print the outcome as JSON.
    Process {
        /// Work item context (JSON, camelCase fields).
        #[arg(long)]
        context: PathBuf,

        /// Pre-generated Markdown body. A template is used when omitted.
        #[arg(long)]
        content: Option<PathBuf>,

        /// Generate content only; no remote writes.
        #[arg(long)]
        dry_run: bool,

        /// Skip the branch stage.
        #[arg(long)]
        no_branch: bool,

        #[arg(long)]
        project_key: Option<String>,

        #[arg(long)]
        space_key: Option<String>,
    },
    /// Handshake with every configured tool server and list its tools.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::from_env(),
    };

    match cli.command {
        Command::Process {
            context,
            content,
            dry_run,
            no_branch,
            project_key,
            space_key,
        } => {
            let raw = std::fs::read_to_string(&context)
                .with_context(|| format!("Failed to read {}", context.display()))?;
            let work_item: WorkItemContext =
                serde_json::from_str(&raw).context("Failed to parse work item context")?;

            let generator: Arc<dyn ContentGenerator> = match content {
                Some(path) => {
                    let body = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    Arc::new(StaticContentGenerator::new(body))
                }
                None => Arc::new(TemplateContentGenerator),
            };

            let options = ProcessOptions {
                enable_active_creation: !dry_run,
                project_key,
                space_key,
                create_branch: !no_branch,
            };

            let invoker = Arc::new(config.build_invoker()?);
            let coordinator = WorkflowCoordinator::new(config, invoker, generator)?;
            let outcome = coordinator.process_work_item(&work_item, &options).await;

            info!(
                jira = %outcome.results.jira.status,
                wiki = %outcome.results.wiki.status,
                git = %outcome.results.git.status,
                "Work item processed"
            );
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Check => {
            config.validate()?;
            let invoker = config.build_invoker()?;
            let keys: Vec<String> = invoker.router().endpoints().map(|e| e.key.clone()).collect();

            let mut failures = 0;
            for key in keys {
                let session = invoker.connect(&key).await?;
                match invoker.list_tools(&key).await {
                    Ok(tools) => println!(
                        "{key}: session {} ({}), {} tools",
                        session.session_id,
                        if session.confirmed { "confirmed" } else { "optimistic" },
                        tools.len()
                    ),
                    Err(e) => {
                        warn!(server = %key, error = %e, "Tool listing failed");
                        println!("{key}: unreachable ({e})");
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                bail!("{failures} tool server(s) failed the check");
            }
        }
    }

    Ok(())
}
