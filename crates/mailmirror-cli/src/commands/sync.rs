//! Sync command - Mirror the remote mailbox into the archive
//!
//! Provides the `mailmirror sync` CLI command which:
//! 1. Applies flag overrides to the loaded configuration and validates it
//! 2. Opens the state database and the Graph mail source
//! 3. Runs one orchestrated pass, cancelled cleanly on Ctrl-C or SIGTERM
//! 4. Prints the run summary and exits non-zero if any folder failed

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use mailmirror_cache::{DatabasePool, SqliteStateStore};
use mailmirror_core::config::Config;
use mailmirror_graph::{EnvTokenProvider, GraphMailSource};
use mailmirror_sync::{RunOptions, RunSummary, SyncOrchestrator};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::commands::{ensure_valid, CliContext};
use crate::output::{get_formatter, plural, OutputFormat, OutputFormatter};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Number of folders synced concurrently
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Report what would change without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Folder exclusion glob, matched against local folder paths (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,
}

impl SyncCommand {
    /// Flags win over file values; exclusions add to the configured list
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(parallel) = self.parallel {
            config.sync.parallelism = parallel;
        }
        config.sync.exclude.extend(self.exclude.iter().cloned());
    }

    pub async fn execute(&self, ctx: &CliContext) -> Result<ExitCode> {
        let formatter = get_formatter(ctx.format);
        let mut config = ctx.config.clone();
        self.apply_overrides(&mut config);
        ensure_valid(&config)?;

        let db_path = config.archive.database_path();
        let pool = if self.dry_run && !db_path.exists() {
            // Nothing mirrored yet; plan against an empty index without
            // creating the archive
            DatabasePool::in_memory().await
        } else {
            tokio::fs::create_dir_all(&config.archive.root)
                .await
                .with_context(|| {
                    format!("Failed to create archive root {}", config.archive.root.display())
                })?;
            DatabasePool::new(&db_path).await
        }
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        let store = Arc::new(SqliteStateStore::new(pool.pool().clone()));

        let credentials = Arc::new(EnvTokenProvider::from_config(&config.graph));
        let source = GraphMailSource::from_config(&config.graph, credentials)
            .context("Failed to set up the Graph mail source")?;
        let orchestrator = SyncOrchestrator::from_config(Arc::new(source), store, &config)?;

        let options = RunOptions {
            dry_run: self.dry_run,
            ..RunOptions::from_config(&config.sync)
        };
        info!(
            root = %config.archive.root.display(),
            mailbox = %config.sync.mailbox,
            parallelism = options.parallelism,
            dry_run = options.dry_run,
            "Starting sync"
        );

        let summary = orchestrator
            .run(&options, shutdown_token())
            .await
            .context("Sync aborted")?;

        print_summary(&summary, ctx.format, formatter.as_ref())?;
        Ok(exit_code(&summary))
    }
}

/// True when any folder ended in an unrecoverable error or the run was
/// interrupted
pub fn run_failed(summary: &RunSummary) -> bool {
    summary.has_failures() || summary.cancelled
}

fn exit_code(summary: &RunSummary) -> ExitCode {
    if run_failed(summary) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_summary(
    summary: &RunSummary,
    format: OutputFormat,
    formatter: &dyn OutputFormatter,
) -> Result<()> {
    if format == OutputFormat::Json {
        let json = serde_json::to_value(summary).context("Failed to serialize run summary")?;
        formatter.print_json(&json);
        return Ok(());
    }

    let duration = summary
        .finished_at
        .map(|end| end - summary.started_at)
        .map(|d| format!(" in {:.1}s", d.num_milliseconds() as f64 / 1000.0))
        .unwrap_or_default();
    let headline = if summary.dry_run {
        format!("Dry run of '{}' finished{}", summary.mailbox, duration)
    } else if summary.cancelled {
        format!("Sync of '{}' interrupted{}", summary.mailbox, duration)
    } else {
        format!("Sync of '{}' finished{}", summary.mailbox, duration)
    };
    if run_failed(summary) {
        formatter.warn(&headline);
    } else {
        formatter.success(&headline);
    }

    formatter.info(&format!(
        "Folders:      {} synced, {} failed, {} excluded",
        summary.folders_synced, summary.folders_failed, summary.folders_excluded
    ));
    let tree_changes = summary.folders_created
        + summary.folders_moved
        + summary.folders_retired
        + summary.folders_revived;
    if tree_changes > 0 {
        formatter.info(&format!(
            "Folder tree:  {} new, {} moved, {} retired, {} revived",
            summary.folders_created,
            summary.folders_moved,
            summary.folders_retired,
            summary.folders_revived
        ));
    }
    formatter.info(&format!("Added:        {}", summary.added));
    formatter.info(&format!("Updated:      {}", summary.updated));
    formatter.info(&format!("Moved:        {}", summary.moved));
    formatter.info(&format!("Quarantined:  {}", summary.quarantined));
    if summary.flagged > 0 {
        formatter.info(&format!("Flagged:      {}", summary.flagged));
    }
    formatter.info(&format!("Errors:       {}", summary.error_count));

    if summary.dry_run {
        for folder in &summary.folders {
            let mode = folder.mode.map(|m| m.as_str()).unwrap_or("unknown");
            formatter.info(&format!("  would sync {} ({})", folder.path, mode));
        }
    }

    if !summary.errors.is_empty() {
        formatter.error(&format!(
            "{} occurred:",
            plural(summary.error_count, "error")
        ));
        for issue in &summary.errors {
            formatter.info(&format!("  - {}", issue));
        }
        let hidden = summary.error_count.saturating_sub(summary.errors.len() as u64);
        if hidden > 0 {
            formatter.info(&format!("  ... and {} more", hidden));
        }
    }
    Ok(())
}

/// A token cancelled on Ctrl-C or SIGTERM
///
/// Workers stop between pages, so every committed page stays committed.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        warn!("Shutdown requested, stopping after the current page");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM; only Ctrl-C will cancel");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
