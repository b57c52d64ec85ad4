//! Status command - Display what the archive holds
//!
//! Shows the mailbox sync state (mode, last run, last error) and, per
//! folder, its local path, message counts, checkpoint and retirement.

use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use mailmirror_core::domain::{Checkpoint, Folder};
use mailmirror_core::ports::{IStateStore, MessageCounts};
use tracing::info;

use crate::commands::{no_archive_message, open_existing_store, CliContext};
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Include retired folders
    #[arg(long)]
    pub all: bool,
}

struct FolderStatus {
    folder: Folder,
    counts: MessageCounts,
}

impl FolderStatus {
    fn checkpoint_label(&self) -> &'static str {
        match &self.folder.checkpoint {
            Checkpoint::Fresh => "not started",
            Checkpoint::Listing { next_page: None, .. } => "listing pending",
            Checkpoint::Listing { .. } => "listing in progress",
            Checkpoint::Delta { next_page: None, .. } => "cursor stored",
            Checkpoint::Delta { .. } => "delta in progress",
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let folder = &self.folder;
        serde_json::json!({
            "id": folder.id.as_str(),
            "path": folder.local_path.as_str(),
            "display_name": folder.display_name,
            "mode": folder.mode().as_str(),
            "cursor": matches!(folder.checkpoint, Checkpoint::Delta { .. }),
            "mid_walk": folder.checkpoint.is_mid_walk(),
            "last_sync_at": folder.last_sync_at,
            "retired": folder.is_retired(),
            "remote_total": folder.total_count,
            "remote_unread": folder.unread_count,
            "archived": self.counts.active,
            "quarantined": self.counts.quarantined,
            "flagged": self.counts.flagged,
        })
    }
}

fn when(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<ExitCode> {
        let formatter = get_formatter(ctx.format);
        let config = &ctx.config;

        let Some(store) = open_existing_store(config).await? else {
            formatter.error(&no_archive_message(config));
            return Ok(ExitCode::FAILURE);
        };

        let mailbox = &config.sync.mailbox;
        info!(mailbox = %mailbox, "Showing status");
        let state = store
            .get_sync_state(mailbox)
            .await
            .context("Failed to read sync state")?;
        let totals = store
            .message_counts(None)
            .await
            .context("Failed to count messages")?;

        let mut folders = Vec::new();
        for folder in store.get_folders().await.context("Failed to list folders")? {
            if folder.is_retired() && !self.all {
                continue;
            }
            let counts = store
                .message_counts(Some(&folder.id))
                .await
                .with_context(|| format!("Failed to count messages in {}", folder.local_path))?;
            folders.push(FolderStatus { folder, counts });
        }
        folders.sort_by(|a, b| a.folder.local_path.as_str().cmp(b.folder.local_path.as_str()));

        if ctx.format == OutputFormat::Json {
            let json = serde_json::json!({
                "mailbox": mailbox,
                "root": config.archive.root.display().to_string(),
                "state": state,
                "archived": totals.active,
                "quarantined": totals.quarantined,
                "flagged": totals.flagged,
                "folders": folders.iter().map(FolderStatus::to_json).collect::<Vec<_>>(),
            });
            formatter.print_json(&json);
            return Ok(ExitCode::SUCCESS);
        }

        formatter.success(&format!(
            "mailmirror status - {} ({})",
            mailbox,
            config.archive.root.display()
        ));
        match &state {
            Some(state) => {
                formatter.info(&format!("Mode:          {}", state.mode.as_str()));
                formatter.info(&format!("Last run:      {}", when(state.last_run_at)));
                formatter.info(&format!("Last success:  {}", when(state.last_success_at)));
                if let Some(error) = &state.last_error {
                    formatter.warn(&format!("Last run failed: {}", error));
                }
            }
            None => formatter.info("Never synced"),
        }
        formatter.info(&format!(
            "Messages:      {} archived, {} quarantined, {} flagged",
            totals.active, totals.quarantined, totals.flagged
        ));
        formatter.info("");

        for status in &folders {
            let folder = &status.folder;
            let retired = if folder.is_retired() { " [retired]" } else { "" };
            formatter.info(&format!("{}{}", folder.local_path, retired));
            formatter.info(&format!(
                "    {} archived / {} remote, {} quarantined, {} flagged",
                status.counts.active,
                folder.total_count,
                status.counts.quarantined,
                status.counts.flagged
            ));
            formatter.info(&format!(
                "    {}, {}, last sync {}",
                folder.mode().as_str(),
                status.checkpoint_label(),
                when(folder.last_sync_at)
            ));
        }
        Ok(ExitCode::SUCCESS)
    }
}
