//! Pending command - List messages needing a transformation
//!
//! A message needs transformation `kind` at `config-version` when it has
//! never been transformed, was transformed at another version, or its
//! recorded output file is gone. Quarantined messages are never listed.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use mailmirror_sync::{pending_transformations, ArchiveStorage, PendingReason};
use tracing::info;

use crate::commands::{no_archive_message, open_existing_store, CliContext};
use crate::output::{get_formatter, plural, OutputFormat};

#[derive(Debug, Args)]
pub struct PendingCommand {
    /// Transformation kind, e.g. `html` or `markdown`
    #[arg(long)]
    pub kind: String,

    /// Configuration version the outputs must have been produced with
    #[arg(long, value_name = "VERSION")]
    pub config_version: String,

    /// Print at most this many messages (human output only)
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

fn reason_label(reason: &PendingReason) -> String {
    match reason {
        PendingReason::Missing => "never transformed".to_string(),
        PendingReason::StaleVersion { found } => format!("transformed at {found}"),
        PendingReason::OutputMissing => "output file missing".to_string(),
    }
}

impl PendingCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<ExitCode> {
        let formatter = get_formatter(ctx.format);
        let config = &ctx.config;

        let Some(store) = open_existing_store(config).await? else {
            formatter.error(&no_archive_message(config));
            return Ok(ExitCode::FAILURE);
        };
        let storage = ArchiveStorage::from_config(&config.archive)?;

        info!(kind = %self.kind, version = %self.config_version, "Querying pending transformations");
        let pending =
            pending_transformations(&*store, &storage, &self.kind, &self.config_version)
                .await
                .context("Failed to query pending transformations")?;

        if ctx.format == OutputFormat::Json {
            let json = serde_json::to_value(&pending).context("Failed to serialize result")?;
            formatter.print_json(&json);
            return Ok(ExitCode::SUCCESS);
        }

        if pending.is_empty() {
            formatter.success(&format!(
                "Every message has a current '{}' output at {}",
                self.kind, self.config_version
            ));
            return Ok(ExitCode::SUCCESS);
        }

        formatter.success(&format!(
            "{} need '{}' at {}",
            plural(pending.len() as u64, "message"),
            self.kind,
            self.config_version
        ));
        for item in pending.iter().take(self.limit) {
            formatter.info(&format!(
                "  - #{} {} ({})",
                item.message.id,
                item.message.storage_path,
                reason_label(&item.reason)
            ));
        }
        if pending.len() > self.limit {
            formatter.info(&format!("  ... and {} more", pending.len() - self.limit));
        }
        Ok(ExitCode::SUCCESS)
    }
}
