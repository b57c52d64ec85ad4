//! Verify command - Cross-check the message index against the archive
//!
//! Reports rows pointing at missing files, interrupted quarantines, size or
//! hash mismatches, untracked files and leftover temp files. With
//! `--repair` interrupted quarantines are completed and integrity flags
//! updated. Content is never deleted.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use mailmirror_sync::{ArchiveStorage, ConsistencyChecker, ConsistencyOptions, ConsistencyReport};
use tracing::info;

use crate::commands::{no_archive_message, open_existing_store, CliContext};
use crate::output::{get_formatter, plural, OutputFormat, OutputFormatter};

/// Findings listed per category in human output
const MAX_LISTED: usize = 20;

#[derive(Debug, Args)]
pub struct VerifyCommand {
    /// Complete interrupted quarantines and flag or clear integrity problems
    #[arg(long)]
    pub repair: bool,

    /// Hash every file instead of comparing sizes
    #[arg(long)]
    pub hashes: bool,
}

impl VerifyCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<ExitCode> {
        let formatter = get_formatter(ctx.format);
        let config = &ctx.config;

        let Some(store) = open_existing_store(config).await? else {
            formatter.error(&no_archive_message(config));
            return Ok(ExitCode::FAILURE);
        };
        let storage = ArchiveStorage::from_config(&config.archive)?;
        let checker = ConsistencyChecker::new(store, Arc::new(storage));

        let options = ConsistencyOptions {
            repair: self.repair,
            verify_hashes: self.hashes,
        };
        info!(repair = options.repair, hashes = options.verify_hashes, "Verifying archive");
        let report = checker.check(options).await.context("Verification failed")?;

        if ctx.format == OutputFormat::Json {
            let json = serde_json::to_value(&report).context("Failed to serialize report")?;
            formatter.print_json(&json);
        } else {
            print_report(&report, self.repair, formatter.as_ref());
        }

        Ok(if needs_attention(&report, self.repair) {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    }
}

/// True if the archive still disagrees with the index after this run
///
/// Interrupted quarantines count only when they were not repaired.
pub fn needs_attention(report: &ConsistencyReport, repaired: bool) -> bool {
    !report.dangling.is_empty()
        || !report.mismatched.is_empty()
        || (!repaired && !report.orphaned_quarantine.is_empty())
}

fn print_report(report: &ConsistencyReport, repair: bool, formatter: &dyn OutputFormatter) {
    if report.is_clean() {
        formatter.success(&format!("{} checked, index matches archive", plural(report.checked, "message")));
    } else {
        formatter.warn(&format!(
            "{} checked, problems found",
            plural(report.checked, "message")
        ));
    }

    let sections: [(&str, &[mailmirror_sync::consistency::Discrepancy]); 3] = [
        ("Missing files", &report.dangling),
        ("Interrupted quarantines", &report.orphaned_quarantine),
        ("Mismatched files", &report.mismatched),
    ];
    for (title, items) in sections {
        if items.is_empty() {
            continue;
        }
        formatter.info(&format!("{}: {}", title, items.len()));
        for item in items.iter().take(MAX_LISTED) {
            formatter.info(&format!(
                "  - #{} {} {} ({})",
                item.message, item.remote_id, item.path, item.detail
            ));
        }
    }

    let files: [(&str, &[std::path::PathBuf]); 2] = [
        ("Untracked files", &report.untracked),
        ("Leftover temp files", &report.stale_partials),
    ];
    for (title, items) in files {
        if items.is_empty() {
            continue;
        }
        formatter.info(&format!("{}: {}", title, items.len()));
        for path in items.iter().take(MAX_LISTED) {
            formatter.info(&format!("  - {}", path.display()));
        }
    }

    if repair {
        formatter.info(&format!(
            "Repaired {}, flagged {}, cleared {}",
            report.repaired, report.flagged, report.cleared
        ));
    } else if !report.is_clean() {
        formatter.info("Run with --repair to complete quarantines and flag missing files");
    }
}
