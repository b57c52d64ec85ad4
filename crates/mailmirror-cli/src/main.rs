//! mailmirror CLI - Command-line interface for mailmirror
//!
//! Provides commands for:
//! - Mirroring a remote mailbox into the local archive
//! - Viewing archive and per-folder sync status
//! - Verifying the index against the archive
//! - Listing messages that need a transformation

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    pending::PendingCommand, status::StatusCommand, sync::SyncCommand, verify::VerifyCommand,
    CliContext,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "mailmirror", version, about = "Mirror a remote mailbox into a local archive")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Archive root directory (overrides archive.root)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Synchronize the archive with the remote mailbox
    Sync(SyncCommand),
    /// Show archive and folder status
    Status(StatusCommand),
    /// Check the index against the files in the archive
    Verify(VerifyCommand),
    /// List messages needing a transformation
    Pending(PendingCommand),
}

fn init_tracing(verbose: u8, configured_level: &str, json: bool) {
    let level = match verbose {
        0 => configured_level,
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (config, config_path) =
        commands::load_config(cli.config.as_deref(), cli.root.as_deref())?;
    init_tracing(cli.verbose, &config.logging.level, cli.json);
    debug!(config_path = %config_path.display(), "Loaded configuration");

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = CliContext { config, format };

    match cli.command {
        Commands::Sync(cmd) => cmd.execute(&ctx).await,
        Commands::Status(cmd) => cmd.execute(&ctx).await,
        Commands::Verify(cmd) => cmd.execute(&ctx).await,
        Commands::Pending(cmd) => cmd.execute(&ctx).await,
    }
}
