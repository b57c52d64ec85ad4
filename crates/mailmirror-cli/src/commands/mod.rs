//! Subcommands and the setup they share

pub mod pending;
pub mod status;
pub mod sync;
pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use mailmirror_cache::{DatabasePool, SqliteStateStore};
use mailmirror_core::config::Config;

use crate::output::OutputFormat;

/// What every subcommand receives from `main`
pub struct CliContext {
    pub config: Config,
    pub format: OutputFormat,
}

/// Loads the configuration and applies the `--root` override
///
/// A file named with `--config` must load. The default location may be
/// absent, in which case built-in defaults apply.
pub fn load_config(explicit: Option<&Path>, root: Option<&Path>) -> Result<(Config, PathBuf)> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    let mut config = if explicit.is_some() || path.exists() {
        Config::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
    } else {
        Config::default()
    };

    if let Some(root) = root {
        config.archive.root = root.to_path_buf();
    }
    Ok((config, path))
}

/// Fails with every validation error at once
pub fn ensure_valid(config: &Config) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    let lines: Vec<String> = errors.iter().map(ToString::to_string).collect();
    bail!("Invalid configuration:\n  {}", lines.join("\n  "))
}

/// Opens the state database of an archive that has been synced before
///
/// Returns `None` when the archive has no database yet; read-only commands
/// never create one.
pub async fn open_existing_store(config: &Config) -> Result<Option<Arc<SqliteStateStore>>> {
    let db_path = config.archive.database_path();
    if !db_path.exists() {
        return Ok(None);
    }
    let pool = DatabasePool::new(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    Ok(Some(Arc::new(SqliteStateStore::new(pool.pool().clone()))))
}

/// Message shown when a read-only command finds no archive state
pub fn no_archive_message(config: &Config) -> String {
    format!(
        "No archive state found at {}. Run 'mailmirror sync' first.",
        config.archive.database_path().display()
    )
}
