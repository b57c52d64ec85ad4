//! Transformation and attachment records
//!
//! These rows are produced by the transformation pipeline, which lives
//! outside the sync engine. The engine only reads them to decide which
//! messages still need work, and offers atomic replacement of a message's
//! attachment set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::ArchivePath;

/// Output of one transformation kind (e.g. `html`, `markdown`) for a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    /// Local message key
    pub message_id: i64,
    /// Transformation kind
    pub kind: String,
    /// Archive-relative output path
    pub output_path: ArchivePath,
    /// Version marker of the configuration that produced the output
    pub config_version: String,
    pub completed_at: DateTime<Utc>,
}

impl Transformation {
    /// A row is current only if produced under the given configuration version
    pub fn is_current(&self, config_version: &str) -> bool {
        self.config_version == config_version
    }
}

/// A binary part extracted from a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: u64,
    /// Where the extracted bytes were written, if they were written
    pub storage_path: Option<ArchivePath>,
    /// Skipped by policy (e.g. too large)
    pub skipped: bool,
    /// Blocked by security policy
    pub blocked: bool,
    pub block_reason: Option<String>,
    /// Container archives opened from this attachment
    pub extractions: Vec<ArchiveExtraction>,
}

/// One container archive opened from an attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveExtraction {
    /// Container format (e.g. `zip`, `tar.gz`)
    pub format: String,
    pub skipped: bool,
    pub blocked: bool,
    pub error: Option<String>,
    pub files: Vec<ExtractedFile>,
}

/// A file pulled out of a container archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFile {
    /// Path inside the archive
    pub inner_path: String,
    pub size_bytes: u64,
    pub storage_path: Option<ArchivePath>,
    pub skipped: bool,
    pub blocked: bool,
}
