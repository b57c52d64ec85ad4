//! Folder exclusion matching
//!
//! Patterns are shell globs matched against the `/`-separated folder path
//! (e.g. `Inbox/Projects`). `*` and `?` never cross a `/`; `**` spans any
//! number of path components, including none. Exclusion is not inherited:
//! `Robots/*` excludes `Robots/Bot1` but not `Robots/Bot1/Logs`.

use glob::{MatchOptions, Pattern};

use crate::SyncError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A compiled list of exclusion patterns
#[derive(Debug, Clone, Default)]
pub struct FolderMatcher {
    patterns: Vec<Pattern>,
}

impl FolderMatcher {
    /// Compiles the given glob patterns
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, SyncError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p.as_ref()).map_err(|e| SyncError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Returns true if any pattern matches the folder path
    pub fn is_excluded(&self, folder_path: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(folder_path, MATCH_OPTIONS))
    }

    /// Number of compiled patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
