//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for remote identifiers,
//! opaque resume tokens, and archive-relative paths. Each newtype ensures
//! data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Remote identifiers
// ============================================================================

/// Validates a remote identifier: non-empty, no whitespace or control characters
fn validate_remote_id(kind: &str, id: &str) -> Result<(), DomainError> {
    if id.is_empty() {
        return Err(DomainError::InvalidRemoteId(format!(
            "{kind} cannot be empty"
        )));
    }
    if id.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(DomainError::InvalidRemoteId(format!(
            "{kind} contains whitespace or control characters: {id:?}"
        )));
    }
    Ok(())
}

macro_rules! remote_id_type {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new validated identifier
            ///
            /// # Errors
            /// Returns error if the ID is empty or contains whitespace
            pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
                let id = id.into();
                validate_remote_id($kind, &id)?;
                Ok(Self(id))
            }

            /// Get the inner string reference
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

remote_id_type!(
    /// Remote folder ID, stable across renames and moves
    FolderId,
    "Folder ID"
);

remote_id_type!(
    /// Remote message ID (may change when the message moves between folders)
    MessageId,
    "Message ID"
);

remote_id_type!(
    /// Remote-assigned immutable message ID that survives folder moves
    ImmutableId,
    "Immutable ID"
);

// ============================================================================
// Opaque resume tokens
// ============================================================================

macro_rules! opaque_token_type {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new token
            ///
            /// The token is opaque - only emptiness is rejected.
            pub fn new(token: impl Into<String>) -> Result<Self, DomainError> {
                let token = token.into();
                if token.is_empty() {
                    return Err(DomainError::InvalidCursor(format!(
                        "{} cannot be empty",
                        $kind
                    )));
                }
                Ok(Self(token))
            }

            /// Get the inner string reference
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(token: $name) -> Self {
                token.0
            }
        }
    };
}

opaque_token_type!(
    /// Delta cursor: "all changes up to here have been observed" for one folder
    DeltaCursor,
    "Delta cursor"
);

opaque_token_type!(
    /// Continuation token for the next page of an in-progress walk
    PageToken,
    "Page token"
);

// ============================================================================
// ArchivePath
// ============================================================================

/// Path relative to the archive root, always `/`-separated
///
/// Invariants:
/// - Not empty, not absolute
/// - No empty, `.` or `..` components
/// - No backslashes or NUL bytes
///
/// Used both for folder paths (`Inbox/Projects`) and for message storage
/// paths (`messages/Inbox/2024/03/...eml`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArchivePath(String);

impl ArchivePath {
    /// Create a new validated ArchivePath
    ///
    /// # Errors
    /// Returns error if the path is empty, absolute, or contains
    /// traversal components
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let path = path.into();

        if path.is_empty() {
            return Err(DomainError::InvalidPath("Path cannot be empty".to_string()));
        }
        if path.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Path must be relative: {path}"
            )));
        }
        if path.contains('\\') || path.contains('\0') {
            return Err(DomainError::InvalidPath(format!(
                "Path contains forbidden characters: {path:?}"
            )));
        }
        for component in path.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(DomainError::InvalidPath(format!(
                    "Path has an invalid component: {path}"
                )));
            }
        }

        Ok(Self(path))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends one or more `/`-separated components
    pub fn join(&self, tail: &str) -> Result<Self, DomainError> {
        Self::new(format!("{}/{}", self.0, tail))
    }

    /// Returns the parent path, or `None` for a single-component path
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// Returns the last component
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Returns the components in order
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Number of components
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.split('/').count()
    }

    /// Component-wise prefix test (`a/b` is a prefix of `a/b/c`, not of `a/bc`)
    #[must_use]
    pub fn starts_with(&self, prefix: &ArchivePath) -> bool {
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0[prefix.0.len()..].starts_with('/'))
    }

    /// Replaces `old_prefix` with `new_prefix`
    ///
    /// Returns `None` if `old_prefix` is not a component-wise prefix.
    #[must_use]
    pub fn rebase(&self, old_prefix: &ArchivePath, new_prefix: &ArchivePath) -> Option<Self> {
        if !self.starts_with(old_prefix) {
            return None;
        }
        let rest = &self.0[old_prefix.0.len()..];
        Some(Self(format!("{}{}", new_prefix.0, rest)))
    }

    /// Resolves this path against a filesystem root
    #[must_use]
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for component in self.components() {
            out.push(component);
        }
        out
    }

    /// Converts a filesystem path under `root` back into an ArchivePath
    pub fn from_fs_path(root: &Path, path: &Path) -> Result<Self, DomainError> {
        let relative = path.strip_prefix(root).map_err(|_| {
            DomainError::InvalidPath(format!(
                "{} is not under {}",
                path.display(),
                root.display()
            ))
        })?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Self::new(parts.join("/"))
    }
}

impl Display for ArchivePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArchivePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ArchivePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ArchivePath> for String {
    fn from(path: ArchivePath) -> Self {
        path.0
    }
}
