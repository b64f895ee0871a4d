use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuillErr>;

/// Kind mismatch detail for path resolution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrongKind {
    ExpectedFile,
    ExpectedDir,
}

impl std::fmt::Display for WrongKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WrongKind::ExpectedFile => write!(f, "expected a file"),
            WrongKind::ExpectedDir => write!(f, "expected a directory"),
        }
    }
}

#[derive(Error, Debug)]
pub enum QuillErr {
    // -----------------------------------------------------------------
    // Argument-level failures
    // -----------------------------------------------------------------
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // -----------------------------------------------------------------
    // Path resolution
    // -----------------------------------------------------------------
    #[error("path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("{kind}: {}", path.display())]
    PathWrongKind { path: PathBuf, kind: WrongKind },

    // -----------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------
    #[error("path is outside the sandbox: {}", .0.display())]
    PathOutsideSandbox(PathBuf),

    #[error("path is outside the code unit: {}", .0.display())]
    PathOutsideCodeUnit(PathBuf),

    #[error("operation denied: {0}")]
    Denied(String),

    #[error("writes are denied in a read-only domain: {}", .0.display())]
    WriteDeniedReadOnlyDomain(PathBuf),

    #[error("shell command is not allowed: {0}")]
    ShellCommandNotAllowed(String),

    #[error("working directory is outside the sandbox: {}", .0.display())]
    CwdOutsideSandbox(PathBuf),

    /// Returned by `CodeUnit::include_dir` when the parent of the directory
    /// being included is not itself included yet.
    #[error("parent directory is not included: {}", .0.display())]
    ParentNotIncluded(PathBuf),

    // -----------------------------------------------------------------
    // Conversation / transport
    // -----------------------------------------------------------------
    #[error("model stream failed: {0}")]
    Stream(String),

    #[error("unexpected status {0}: {1}")]
    UnexpectedStatus(reqwest::StatusCode, String),

    /// Returned by the monitor's non-blocking lookup when no fetch has
    /// completed yet.
    #[error("latest version is not cached yet")]
    NotCached,

    /// Sticky failure recorded by the monitor's version fetch.
    #[error("version check failed: {0}")]
    VersionCheck(String),

    #[error("operation canceled")]
    Canceled,

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl QuillErr {
    /// True for the denial variants a permission escalation may override.
    pub fn is_authorization_denial(&self) -> bool {
        matches!(
            self,
            QuillErr::PathOutsideSandbox(_)
                | QuillErr::PathOutsideCodeUnit(_)
                | QuillErr::Denied(_)
                | QuillErr::WriteDeniedReadOnlyDomain(_)
                | QuillErr::ShellCommandNotAllowed(_)
                | QuillErr::CwdOutsideSandbox(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_classification_covers_authorization_variants() {
        assert!(QuillErr::Denied("x".to_string()).is_authorization_denial());
        assert!(QuillErr::PathOutsideSandbox(PathBuf::from("/x")).is_authorization_denial());
        assert!(!QuillErr::Canceled.is_authorization_denial());
        assert!(!QuillErr::PathNotFound(PathBuf::from("/x")).is_authorization_denial());
    }

    #[test]
    fn wrong_kind_messages_name_the_expectation() {
        let err = QuillErr::PathWrongKind {
            path: PathBuf::from("/tmp/f"),
            kind: WrongKind::ExpectedDir,
        };
        assert_eq!(err.to_string(), "expected a directory: /tmp/f");
    }
}
