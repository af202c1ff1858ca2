//! Error types for the release-cycle engine.
//!
//! Every variant except the plumbing ones (`Git`, `GitHub`, `Registry`,
//! `Config`, `Io`) is a fatal class from the release taxonomy: it aborts the
//! remaining pipeline and is reported verbatim to the operator.

use thiserror::Error;

/// Top-level error type for release operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A required external tool is missing or unauthenticated.
    #[error("preflight failed: {0}")]
    Preflight(String),

    /// Repository context could not be established.
    #[error("invalid repository context: {0}")]
    Context(String),

    /// More than one candidate PR matched where exactly one was expected.
    #[error("ambiguous state: {0}")]
    Ambiguity(String),

    /// The PR cannot be merged without human action.
    #[error("PR #{pr} is not mergeable: {reason} ({url})")]
    NotMergeable {
        pr: u64,
        url: String,
        reason: String,
    },

    /// At least one status check failed.
    #[error("checks failed for PR #{pr} ({url}): {failed}")]
    ChecksFailed {
        pr: u64,
        url: String,
        failed: String,
    },

    /// The PR stayed BEHIND without any workflow making progress.
    #[error("PR #{pr} is stalled: {reason} ({url})")]
    Stalled {
        pr: u64,
        url: String,
        reason: String,
    },

    /// A bounded wait expired.
    #[error("timed out after {seconds}s waiting for {what}; last observed state:\n{snapshot}")]
    Timeout {
        what: String,
        seconds: u64,
        snapshot: String,
    },

    /// Post-merge registry state does not match expectation.
    #[error("registry validation failed:\n{0}")]
    ValidationMismatch(String),

    /// The operator declined a confirmation gate.
    #[error("cancelled by user: {0}")]
    UserCancelled(String),

    /// Branch synchronization hit a conflict.
    #[error("branch sync failed: {0}")]
    Sync(String),

    /// Git operation failed.
    #[error("git operation failed: {0}")]
    Git(String),

    /// GitHub CLI/API operation failed.
    #[error("GitHub operation failed: {0}")]
    GitHub(String),

    /// Registry CLI operation failed.
    #[error("registry operation failed: {0}")]
    Registry(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns a short machine-friendly name for the error class.
    pub fn class(&self) -> &'static str {
        match self {
            Error::Preflight(_) => "preflight",
            Error::Context(_) => "context",
            Error::Ambiguity(_) => "ambiguity",
            Error::NotMergeable { .. } => "not-mergeable",
            Error::ChecksFailed { .. } => "checks-failed",
            Error::Stalled { .. } => "stalled",
            Error::Timeout { .. } => "timeout",
            Error::ValidationMismatch(_) => "validation-mismatch",
            Error::UserCancelled(_) => "user-cancelled",
            Error::Sync(_) => "sync",
            Error::Git(_) => "git",
            Error::GitHub(_) => "github",
            Error::Registry(_) => "registry",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}

/// Result type alias for release operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_mergeable_message_carries_pr_identity() {
        let err = Error::NotMergeable {
            pr: 606,
            url: "https://github.com/o/r/pull/606".to_string(),
            reason: "requires review approval".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("#606"));
        assert!(msg.contains("requires review approval"));
        assert!(msg.contains("pull/606"));
        assert_eq!(err.class(), "not-mergeable");
    }

    #[test]
    fn timeout_message_includes_snapshot() {
        let err = Error::Timeout {
            what: "release PR".to_string(),
            seconds: 60,
            snapshot: "no candidates".to_string(),
        };
        assert!(err.to_string().contains("no candidates"));
        assert!(err.to_string().contains("60s"));
    }
}
