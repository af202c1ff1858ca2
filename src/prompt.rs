//! Confirmation gates before mutating steps.

use crate::error::{Error, Result};

/// Asks the operator a yes/no question.
pub trait Confirm {
    /// Returns true when the operator agrees.
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Answers yes to everything (`--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, question: &str) -> Result<bool> {
        tracing::debug!(question = %question, "auto-confirmed");
        Ok(true)
    }
}

/// Asks on the terminal; the default answer is no.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, question: &str) -> Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()
            .map_err(|e| Error::Io(std::io::Error::other(format!("failed to read confirmation: {e}"))))
    }
}

/// Fails with `UserCancelled` unless the operator agrees.
pub fn require(confirm: &dyn Confirm, question: &str) -> Result<()> {
    if confirm.confirm(question)? {
        Ok(())
    } else {
        Err(Error::UserCancelled(question.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decline;

    impl Confirm for Decline {
        fn confirm(&self, _question: &str) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn declined_gate_is_user_cancelled() {
        let err = require(&Decline, "Merge release PR #98?").unwrap_err();
        assert_eq!(err.class(), "user-cancelled");
        assert!(err.to_string().contains("#98"));
    }

    #[test]
    fn terminal_prompt_without_a_terminal_is_an_error() {
        use std::io::IsTerminal;
        if std::io::stderr().is_terminal() {
            return;
        }
        let err = StdinConfirm.confirm("Merge release PR #98?").unwrap_err();
        assert_eq!(err.class(), "io");
    }

    #[test]
    fn assume_yes_passes() {
        assert!(require(&AssumeYes, "anything").is_ok());
    }
}
