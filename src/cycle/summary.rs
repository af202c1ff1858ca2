//! Structured record of what a run did.

use std::fmt;

use serde::Serialize;

use crate::github::PullRequestRef;
use crate::registry::NpmObservation;

use super::config::{Mode, Phase, Track};

/// Step names used in [`ActionRecord::step`].
pub mod steps {
    pub const SYNC: &str = "sync";
    pub const PUSH: &str = "push";
    pub const CODE_PR: &str = "code-pr";
    pub const AUTO_MERGE: &str = "auto-merge";
    pub const CHECKS: &str = "checks";
    pub const CODE_PR_MERGE: &str = "code-pr-merge";
    pub const PROMOTION_DISPATCH: &str = "promotion-dispatch";
    pub const PROMOTION_PR: &str = "promotion-pr";
    pub const PROMOTION_MERGE: &str = "promotion-merge";
    pub const PROMOTION_RESYNC: &str = "promotion-resync";
    pub const RELEASE_PR: &str = "release-pr";
    pub const RELEASE_AUTO_MERGE: &str = "release-auto-merge";
    pub const RELEASE_CHECKS: &str = "release-checks";
    pub const RELEASE_MERGE: &str = "release-merge";
    pub const REGISTRY: &str = "registry";
    pub const CLEANUP: &str = "cleanup";
}

/// Whether a step ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "kebab-case")]
pub enum StepOutcome {
    Performed,
    Skipped(String),
}

/// One line of the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub step: String,
    pub outcome: StepOutcome,
    pub detail: String,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub mode: Option<Mode>,
    pub phase: Phase,
    pub track: Option<Track>,
    pub actions: Vec<ActionRecord>,
    pub warnings: Vec<String>,
    pub code_pr: Option<PullRequestRef>,
    pub release_pr: Option<PullRequestRef>,
    pub registry: Vec<NpmObservation>,
}

impl RunSummary {
    pub fn new(phase: Phase) -> Self {
        Self {
            mode: None,
            phase,
            track: None,
            actions: Vec::new(),
            warnings: Vec::new(),
            code_pr: None,
            release_pr: None,
            registry: Vec::new(),
        }
    }

    /// Records a step that ran.
    pub fn performed(&mut self, step: &str, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::info!(step = %step, detail = %detail, "step performed");
        self.actions.push(ActionRecord {
            step: step.to_string(),
            outcome: StepOutcome::Performed,
            detail,
        });
    }

    /// Records a step that was deliberately not run.
    pub fn skipped(&mut self, step: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::info!(step = %step, reason = %reason, "step skipped");
        self.actions.push(ActionRecord {
            step: step.to_string(),
            outcome: StepOutcome::Skipped(reason),
            detail: String::new(),
        });
    }

    /// Records a non-fatal problem.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(warning = %message, "run warning");
        self.warnings.push(message);
    }

    /// The record for `step`, if it was reached.
    pub fn action(&self, step: &str) -> Option<&ActionRecord> {
        self.actions.iter().find(|a| a.step == step)
    }

    /// Serializes the summary as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Release cycle summary")?;
        writeln!(
            f,
            "  mode: {}  phase: {:?}  track: {}",
            self.mode.map(|m| format!("{:?}", m)).unwrap_or_else(|| "-".to_string()),
            self.phase,
            self.track.map(|t| format!("{:?}", t)).unwrap_or_else(|| "-".to_string())
        )?;
        if let Some(pr) = &self.code_pr {
            writeln!(f, "  code PR: #{} {}", pr.number, pr.url)?;
        }
        if let Some(pr) = &self.release_pr {
            writeln!(f, "  release PR: #{} {}", pr.number, pr.url)?;
        }
        writeln!(f, "  steps:")?;
        for action in &self.actions {
            match &action.outcome {
                StepOutcome::Performed if action.detail.is_empty() => {
                    writeln!(f, "    - {}: done", action.step)?
                }
                StepOutcome::Performed => writeln!(f, "    - {}: {}", action.step, action.detail)?,
                StepOutcome::Skipped(reason) => {
                    writeln!(f, "    - {}: skipped ({})", action.step, reason)?
                }
            }
        }
        for o in &self.registry {
            writeln!(f, "  registry: {}", o.describe())?;
        }
        for w in &self.warnings {
            writeln!(f, "  warning: {}", w)?;
        }
        Ok(())
    }
}
