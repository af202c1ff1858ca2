//! Merge-readiness evaluation.
//!
//! Each poll reads the PR's readiness fields and check rollup fresh, then runs
//! them through [`classify`]. A `BEHIND` PR additionally consults the most
//! recent workflow run on its head branch through [`judge_behind`], which
//! tracks how long the PR has been behind without CI making progress.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::exec::Clock;
use crate::github::{
    CheckState, GitHub, MergeReadiness, MergeStateStatus, PrState, ReviewDecision, WorkflowRun,
};
use crate::poll::{poll_until, Poll, PollConfig};

/// Default time a PR may sit `BEHIND` with no workflow running.
pub const DEFAULT_BEHIND_STALL: Duration = Duration::from_secs(10);

/// Knobs that differ between code PRs and release PRs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessOptions {
    /// Release PRs go `BEHIND` while the changeset bot rewrites them.
    pub allow_transient_behind: bool,
    /// How long `BEHIND` may persist with no workflow run in progress.
    pub behind_stall: Duration,
}

impl ReadinessOptions {
    /// Options for ordinary code PRs.
    pub fn code_pr() -> Self {
        Self {
            allow_transient_behind: false,
            behind_stall: DEFAULT_BEHIND_STALL,
        }
    }

    /// Options for bot-generated release PRs.
    pub fn release_pr(behind_stall: Duration) -> Self {
        Self {
            allow_transient_behind: true,
            behind_stall,
        }
    }
}

/// Outcome of classifying one readiness/check snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    /// The PR can be merged (or already was).
    Ready,
    /// `BEHIND` and tolerated; the head branch's CI decides what happens next.
    Behind,
    /// Not decided yet; carries a description of what is outstanding.
    Waiting(String),
}

/// Applies the readiness decision table to one snapshot.
///
/// Fatal conditions come back as `Err`. The checks are only consulted when
/// the PR is not already merged, so `checks` may be `None` in that case.
pub fn classify(
    readiness: &MergeReadiness,
    checks: Option<&CheckState>,
    allow_transient_behind: bool,
) -> Result<Assessment> {
    if readiness.state == PrState::Merged {
        return Ok(Assessment::Ready);
    }

    let not_mergeable = |reason: &str| Error::NotMergeable {
        pr: readiness.number,
        url: readiness.url.clone(),
        reason: reason.to_string(),
    };

    if readiness.state == PrState::Closed {
        return Err(not_mergeable("PR was closed without merging"));
    }
    if readiness.is_draft {
        return Err(not_mergeable("PR is still a draft"));
    }

    match readiness.review_decision {
        ReviewDecision::ReviewRequired => return Err(not_mergeable("requires review approval")),
        ReviewDecision::ChangesRequested => {
            return Err(not_mergeable("requires review approval (changes requested)"))
        }
        ReviewDecision::Approved | ReviewDecision::Unknown => {}
    }

    let empty = CheckState::default();
    let checks = checks.unwrap_or(&empty);
    if checks.failed > 0 {
        return Err(Error::ChecksFailed {
            pr: readiness.number,
            url: readiness.url.clone(),
            failed: checks.failing.join(", "),
        });
    }

    match readiness.merge_state_status {
        MergeStateStatus::Dirty => Err(not_mergeable("has merge conflicts with its base (DIRTY)")),
        MergeStateStatus::Behind if !allow_transient_behind => Err(not_mergeable(
            "head branch is behind its base (BEHIND); update the branch and retry",
        )),
        MergeStateStatus::Behind => Ok(Assessment::Behind),
        MergeStateStatus::Clean | MergeStateStatus::HasHooks | MergeStateStatus::Unstable
            if checks.pending == 0 =>
        {
            Ok(Assessment::Ready)
        }
        // The platform reported nothing at all; with no checks pending the
        // PR is treated as mergeable. UNKNOWN and BLOCKED keep polling.
        MergeStateStatus::Empty if checks.pending == 0 => Ok(Assessment::Ready),
        _ => Ok(Assessment::Waiting(describe(readiness, checks))),
    }
}

/// Decides what a tolerated `BEHIND` means given the head branch's latest run.
///
/// `behind_since` is set to `now` on the first `BEHIND` observation and kept
/// across polls.
pub fn judge_behind(
    readiness: &MergeReadiness,
    latest_run: Option<&WorkflowRun>,
    behind_since: &mut Option<Instant>,
    now: Instant,
    stall: Duration,
) -> Result<Poll<()>> {
    if let Some(run) = latest_run {
        if run.failed() {
            return Err(Error::ChecksFailed {
                pr: readiness.number,
                url: readiness.url.clone(),
                failed: format!(
                    "latest workflow run '{}' on {} concluded {}",
                    run.workflow_name, readiness.head_ref_name, run.conclusion
                ),
            });
        }
    }

    let first_seen = *behind_since.get_or_insert(now);
    let running = latest_run.map(WorkflowRun::is_active).unwrap_or(false);
    let waited = now.saturating_duration_since(first_seen);

    if !running && waited >= stall {
        return Err(Error::Stalled {
            pr: readiness.number,
            url: readiness.url.clone(),
            reason: format!(
                "BEHIND for {}s with no workflow run in progress on {}",
                waited.as_secs(),
                readiness.head_ref_name
            ),
        });
    }

    Ok(Poll::Pending(format!(
        "BEHIND for {}s; latest run: {}",
        waited.as_secs(),
        latest_run
            .map(|r| format!("{} ({} {})", r.workflow_name, r.status, r.conclusion))
            .unwrap_or_else(|| "none".to_string())
    )))
}

fn describe(readiness: &MergeReadiness, checks: &CheckState) -> String {
    format!(
        "PR #{} state={:?} mergeStateStatus={:?} reviewDecision={:?} draft={} {}",
        readiness.number,
        readiness.state,
        readiness.merge_state_status,
        readiness.review_decision,
        readiness.is_draft,
        checks.describe()
    )
}

/// Polls PR `number` until it is mergeable, merged, fatally blocked, or
/// the deadline passes.
pub fn wait_for_merge_readiness(
    github: &GitHub<'_>,
    clock: &dyn Clock,
    number: u64,
    options: ReadinessOptions,
    config: &PollConfig,
) -> Result<MergeReadiness> {
    let mut behind_since: Option<Instant> = None;
    let what = format!("merge readiness of PR #{}", number);

    poll_until(clock, &what, config, || {
        let readiness = github.readiness(number)?;
        if readiness.state == PrState::Merged {
            return Ok(Poll::Ready(readiness));
        }
        let checks = github.checks(number)?;

        match classify(&readiness, Some(&checks), options.allow_transient_behind)? {
            Assessment::Ready => Ok(Poll::Ready(readiness)),
            Assessment::Waiting(snapshot) => {
                behind_since = None;
                Ok(Poll::Pending(snapshot))
            }
            Assessment::Behind => {
                let run = github.latest_run(&readiness.head_ref_name)?;
                match judge_behind(
                    &readiness,
                    run.as_ref(),
                    &mut behind_since,
                    clock.now(),
                    options.behind_stall,
                )? {
                    Poll::Ready(()) => Ok(Poll::Ready(readiness)),
                    Poll::Pending(detail) => Ok(Poll::Pending(format!(
                        "{}; {}",
                        describe(&readiness, &checks),
                        detail
                    ))),
                }
            }
        }
    })
}

/// Polls PR `number`, which has auto-merge enabled, until the platform
/// reports it merged. Blocking conditions still fail fast.
pub fn wait_for_merged(
    github: &GitHub<'_>,
    clock: &dyn Clock,
    number: u64,
    config: &PollConfig,
) -> Result<MergeReadiness> {
    let what = format!("auto-merge of PR #{}", number);
    poll_until(clock, &what, config, || {
        let readiness = github.readiness(number)?;
        if readiness.state == PrState::Merged {
            return Ok(Poll::Ready(readiness));
        }
        let checks = github.checks(number)?;
        Ok(match classify(&readiness, Some(&checks), false)? {
            Assessment::Waiting(snapshot) => Poll::Pending(snapshot),
            Assessment::Ready | Assessment::Behind => Poll::Pending(format!(
                "{}; waiting for auto-merge",
                describe(&readiness, &checks)
            )),
        })
    })
}
