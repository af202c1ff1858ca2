//! Bringing a working branch up to date with its base.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::git::Git;

/// How a behind branch is brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Same as rebase.
    #[default]
    Auto,
    /// Rebase onto the base, then force-push with lease.
    Rebase,
    /// Merge the base in, then push.
    Merge,
    /// Never touch the branch.
    Off,
}

impl SyncStrategy {
    /// Resolves `Auto` to the concrete strategy.
    pub fn resolve(self) -> Self {
        match self {
            SyncStrategy::Auto => SyncStrategy::Rebase,
            other => other,
        }
    }
}

/// What the synchronizer did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum SyncOutcome {
    /// Nothing to do.
    UpToDate,
    /// Behind, but the strategy is `off`.
    Skipped { behind: u32 },
    /// Behind, but nothing was changed because of dry-run.
    DryRun { behind: u32, strategy: SyncStrategy },
    /// The branch was rebased and force-pushed.
    Rebased { behind: u32 },
    /// The base was merged in and the branch pushed.
    Merged { behind: u32 },
}

impl SyncOutcome {
    /// Short description for the run summary.
    pub fn describe(&self) -> String {
        match self {
            SyncOutcome::UpToDate => "already up to date".to_string(),
            SyncOutcome::Skipped { behind } => {
                format!("{} commit(s) behind; sync disabled", behind)
            }
            SyncOutcome::DryRun { behind, strategy } => {
                format!("{} commit(s) behind; would {:?}", behind, strategy).to_lowercase()
            }
            SyncOutcome::Rebased { behind } => format!("rebased over {} commit(s)", behind),
            SyncOutcome::Merged { behind } => format!("merged {} commit(s) from base", behind),
        }
    }
}

/// Synchronizes `head` with `origin/<base>` according to `strategy`.
///
/// A conflict leaves the working tree as git left it and fails with
/// instructions for finishing by hand.
pub fn sync_branch(
    git: &Git<'_>,
    head: &str,
    base: &str,
    strategy: SyncStrategy,
    dry_run: bool,
) -> Result<SyncOutcome> {
    git.fetch(base)?;
    let divergence = git.divergence(head, base)?;
    tracing::debug!(head = %head, base = %base, ahead = divergence.ahead, behind = divergence.behind, "branch divergence");

    if divergence.behind == 0 {
        tracing::info!(head = %head, base = %base, "branch already up to date");
        return Ok(SyncOutcome::UpToDate);
    }

    let behind = divergence.behind;
    let strategy = strategy.resolve();
    if strategy == SyncStrategy::Off {
        tracing::info!(head = %head, base = %base, behind, "branch is behind; sync disabled");
        return Ok(SyncOutcome::Skipped { behind });
    }
    if dry_run {
        return Ok(SyncOutcome::DryRun { behind, strategy });
    }

    // Rebase and merge rewrite the checked-out branch.
    let checked_out = git.current_branch()?;
    if checked_out != head {
        return Err(Error::Context(format!(
            "{} is {} commit(s) behind {}, but {} is checked out; check out {} or pass --sync-base off",
            head,
            behind,
            git.remote_ref(base),
            checked_out,
            head
        )));
    }

    match strategy {
        SyncStrategy::Merge => {
            let output = git.merge_from(base)?;
            if !output.success() {
                return Err(Error::Sync(format!(
                    "merging {} into {} hit conflicts: {}. Resolve the conflicts, commit the merge, push {}, then re-run",
                    git.remote_ref(base),
                    head,
                    output.diagnostic(),
                    head
                )));
            }
            git.push(head, false)?;
            tracing::info!(head = %head, base = %base, behind, "merged base into branch");
            Ok(SyncOutcome::Merged { behind })
        }
        _ => {
            let output = git.rebase_onto(base)?;
            if !output.success() {
                return Err(Error::Sync(format!(
                    "rebasing {} onto {} hit conflicts: {}. Resolve them and run `git rebase --continue`, or `git rebase --abort` to give up, then re-run",
                    head,
                    git.remote_ref(base),
                    output.diagnostic()
                )));
            }
            git.push_force_with_lease(head)?;
            tracing::info!(head = %head, base = %base, behind, "rebased branch onto base");
            Ok(SyncOutcome::Rebased { behind })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::exec::{CommandOutput, ExecContext, ManualClock, Matcher, ScriptedExecutor};

    fn setup(rev_list: &str) -> (Arc<ScriptedExecutor>, ExecContext) {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond(Matcher::new("git", ["rev-list"]), CommandOutput::ok(rev_list));
        exec.respond(
            Matcher::new("git", ["rev-parse", "--abbrev-ref", "HEAD"]),
            CommandOutput::ok("feat/x\n"),
        );
        let ctx = ExecContext::new(exec.clone(), Arc::new(ManualClock::new()), "/repo");
        (exec, ctx)
    }

    #[test]
    fn up_to_date_branch_is_left_alone() {
        let (exec, ctx) = setup("3\t0\n");
        let outcome = sync_branch(&Git::new(&ctx), "feat/x", "release/beta", SyncStrategy::Auto, false)
            .unwrap();
        assert_eq!(outcome, SyncOutcome::UpToDate);
        assert_eq!(exec.count(&Matcher::new("git", ["fetch", "origin", "release/beta"])), 1);
        assert_eq!(exec.count(&Matcher::new("git", ["rebase"])), 0);
    }

    #[test]
    fn auto_rebases_and_force_pushes() {
        let (exec, ctx) = setup("1\t4");
        let outcome = sync_branch(&Git::new(&ctx), "feat/x", "release/beta", SyncStrategy::Auto, false)
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Rebased { behind: 4 });
        assert_eq!(exec.count(&Matcher::new("git", ["rebase", "origin/release/beta"])), 1);
        assert_eq!(
            exec.count(&Matcher::new(
                "git",
                ["push", "--force-with-lease", "origin", "feat/x"]
            )),
            1
        );
    }

    #[test]
    fn off_strategy_skips_when_behind() {
        let (exec, ctx) = setup("0\t2");
        let outcome =
            sync_branch(&Git::new(&ctx), "feat/x", "release/beta", SyncStrategy::Off, false).unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped { behind: 2 });
        assert_eq!(exec.count(&Matcher::new("git", ["push"])), 0);
    }

    #[test]
    fn merge_conflict_fails_with_guidance() {
        let (exec, ctx) = setup("0\t2");
        exec.respond(
            Matcher::new("git", ["merge"]),
            CommandOutput::fail(1, "CONFLICT (content): Merge conflict in a.txt"),
        );
        let err = sync_branch(&Git::new(&ctx), "feat/x", "release/beta", SyncStrategy::Merge, false)
            .unwrap_err();
        match err {
            Error::Sync(msg) => {
                assert!(msg.contains("Merge conflict in a.txt"));
                assert!(msg.contains("commit the merge"));
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(exec.count(&Matcher::new("git", ["push"])), 0);
    }

    #[test]
    fn rebase_conflict_mentions_continue_and_abort() {
        let (exec, ctx) = setup("0\t1");
        exec.respond(Matcher::new("git", ["rebase"]), CommandOutput::fail(1, "could not apply"));
        let err = sync_branch(&Git::new(&ctx), "feat/x", "release/beta", SyncStrategy::Rebase, false)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--continue"));
        assert!(msg.contains("--abort"));
    }

    #[test]
    fn dry_run_reports_without_mutating() {
        let (exec, ctx) = setup("0\t5");
        let outcome =
            sync_branch(&Git::new(&ctx), "feat/x", "release/beta", SyncStrategy::Auto, true).unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::DryRun {
                behind: 5,
                strategy: SyncStrategy::Rebase
            }
        );
        assert_eq!(exec.count(&Matcher::new("git", ["rebase"])), 0);
        assert!(outcome.describe().contains("would rebase"));
    }

    #[test]
    fn refuses_to_rewrite_a_branch_that_is_not_checked_out() {
        let (exec, ctx) = setup("0\t3");
        let err = sync_branch(&Git::new(&ctx), "feat/target", "release/beta", SyncStrategy::Rebase, false)
            .unwrap_err();
        assert_eq!(err.class(), "context");
        assert!(err.to_string().contains("feat/x is checked out"));
        assert!(exec.calls_matching(&Matcher::new("git", ["rev-list"]))[0]
            .has_arg("feat/target...origin/release/beta"));
        assert_eq!(exec.count(&Matcher::new("git", ["rebase"])), 0);
        assert_eq!(exec.count(&Matcher::new("git", ["push"])), 0);
    }
}
