//! ReleaseCycle: top-level driver of one release run.
//!
//! The run moves strictly forward:
//! context → track → mode → (promotion) → code PR → release PR → registry → cleanup.
//! Any fatal error ends the run immediately; nothing destructive is retried.

use std::time::Duration;

use crate::checks::watch_checks;
use crate::config::{ReleaseConfig, Validate};
use crate::error::{Error, Result};
use crate::exec::ExecContext;
use crate::git::Git;
use crate::github::{self, GitHub, PrState, PullRequestRef};
use crate::poll::PollConfig;
use crate::pr::locator::{unique_release_pr, wait_for_promotion_pr, wait_for_release_pr};
use crate::pr::{merge_unless_merged, MergeResult, PrManager, UpsertAction, UpsertRequest};
use crate::prompt::{require, AssumeYes, Confirm};
use crate::readiness::{wait_for_merge_readiness, wait_for_merged, ReadinessOptions};
use crate::registry::{resolve_targets, validate_registry, Expectation, Npm};
use crate::sync::{sync_branch, SyncOutcome};

use super::config::{poll_config, Mode, Phase, ReleaseCycleConfig, Track};
use super::detect::{
    cleanup_block_reason, detect_mode, release_base, resolve_context, resolve_track, ReleaseContext,
};
use super::summary::{steps, RunSummary};

/// How the code-PR stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CodeStage {
    /// The PR is merged; the release PR comes next.
    Merged,
    /// `HEAD` was already part of the base branch.
    Resumed,
    /// The run ends here for the given reason.
    Stopped(String),
}

/// Poll settings derived once per run.
struct Waits {
    checks: PollConfig,
    release_pr: PollConfig,
    registry: PollConfig,
    behind_stall: Duration,
}

/// Drives a release run against injected collaborators.
pub struct ReleaseCycle<'a> {
    ctx: &'a ExecContext,
    settings: &'a ReleaseConfig,
    confirm: &'a dyn Confirm,
}

impl<'a> ReleaseCycle<'a> {
    /// Creates a driver that confirms every gate automatically.
    pub fn new(ctx: &'a ExecContext, settings: &'a ReleaseConfig) -> Self {
        Self {
            ctx,
            settings,
            confirm: &AssumeYes,
        }
    }

    /// Sets the confirmation gate.
    pub fn with_confirm(mut self, confirm: &'a dyn Confirm) -> Self {
        self.confirm = confirm;
        self
    }

    fn gate(&self, config: &ReleaseCycleConfig, question: &str) -> Result<()> {
        if config.yes {
            return Ok(());
        }
        require(self.confirm, question)
    }

    /// Runs the cycle and returns what it did.
    pub fn run(&self, config: &ReleaseCycleConfig) -> Result<RunSummary> {
        self.settings.validate().into_result()?;
        config.validate().into_result()?;

        let mut summary = RunSummary::new(config.phase);
        let git = Git::new(self.ctx);

        github::preflight(self.ctx)?;

        let context = resolve_context(
            &git,
            self.settings,
            config.repo.as_deref(),
            config.title.as_deref(),
        )?;
        let gh = GitHub::new(self.ctx, context.repo.clone());
        let branches = &self.settings.branches;

        let track = resolve_track(config.track, config.promote_stable, &context.head, branches)?;
        summary.track = Some(track);
        let release_base = release_base(track, branches).to_string();

        let mode = match track {
            Track::Stable => Mode::Publish,
            Track::Beta => detect_mode(
                config.mode,
                &context.head,
                &branches.beta,
                &release_base,
                branches,
                || gh.list_open_prs(),
            )?,
        };
        summary.mode = Some(mode);
        tracing::info!(
            repo = %context.repo,
            head = %context.head,
            mode = ?mode,
            track = ?track,
            phase = ?config.phase,
            dry_run = config.dry_run,
            "starting release cycle"
        );

        let reaches_registry =
            (mode == Mode::Publish || config.phase == Phase::Full) && config.merge && !config.dry_run;
        if reaches_registry {
            Npm::new(self.ctx).preflight()?;
        }

        let waits = Waits {
            checks: poll_config(config.check_timeout_minutes, self.settings),
            release_pr: poll_config(config.release_pr_timeout_minutes, self.settings),
            registry: poll_config(config.registry_timeout_minutes, self.settings),
            behind_stall: Duration::from_secs(self.settings.timeouts.behind_stall_secs),
        };

        if track == Track::Stable {
            self.promote(&git, &gh, config, &waits, &mut summary)?;
        }

        if mode == Mode::OpenPr {
            match self.code_pr(&git, &gh, &context, config, &waits, &mut summary)? {
                CodeStage::Merged | CodeStage::Resumed if config.phase == Phase::Code => {
                    for step in [steps::RELEASE_PR, steps::REGISTRY, steps::CLEANUP] {
                        summary.skipped(step, "phase=code");
                    }
                    return Ok(summary);
                }
                CodeStage::Merged | CodeStage::Resumed => {}
                CodeStage::Stopped(reason) => {
                    for step in [steps::RELEASE_PR, steps::REGISTRY, steps::CLEANUP] {
                        summary.skipped(step, reason.clone());
                    }
                    return Ok(summary);
                }
            }
        }

        self.publish(&git, &gh, &context, config, track, &release_base, &waits, &mut summary)?;
        Ok(summary)
    }

    fn promote(
        &self,
        git: &Git<'_>,
        gh: &GitHub<'_>,
        config: &ReleaseCycleConfig,
        waits: &Waits,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let branches = &self.settings.branches;
        let workflow = &self.settings.github.promote_workflow;
        if config.dry_run {
            for step in [
                steps::PROMOTION_DISPATCH,
                steps::PROMOTION_PR,
                steps::PROMOTION_MERGE,
                steps::PROMOTION_RESYNC,
            ] {
                summary.skipped(step, "dry-run");
            }
            return Ok(());
        }

        self.gate(
            config,
            &format!(
                "Dispatch {} to promote {} to {}?",
                workflow, branches.beta, branches.stable
            ),
        )?;
        gh.dispatch_workflow(workflow, &branches.beta)?;
        summary.performed(steps::PROMOTION_DISPATCH, workflow.clone());

        let clock = self.ctx.clock();
        let pr = wait_for_promotion_pr(gh, clock, &branches.promotion_prefix, &waits.release_pr)?;
        summary.performed(steps::PROMOTION_PR, format!("#{} {}", pr.number, pr.url));

        watch_checks(gh, clock, pr.number, &pr.url, &waits.checks)?;
        let readiness = wait_for_merge_readiness(
            gh,
            clock,
            pr.number,
            ReadinessOptions::release_pr(waits.behind_stall),
            &waits.checks,
        )?;
        let merged = readiness.state == PrState::Merged
            || merge_unless_merged(gh, pr.number, config.merge_method)? == MergeResult::AlreadyMerged;
        if merged {
            summary.performed(steps::PROMOTION_MERGE, format!("#{} already merged", pr.number));
        } else {
            summary.performed(steps::PROMOTION_MERGE, format!("#{}", pr.number));
        }

        git.checkout(&branches.beta)?;
        git.pull(&branches.beta)?;
        summary.performed(steps::PROMOTION_RESYNC, branches.beta.clone());
        Ok(())
    }

    fn code_pr(
        &self,
        git: &Git<'_>,
        gh: &GitHub<'_>,
        context: &ReleaseContext,
        config: &ReleaseCycleConfig,
        waits: &Waits,
        summary: &mut RunSummary,
    ) -> Result<CodeStage> {
        let head = context.head.as_str();
        let base = context.base.as_str();

        if config.resume {
            git.fetch(base)?;
            if git.head_is_ancestor_of(base)? {
                let reason = format!("resume: {} is already contained in {}", head, base);
                for step in [steps::SYNC, steps::PUSH, steps::CODE_PR, steps::CODE_PR_MERGE] {
                    summary.skipped(step, reason.clone());
                }
                return Ok(CodeStage::Resumed);
            }
        }
        if head == base {
            return Err(Error::Context(format!(
                "cannot open a PR from {} into itself; run from a feature branch",
                base
            )));
        }

        // The sync may rewrite and force-push the branch, so ask first.
        if !config.dry_run {
            self.gate(
                config,
                &format!("Sync and push {} and open or update its PR into {}?", head, base),
            )?;
        }

        match sync_branch(git, head, base, config.sync, config.dry_run)? {
            outcome @ (SyncOutcome::Rebased { .. } | SyncOutcome::Merged { .. }) => {
                summary.performed(steps::SYNC, outcome.describe())
            }
            outcome @ SyncOutcome::DryRun { .. } => {
                summary.skipped(steps::SYNC, format!("dry-run: {}", outcome.describe()))
            }
            outcome => summary.skipped(steps::SYNC, outcome.describe()),
        }

        let manager = PrManager::new(git, gh, self.ctx.cwd());
        let request = UpsertRequest {
            head: head.to_string(),
            base: base.to_string(),
            title: Some(context.title.clone()),
            body: config.body.clone(),
            draft: false,
            refresh_description: config.update_description,
            dry_run: config.dry_run,
        };
        let outcome = manager.upsert(&request)?;

        if config.dry_run {
            summary.skipped(steps::PUSH, "dry-run");
            summary.skipped(
                steps::CODE_PR,
                match &outcome.pr {
                    Some(pr) => format!("dry-run: PR #{} exists", pr.number),
                    None => "dry-run: would create PR".to_string(),
                },
            );
            summary.code_pr = outcome.pr;
            summary.skipped(steps::CODE_PR_MERGE, "dry-run");
            return Ok(CodeStage::Stopped("dry-run".to_string()));
        }

        summary.performed(steps::PUSH, head);
        let pr = outcome.pr.ok_or_else(|| {
            Error::GitHub(format!("no PR available for {} -> {}", head, base))
        })?;
        summary.performed(
            steps::CODE_PR,
            format!("{} #{} {}", action_label(outcome.action), pr.number, pr.url),
        );
        summary.code_pr = Some(pr.clone());

        self.drive_code_pr(&manager, gh, &pr, config, waits, summary)
    }

    fn drive_code_pr(
        &self,
        manager: &PrManager<'_>,
        gh: &GitHub<'_>,
        pr: &PullRequestRef,
        config: &ReleaseCycleConfig,
        waits: &Waits,
        summary: &mut RunSummary,
    ) -> Result<CodeStage> {
        let clock = self.ctx.clock();

        if !config.merge {
            let checks = watch_checks(gh, clock, pr.number, &pr.url, &waits.checks)?;
            summary.performed(steps::CHECKS, checks.describe());
            summary.skipped(steps::CODE_PR_MERGE, "--no-merge");
            return Ok(CodeStage::Stopped("code PR not merged (--no-merge)".to_string()));
        }

        if config.auto_merge {
            manager.enable_auto_merge(pr, config.merge_method)?;
            summary.performed(steps::AUTO_MERGE, format!("#{}", pr.number));
            let checks = watch_checks(gh, clock, pr.number, &pr.url, &waits.checks)?;
            summary.performed(steps::CHECKS, checks.describe());
            wait_for_merged(gh, clock, pr.number, &waits.checks)?;
            summary.performed(steps::CODE_PR_MERGE, format!("#{} merged by auto-merge", pr.number));
            return Ok(CodeStage::Merged);
        }

        let checks = watch_checks(gh, clock, pr.number, &pr.url, &waits.checks)?;
        summary.performed(steps::CHECKS, checks.describe());
        let readiness = wait_for_merge_readiness(
            gh,
            clock,
            pr.number,
            ReadinessOptions::code_pr(),
            &waits.checks,
        )?;
        let merged = readiness.state == PrState::Merged
            || manager.merge(pr, config.merge_method)? == MergeResult::AlreadyMerged;
        if merged {
            summary.performed(steps::CODE_PR_MERGE, format!("#{} already merged", pr.number));
        } else {
            summary.performed(steps::CODE_PR_MERGE, format!("#{}", pr.number));
        }
        Ok(CodeStage::Merged)
    }

    #[allow(clippy::too_many_arguments)]
    fn publish(
        &self,
        git: &Git<'_>,
        gh: &GitHub<'_>,
        context: &ReleaseContext,
        config: &ReleaseCycleConfig,
        track: Track,
        release_base: &str,
        waits: &Waits,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let clock = self.ctx.clock();
        let branches = &self.settings.branches;

        if config.dry_run {
            // One look only: the PR may depend on mutations that were skipped.
            let prs = gh.list_open_prs()?;
            match unique_release_pr(&prs, &branches.release_prefix, Some(release_base))? {
                Some(pr) => {
                    summary.performed(steps::RELEASE_PR, format!("#{} {}", pr.number, pr.url));
                    summary.release_pr = Some(pr);
                }
                None => summary.skipped(steps::RELEASE_PR, "dry-run: no release PR open yet"),
            }
            for step in [steps::RELEASE_MERGE, steps::REGISTRY, steps::CLEANUP] {
                summary.skipped(step, "dry-run");
            }
            return Ok(());
        }

        let release = wait_for_release_pr(
            gh,
            clock,
            &branches.release_prefix,
            release_base,
            &waits.release_pr,
        )?;
        summary.performed(steps::RELEASE_PR, format!("#{} {}", release.number, release.url));
        summary.release_pr = Some(release.clone());

        if !config.merge {
            let checks = watch_checks(gh, clock, release.number, &release.url, &waits.checks)?;
            summary.performed(steps::RELEASE_CHECKS, checks.describe());
            summary.skipped(steps::RELEASE_MERGE, "--no-merge");
            summary.skipped(steps::REGISTRY, "release PR not merged (--no-merge)");
            summary.skipped(steps::CLEANUP, "release PR not merged (--no-merge)");
            return Ok(());
        }

        self.gate(
            config,
            &format!(
                "Merge release PR #{} into {} and publish?",
                release.number, release_base
            ),
        )?;

        if config.auto_merge {
            gh.enable_auto_merge(release.number, config.merge_method)?;
            summary.performed(steps::RELEASE_AUTO_MERGE, format!("#{}", release.number));
        }
        let checks = watch_checks(gh, clock, release.number, &release.url, &waits.checks)?;
        summary.performed(steps::RELEASE_CHECKS, checks.describe());

        let readiness = wait_for_merge_readiness(
            gh,
            clock,
            release.number,
            ReadinessOptions::release_pr(waits.behind_stall),
            &waits.checks,
        )?;
        let merged = readiness.state == PrState::Merged
            || merge_unless_merged(gh, release.number, config.merge_method)?
                == MergeResult::AlreadyMerged;
        if merged {
            summary.performed(steps::RELEASE_MERGE, format!("#{} already merged", release.number));
        } else {
            summary.performed(steps::RELEASE_MERGE, format!("#{}", release.number));
        }

        let npm = Npm::new(self.ctx);
        let targets = resolve_targets(
            gh,
            release.number,
            release_base,
            &self.settings.registry.packages,
        )?;
        let expectation = Expectation {
            tag: match track {
                Track::Beta => self.settings.registry.tag_beta.clone(),
                Track::Stable => self.settings.registry.tag_stable.clone(),
            },
            require_version: track == Track::Stable,
        };
        let observations = validate_registry(&npm, clock, &targets, &expectation, &waits.registry)?;
        summary.performed(
            steps::REGISTRY,
            targets
                .iter()
                .map(|t| format!("{}@{} ({})", t.name, t.version, expectation.tag))
                .collect::<Vec<_>>()
                .join(", "),
        );
        summary.registry = observations;

        self.cleanup(git, context, config, summary);
        Ok(())
    }

    /// Deletes the finished working branch. Never fails the run.
    fn cleanup(
        &self,
        git: &Git<'_>,
        context: &ReleaseContext,
        config: &ReleaseCycleConfig,
        summary: &mut RunSummary,
    ) {
        let branch = context.head.as_str();
        let base = context.base.as_str();

        if !config.cleanup {
            summary.skipped(steps::CLEANUP, "--no-cleanup");
            return;
        }
        if let Some(reason) = cleanup_block_reason(branch, &self.settings.branches) {
            summary.skipped(steps::CLEANUP, reason);
            return;
        }
        match git.status_porcelain() {
            Ok(status) if status.is_empty() => {}
            Ok(_) => {
                summary.warn(format!(
                    "working tree has uncommitted changes; left {} checked out",
                    branch
                ));
                summary.skipped(steps::CLEANUP, "working tree is dirty");
                return;
            }
            Err(e) => {
                summary.warn(format!("could not read working tree status: {}", e));
                summary.skipped(steps::CLEANUP, "working tree status unknown");
                return;
            }
        }

        if let Err(e) = git.checkout(base) {
            summary.warn(format!("cleanup could not check out {}: {}", base, e));
            summary.skipped(steps::CLEANUP, format!("checkout of {} failed", base));
            return;
        }
        if let Err(e) = git.pull(base) {
            summary.warn(format!("cleanup could not update {}: {}", base, e));
        }
        match git.delete_branch(branch) {
            Ok(()) => summary.performed(steps::CLEANUP, format!("deleted {}", branch)),
            Err(e) => {
                summary.warn(format!("cleanup could not delete {}: {}", branch, e));
                summary.skipped(steps::CLEANUP, format!("branch {} kept", branch));
            }
        }
    }
}

pub(crate) fn action_label(action: UpsertAction) -> &'static str {
    match action {
        UpsertAction::Reused => "reused",
        UpsertAction::Updated => "updated",
        UpsertAction::Created => "created",
        UpsertAction::SkippedDryRun => "dry-run",
    }
}
