//! The standalone `open-pr` command.

use crate::checks::watch_checks;
use crate::config::{ReleaseConfig, Validate};
use crate::error::{Error, Result};
use crate::exec::ExecContext;
use crate::git::Git;
use crate::github::{self, GitHub};
use crate::pr::{PrManager, UpsertRequest};
use crate::prompt::{require, Confirm};
use crate::sync::{sync_branch, SyncOutcome};

use super::config::{poll_config, OpenPrConfig, Phase};
use super::detect::resolve_repo;
use super::runner::action_label;
use super::summary::{steps, RunSummary};

/// Pushes a branch and opens or updates its PR, optionally enabling
/// auto-merge and watching checks.
pub fn open_pr(
    ctx: &ExecContext,
    settings: &ReleaseConfig,
    confirm: &dyn Confirm,
    config: &OpenPrConfig,
) -> Result<RunSummary> {
    settings.validate().into_result()?;
    config.validate().into_result()?;

    let mut summary = RunSummary::new(Phase::Code);
    let git = Git::new(ctx);

    github::preflight(ctx)?;
    if !git.is_inside_work_tree()? {
        return Err(Error::Context("not inside a git repository".to_string()));
    }

    let head = match &config.head {
        Some(head) => head.clone(),
        None => git.current_branch()?,
    };
    let base = config
        .base
        .clone()
        .unwrap_or_else(|| settings.branches.beta.clone());
    if head == base {
        return Err(Error::Context(format!(
            "head and base are both '{}'; check out a feature branch or pass --head",
            head
        )));
    }

    let repo = resolve_repo(&git, config.repo.as_deref())?;
    let gh = GitHub::new(ctx, repo);
    tracing::info!(repo = %gh.repo(), head = %head, base = %base, dry_run = config.dry_run, "opening pull request");

    if !config.dry_run && !config.yes {
        require(
            confirm,
            &format!("Sync and push {} and open or update its PR into {}?", head, base),
        )?;
    }

    match sync_branch(&git, &head, &base, config.sync, config.dry_run)? {
        outcome @ (SyncOutcome::Rebased { .. } | SyncOutcome::Merged { .. }) => {
            summary.performed(steps::SYNC, outcome.describe())
        }
        outcome @ SyncOutcome::DryRun { .. } => {
            summary.skipped(steps::SYNC, format!("dry-run: {}", outcome.describe()))
        }
        outcome => summary.skipped(steps::SYNC, outcome.describe()),
    }

    let manager = PrManager::new(&git, &gh, ctx.cwd());
    let request = UpsertRequest {
        head: head.clone(),
        base: base.clone(),
        title: config.title.clone(),
        body: config.body.clone(),
        draft: config.draft,
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
        if config.auto_merge {
            summary.skipped(steps::AUTO_MERGE, "dry-run");
        }
        if config.watch_checks {
            summary.skipped(steps::CHECKS, "dry-run");
        }
        return Ok(summary);
    }

    summary.performed(steps::PUSH, head.as_str());
    let pr = outcome
        .pr
        .ok_or_else(|| Error::GitHub(format!("no PR available for {} -> {}", head, base)))?;
    summary.performed(
        steps::CODE_PR,
        format!("{} #{} {}", action_label(outcome.action), pr.number, pr.url),
    );
    summary.code_pr = Some(pr.clone());

    if config.auto_merge {
        manager.enable_auto_merge(&pr, config.merge_method)?;
        summary.performed(steps::AUTO_MERGE, format!("#{}", pr.number));
    }
    if config.watch_checks {
        let poll = poll_config(config.check_timeout_minutes, settings);
        let checks = watch_checks(&gh, ctx.clock(), pr.number, &pr.url, &poll)?;
        summary.performed(steps::CHECKS, checks.describe());
    }
    Ok(summary)
}
