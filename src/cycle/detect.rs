//! Context, track and mode detection.
//!
//! Everything here is re-derived from git and the open PR list on every
//! invocation; nothing is remembered between runs.

use serde::Serialize;

use crate::config::{BranchesConfig, ReleaseConfig};
use crate::error::{Error, Result};
use crate::git::{parse_repo_slug, Git};
use crate::github::PullRequestRef;
use crate::pr::locator::unique_release_pr;

use super::config::{Mode, RequestedMode, RequestedTrack, Track};

/// Repository facts resolved once per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseContext {
    /// `owner/name`.
    pub repo: String,
    /// Branch checked out when the run started.
    pub head: String,
    /// Integration branch the code PR targets.
    pub base: String,
    /// Title for the code PR.
    pub title: String,
}

/// Resolves `owner/name` from an explicit override or the `origin` URL.
pub fn resolve_repo(git: &Git<'_>, explicit: Option<&str>) -> Result<String> {
    if let Some(repo) = explicit {
        return Ok(repo.to_string());
    }
    let url = git.remote_url()?;
    parse_repo_slug(&url).ok_or_else(|| {
        Error::Context(format!(
            "could not parse owner/name from remote URL '{}'; pass --repo",
            url
        ))
    })
}

/// Builds the release context from git state.
pub fn resolve_context(
    git: &Git<'_>,
    settings: &ReleaseConfig,
    repo: Option<&str>,
    title: Option<&str>,
) -> Result<ReleaseContext> {
    if !git.is_inside_work_tree()? {
        return Err(Error::Context("not inside a git repository".to_string()));
    }
    let head = git.current_branch()?;
    let repo = resolve_repo(git, repo)?;
    let title = match title {
        Some(t) if !t.trim().is_empty() => t.to_string(),
        _ => git.last_commit_subject(&head)?,
    };
    Ok(ReleaseContext {
        repo,
        head,
        base: settings.branches.beta.clone(),
        title,
    })
}

/// Picks the release line.
///
/// Stable is only reachable through an explicit promotion started from the
/// beta branch.
pub fn resolve_track(
    requested: RequestedTrack,
    promote_stable: bool,
    current_branch: &str,
    branches: &BranchesConfig,
) -> Result<Track> {
    if promote_stable {
        if current_branch != branches.beta {
            return Err(Error::Context(format!(
                "--promote-stable is only allowed when running from \"{}\" (current branch: {})",
                branches.beta, current_branch
            )));
        }
        if requested == RequestedTrack::Beta {
            return Err(Error::Config(
                "--promote-stable cannot be combined with --track beta".to_string(),
            ));
        }
        return Ok(Track::Stable);
    }
    if requested == RequestedTrack::Stable {
        return Err(Error::Config(
            "the stable track requires --promote-stable".to_string(),
        ));
    }
    Ok(Track::Beta)
}

/// Branch release PRs for `track` target.
pub fn release_base(track: Track, branches: &BranchesConfig) -> &str {
    match track {
        Track::Beta => &branches.beta,
        Track::Stable => &branches.stable,
    }
}

/// Decides between opening a code PR and publishing a release PR.
///
/// `open_prs` is only consulted when the branch alone does not decide.
pub fn detect_mode(
    requested: RequestedMode,
    current_branch: &str,
    track_branch: &str,
    release_base: &str,
    branches: &BranchesConfig,
    open_prs: impl FnOnce() -> Result<Vec<PullRequestRef>>,
) -> Result<Mode> {
    match requested {
        RequestedMode::OpenPr => return Ok(Mode::OpenPr),
        RequestedMode::Publish => return Ok(Mode::Publish),
        RequestedMode::Auto => {}
    }
    if current_branch.starts_with(&branches.release_prefix) {
        return Ok(Mode::Publish);
    }
    if current_branch != track_branch {
        return Ok(Mode::OpenPr);
    }
    let prs = open_prs()?;
    Ok(
        match unique_release_pr(&prs, &branches.release_prefix, Some(release_base))? {
            Some(_) => Mode::Publish,
            None => Mode::OpenPr,
        },
    )
}

/// Why a branch may not be deleted by cleanup, or `None` when it may.
pub fn cleanup_block_reason(branch: &str, branches: &BranchesConfig) -> Option<String> {
    if branches.protected.iter().any(|p| p == branch)
        || branch == branches.beta
        || branch == branches.stable
    {
        return Some(format!("branch '{}' is protected", branch));
    }
    if branch.starts_with(&branches.release_prefix) || branch.starts_with(&branches.promotion_prefix)
    {
        return Some(format!("branch '{}' is generated by automation", branch));
    }
    if !branches
        .allowed_prefixes
        .iter()
        .any(|prefix| branch.starts_with(prefix.as_str()))
    {
        return Some(format!(
            "branch '{}' does not match an allowed prefix ({})",
            branch,
            branches.allowed_prefixes.join(" ")
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branches() -> BranchesConfig {
        BranchesConfig::default()
    }

    fn pr(number: u64, head: &str, base: &str) -> PullRequestRef {
        PullRequestRef {
            number,
            url: format!("https://github.com/o/r/pull/{}", number),
            title: String::new(),
            head_ref: head.to_string(),
            base_ref: base.to_string(),
        }
    }

    fn no_prs() -> Result<Vec<PullRequestRef>> {
        panic!("open PRs should not be listed")
    }

    #[test]
    fn promotion_requires_beta_branch() {
        let err = resolve_track(RequestedTrack::Auto, true, "feat/not-beta", &branches()).unwrap_err();
        assert!(err
            .to_string()
            .contains("only allowed when running from \"release/beta\""));
        assert_eq!(
            resolve_track(RequestedTrack::Auto, true, "release/beta", &branches()).unwrap(),
            Track::Stable
        );
    }

    #[test]
    fn stable_without_promotion_is_rejected() {
        assert!(resolve_track(RequestedTrack::Stable, false, "release/beta", &branches()).is_err());
        assert_eq!(
            resolve_track(RequestedTrack::Auto, false, "feat/x", &branches()).unwrap(),
            Track::Beta
        );
    }

    #[test]
    fn release_branch_means_publish() {
        let mode = detect_mode(
            RequestedMode::Auto,
            "changeset-release/release/beta",
            "release/beta",
            "release/beta",
            &branches(),
            no_prs,
        )
        .unwrap();
        assert_eq!(mode, Mode::Publish);
    }

    #[test]
    fn feature_branch_means_open_pr() {
        let mode = detect_mode(
            RequestedMode::Auto,
            "feat/x",
            "release/beta",
            "release/beta",
            &branches(),
            no_prs,
        )
        .unwrap();
        assert_eq!(mode, Mode::OpenPr);
    }

    #[test]
    fn track_branch_uses_open_release_prs() {
        let with_pr = detect_mode(
            RequestedMode::Auto,
            "release/beta",
            "release/beta",
            "release/beta",
            &branches(),
            || Ok(vec![pr(98, "changeset-release/release/beta", "release/beta")]),
        )
        .unwrap();
        assert_eq!(with_pr, Mode::Publish);

        let without = detect_mode(
            RequestedMode::Auto,
            "release/beta",
            "release/beta",
            "release/beta",
            &branches(),
            || Ok(vec![]),
        )
        .unwrap();
        assert_eq!(without, Mode::OpenPr);
    }

    #[test]
    fn ambiguous_release_prs_fail_detection() {
        let err = detect_mode(
            RequestedMode::Auto,
            "release/beta",
            "release/beta",
            "release/beta",
            &branches(),
            || {
                Ok(vec![
                    pr(10, "changeset-release/release/beta", "release/beta"),
                    pr(11, "changeset-release/release/beta-2", "release/beta"),
                ])
            },
        )
        .unwrap_err();
        assert_eq!(err.class(), "ambiguity");
    }

    #[test]
    fn explicit_mode_wins() {
        let mode = detect_mode(
            RequestedMode::OpenPr,
            "changeset-release/release/beta",
            "release/beta",
            "release/beta",
            &branches(),
            no_prs,
        )
        .unwrap();
        assert_eq!(mode, Mode::OpenPr);
    }

    #[test]
    fn cleanup_rules() {
        let b = branches();
        assert_eq!(cleanup_block_reason("feat/x", &b), None);
        assert!(cleanup_block_reason("main", &b).is_some());
        assert!(cleanup_block_reason("release/beta", &b).is_some());
        assert!(cleanup_block_reason("changeset-release/release/beta", &b).is_some());
        assert!(cleanup_block_reason("promote/stable-3", &b).is_some());
        assert!(cleanup_block_reason("experiment", &b)
            .unwrap()
            .contains("allowed prefix"));
    }

    #[test]
    fn release_base_follows_track() {
        let b = branches();
        assert_eq!(release_base(Track::Beta, &b), "release/beta");
        assert_eq!(release_base(Track::Stable, &b), "main");
    }
}
