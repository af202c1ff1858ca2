//! Version-control operations through the `git` CLI.

use crate::error::{Error, Result};
use crate::exec::{CommandOutput, ExecContext};

/// Remote every branch is pushed to and compared against.
pub const DEFAULT_REMOTE: &str = "origin";

/// Commit counts between `HEAD` and a remote base branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Divergence {
    /// Commits on `HEAD` that the base does not have.
    pub ahead: u32,
    /// Commits on the base that `HEAD` does not have.
    pub behind: u32,
}

/// Thin wrapper over `git` invocations in one working tree.
pub struct Git<'a> {
    ctx: &'a ExecContext,
    remote: String,
}

impl<'a> Git<'a> {
    /// Creates a wrapper using the `origin` remote.
    pub fn new(ctx: &'a ExecContext) -> Self {
        Self {
            ctx,
            remote: DEFAULT_REMOTE.to_string(),
        }
    }

    /// `origin/<branch>`.
    pub fn remote_ref(&self, branch: &str) -> String {
        format!("{}/{}", self.remote, branch)
    }

    fn checked(&self, args: &[&str], action: &str) -> Result<CommandOutput> {
        let output = self.ctx.run("git", args)?;
        if !output.success() {
            return Err(Error::Git(format!("failed to {}: {}", action, output.diagnostic())));
        }
        Ok(output)
    }

    /// Whether the working directory is inside a git work tree.
    pub fn is_inside_work_tree(&self) -> Result<bool> {
        let output = self.ctx.run("git", ["rev-parse", "--is-inside-work-tree"])?;
        Ok(output.success() && output.stdout_trimmed() == "true")
    }

    /// Current branch name; detached HEAD is a context error.
    pub fn current_branch(&self) -> Result<String> {
        let output = self.ctx.run("git", ["rev-parse", "--abbrev-ref", "HEAD"])?;
        if !output.success() {
            return Err(Error::Context(format!(
                "could not determine current branch: {}",
                output.diagnostic()
            )));
        }
        let branch = output.stdout_trimmed().to_string();
        if branch.is_empty() || branch == "HEAD" {
            return Err(Error::Context(
                "detached HEAD; check out a branch before running a release".to_string(),
            ));
        }
        Ok(branch)
    }

    /// Upstream tracking ref of `branch`, if any.
    pub fn upstream(&self, branch: &str) -> Result<Option<String>> {
        let spec = format!("{}@{{u}}", branch);
        let output = self.ctx.run(
            "git",
            ["rev-parse", "--abbrev-ref", "--symbolic-full-name", spec.as_str()],
        )?;
        if !output.success() || output.stdout_trimmed().is_empty() {
            return Ok(None);
        }
        Ok(Some(output.stdout_trimmed().to_string()))
    }

    /// Fetches `branch` from the remote.
    pub fn fetch(&self, branch: &str) -> Result<()> {
        let remote = self.remote.clone();
        self.checked(&["fetch", remote.as_str(), branch], &format!("fetch {}/{}", remote, branch))?;
        Ok(())
    }

    /// Ahead/behind counts of `head` relative to `origin/<base>`.
    pub fn divergence(&self, head: &str, base: &str) -> Result<Divergence> {
        let range = format!("{}...{}", head, self.remote_ref(base));
        let output = self.checked(
            &["rev-list", "--left-right", "--count", range.as_str()],
            &format!("compare {} with {}", head, self.remote_ref(base)),
        )?;
        parse_divergence(output.stdout_trimmed()).ok_or_else(|| {
            Error::Git(format!(
                "unexpected rev-list output: {:?}",
                output.stdout_trimmed()
            ))
        })
    }

    /// Whether `HEAD` is already contained in `origin/<base>`.
    pub fn head_is_ancestor_of(&self, base: &str) -> Result<bool> {
        let target = self.remote_ref(base);
        let output = self
            .ctx
            .run("git", ["merge-base", "--is-ancestor", "HEAD", target.as_str()])?;
        match output.status {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(Error::Git(format!(
                "failed to check ancestry against {}: {}",
                target,
                output.diagnostic()
            ))),
        }
    }

    /// Pushes `branch`, creating the upstream when `set_upstream` is true.
    pub fn push(&self, branch: &str, set_upstream: bool) -> Result<()> {
        let remote = self.remote.clone();
        let mut args = vec!["push"];
        if set_upstream {
            args.push("--set-upstream");
        }
        args.push(remote.as_str());
        args.push(branch);
        self.checked(&args, &format!("push {}", branch))?;
        tracing::info!(branch = %branch, set_upstream, "pushed branch");
        Ok(())
    }

    /// Pushes a rewritten branch with `--force-with-lease`.
    pub fn push_force_with_lease(&self, branch: &str) -> Result<()> {
        let remote = self.remote.clone();
        self.checked(
            &["push", "--force-with-lease", remote.as_str(), branch],
            &format!("force-push {}", branch),
        )?;
        tracing::info!(branch = %branch, "pushed rebased branch");
        Ok(())
    }

    /// Attempts `git rebase origin/<base>`; the raw output is returned.
    pub fn rebase_onto(&self, base: &str) -> Result<CommandOutput> {
        let target = self.remote_ref(base);
        self.ctx.run("git", ["rebase", target.as_str()])
    }

    /// Attempts `git merge --no-edit origin/<base>`; the raw output is returned.
    pub fn merge_from(&self, base: &str) -> Result<CommandOutput> {
        let target = self.remote_ref(base);
        self.ctx.run("git", ["merge", "--no-edit", target.as_str()])
    }

    /// Checks out an existing local branch.
    pub fn checkout(&self, branch: &str) -> Result<()> {
        self.checked(&["checkout", branch], &format!("check out {}", branch))?;
        Ok(())
    }

    /// Fast-forwards the current branch from `origin/<branch>`.
    pub fn pull(&self, branch: &str) -> Result<()> {
        let remote = self.remote.clone();
        self.checked(
            &["pull", "--ff-only", remote.as_str(), branch],
            &format!("pull {}", branch),
        )?;
        Ok(())
    }

    /// Deletes a fully merged local branch.
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        self.checked(&["branch", "-d", branch], &format!("delete branch {}", branch))?;
        tracing::info!(branch = %branch, "deleted local branch");
        Ok(())
    }

    /// Porcelain status lines; empty means a clean working tree.
    pub fn status_porcelain(&self) -> Result<String> {
        let output = self.checked(&["status", "--porcelain"], "read working tree status")?;
        Ok(output.stdout_trimmed().to_string())
    }

    /// Subject line of the tip commit of `rev`.
    pub fn last_commit_subject(&self, rev: &str) -> Result<String> {
        let output = self.checked(
            &["log", "-1", "--pretty=%s", rev],
            &format!("read last commit subject of {}", rev),
        )?;
        Ok(output.stdout_trimmed().to_string())
    }

    /// Up to ten `(short hash, subject)` pairs on `head` not in `origin/<base>`.
    ///
    /// Falls back to the last ten commits of `head` when the range cannot be
    /// resolved.
    pub fn recent_commits(&self, head: &str, base: &str) -> Result<Vec<(String, String)>> {
        let range = format!("{}..{}", self.remote_ref(base), head);
        let output = self
            .ctx
            .run("git", ["log", "-n10", "--pretty=format:%h %s", range.as_str()])?;
        let output = if output.success() {
            output
        } else {
            self.checked(
                &["log", "-n10", "--pretty=format:%h %s", head],
                "list recent commits",
            )?
        };
        Ok(parse_oneline(&output.stdout))
    }

    /// URL of the remote.
    pub fn remote_url(&self) -> Result<String> {
        let remote = self.remote.clone();
        let output = self.ctx.run("git", ["remote", "get-url", remote.as_str()])?;
        if !output.success() {
            return Err(Error::Context(format!(
                "remote '{}' is not configured: {}",
                remote,
                output.diagnostic()
            )));
        }
        Ok(output.stdout_trimmed().to_string())
    }
}

/// Parses `"<left>\t<right>"` from `rev-list --left-right --count`.
pub fn parse_divergence(output: &str) -> Option<Divergence> {
    let mut parts = output.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    Some(Divergence { ahead, behind })
}

/// Parses `git log --pretty=format:'%h %s'` lines.
pub fn parse_oneline(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(' ') {
            Some((hash, subject)) => (hash.to_string(), subject.trim().to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

/// Extracts `owner/name` from a GitHub remote URL.
pub fn parse_repo_slug(url: &str) -> Option<String> {
    let url = url.trim();
    let path = if let Some(rest) = url.strip_prefix("git@") {
        rest.split_once(':')?.1
    } else if let Some((_, rest)) = url.split_once("://") {
        // skip host (and optional user@)
        rest.split_once('/')?.1
    } else {
        return None;
    };

    let path = path.trim_end_matches('/').trim_end_matches(".git");
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let name = segments.next()?;
    if segments.next().is_some() {
        return None;
    }
    Some(format!("{}/{}", owner, name))
}
