//! Pull-request lifecycle: upsert, auto-merge, explicit merge.
//!
//! A PR is identified by its (head, base) pair. Upserting is idempotent: a
//! second call with the same pair and no description refresh reuses the
//! existing PR and issues no edit.

pub mod body;
pub mod locator;

use std::path::PathBuf;

use serde::Serialize;

pub use body::{BodyInputs, BodySource};
pub use locator::{PROMOTION_PREFIX, RELEASE_PREFIX};

use crate::changeset::{package_bumps, pending_changesets};
use crate::error::{Error, Result};
use crate::git::Git;
use crate::github::{pr_number_from_url, GitHub, MergeMethod, PrState, PullRequestRef};

/// Parameters of an upsert.
#[derive(Debug, Clone, Default)]
pub struct UpsertRequest {
    pub head: String,
    pub base: String,
    /// Title; defaults to the subject of the last commit.
    pub title: Option<String>,
    pub body: BodySource,
    pub draft: bool,
    /// Rewrite title and body of an existing PR.
    pub refresh_description: bool,
    pub dry_run: bool,
}

impl UpsertRequest {
    /// Creates a request for `head` into `base`.
    pub fn new(head: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            base: base.into(),
            ..Default::default()
        }
    }

    /// An explicit body counts as a request to refresh the description.
    fn wants_refresh(&self) -> bool {
        self.refresh_description || self.body.text.is_some() || self.body.file.is_some()
    }
}

/// What the upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpsertAction {
    Reused,
    Updated,
    Created,
    /// Nothing was created because of dry-run.
    SkippedDryRun,
}

/// Result of an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub action: UpsertAction,
    /// The PR, absent only when a dry run would have created one.
    pub pr: Option<PullRequestRef>,
}

/// Drives one PR through its lifecycle.
pub struct PrManager<'a> {
    git: &'a Git<'a>,
    github: &'a GitHub<'a>,
    root: PathBuf,
}

impl<'a> PrManager<'a> {
    /// Creates a manager rooted at the repository working directory.
    pub fn new(git: &'a Git<'a>, github: &'a GitHub<'a>, root: impl Into<PathBuf>) -> Self {
        Self {
            git,
            github,
            root: root.into(),
        }
    }

    /// The open PR for (head, base), if any.
    pub fn find_open(&self, head: &str, base: &str) -> Result<Option<PullRequestRef>> {
        Ok(self
            .github
            .list_open_prs()?
            .into_iter()
            .find(|pr| pr.head_ref == head && pr.base_ref == base))
    }

    fn title_for(&self, request: &UpsertRequest) -> Result<String> {
        match &request.title {
            Some(title) if !title.trim().is_empty() => Ok(title.clone()),
            _ => {
                let subject = self.git.last_commit_subject(&request.head)?;
                Ok(if subject.is_empty() {
                    format!("Merge {} into {}", request.head, request.base)
                } else {
                    subject
                })
            }
        }
    }

    /// Renders the description for `request` from repository state.
    pub fn body_for(&self, request: &UpsertRequest) -> Result<String> {
        let inputs = BodyInputs {
            head: request.head.clone(),
            base: request.base.clone(),
            commits: self.git.recent_commits(&request.head, &request.base)?,
            bumps: package_bumps(&pending_changesets(&self.root)?),
        };
        body::render_body(&self.root, &request.body, &inputs)
    }

    /// Pushes the head branch, then reuses, updates or creates its PR.
    pub fn upsert(&self, request: &UpsertRequest) -> Result<UpsertOutcome> {
        if !request.dry_run {
            let has_upstream = self.git.upstream(&request.head)?.is_some();
            self.git.push(&request.head, !has_upstream)?;
        }

        if let Some(existing) = self.find_open(&request.head, &request.base)? {
            if !request.wants_refresh() {
                tracing::info!(pr = existing.number, url = %existing.url, "reusing existing pull request");
                return Ok(UpsertOutcome {
                    action: UpsertAction::Reused,
                    pr: Some(existing),
                });
            }
            if request.dry_run {
                return Ok(UpsertOutcome {
                    action: UpsertAction::SkippedDryRun,
                    pr: Some(existing),
                });
            }
            let title = self.title_for(request)?;
            let body = self.body_for(request)?;
            self.github.edit_pr(existing.number, &title, &body)?;
            return Ok(UpsertOutcome {
                action: UpsertAction::Updated,
                pr: Some(PullRequestRef { title, ..existing }),
            });
        }

        if request.dry_run {
            tracing::info!(head = %request.head, base = %request.base, "dry run: would create pull request");
            return Ok(UpsertOutcome {
                action: UpsertAction::SkippedDryRun,
                pr: None,
            });
        }

        let title = self.title_for(request)?;
        let body = self.body_for(request)?;
        let url = self
            .github
            .create_pr(&request.head, &request.base, &title, &body, request.draft)?;

        let pr = match pr_number_from_url(&url) {
            Some(number) => PullRequestRef {
                number,
                url,
                title,
                head_ref: request.head.clone(),
                base_ref: request.base.clone(),
            },
            None => self.find_open(&request.head, &request.base)?.ok_or_else(|| {
                Error::GitHub(format!(
                    "created a PR for {} -> {} but could not find it afterwards (gh printed {:?})",
                    request.head, request.base, url
                ))
            })?,
        };

        Ok(UpsertOutcome {
            action: UpsertAction::Created,
            pr: Some(pr),
        })
    }

    /// Enables auto-merge; safe to repeat.
    pub fn enable_auto_merge(&self, pr: &PullRequestRef, method: MergeMethod) -> Result<()> {
        self.github.enable_auto_merge(pr.number, method)
    }

    /// Merges `pr` and deletes its branch. Call only after readiness succeeded.
    pub fn merge(&self, pr: &PullRequestRef, method: MergeMethod) -> Result<MergeResult> {
        merge_unless_merged(self.github, pr.number, method)
    }
}

/// How an explicit merge ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    /// This call merged the PR.
    Merged,
    /// The merge failed because the PR had already been merged, e.g. by
    /// auto-merge landing between the readiness check and the merge.
    AlreadyMerged,
}

/// Merges PR `number`; a failed merge of a PR that turns out to be merged
/// counts as success.
pub fn merge_unless_merged(
    github: &GitHub<'_>,
    number: u64,
    method: MergeMethod,
) -> Result<MergeResult> {
    let err = match github.merge_pr(number, method) {
        Ok(()) => return Ok(MergeResult::Merged),
        Err(err) => err,
    };
    match github.readiness(number) {
        Ok(readiness) if readiness.state == PrState::Merged => {
            tracing::info!(pr = number, "pull request was already merged");
            Ok(MergeResult::AlreadyMerged)
        }
        _ => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::exec::{CommandOutput, ExecContext, ManualClock, Matcher, ScriptedExecutor};
    use tempfile::TempDir;

    const EXISTING: &str = r#"[{"number":44,"url":"https://github.com/o/r/pull/44","title":"old","headRefName":"feat/existing","baseRefName":"release/beta"}]"#;

    fn setup(dir: &TempDir) -> (Arc<ScriptedExecutor>, ExecContext) {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond(
            Matcher::new("git", ["log", "-1"]),
            CommandOutput::ok("feat: something\n"),
        );
        exec.respond(
            Matcher::new("git", ["log", "-n10"]),
            CommandOutput::ok("abc123 feat: something\n"),
        );
        let ctx = ExecContext::new(exec.clone(), Arc::new(ManualClock::new()), dir.path());
        (exec, ctx)
    }

    #[test]
    fn upsert_twice_reuses_same_pr_without_edit() {
        let dir = TempDir::new().unwrap();
        let (exec, ctx) = setup(&dir);
        exec.respond(Matcher::new("gh", ["pr", "list"]), CommandOutput::ok(EXISTING));
        let git = Git::new(&ctx);
        let gh = GitHub::new(&ctx, "o/r");
        let manager = PrManager::new(&git, &gh, dir.path());

        let request = UpsertRequest::new("feat/existing", "release/beta");
        let first = manager.upsert(&request).unwrap();
        let second = manager.upsert(&request).unwrap();

        assert_eq!(first.action, UpsertAction::Reused);
        assert_eq!(first.pr.as_ref().map(|p| p.number), Some(44));
        assert_eq!(second.pr.as_ref().map(|p| p.number), Some(44));
        assert_eq!(exec.count(&Matcher::new("gh", ["pr", "edit"])), 0);
        assert_eq!(exec.count(&Matcher::new("gh", ["pr", "create"])), 0);
    }

    #[test]
    fn explicit_body_refreshes_existing_pr() {
        let dir = TempDir::new().unwrap();
        let (exec, ctx) = setup(&dir);
        exec.respond(Matcher::new("gh", ["pr", "list"]), CommandOutput::ok(EXISTING));
        let git = Git::new(&ctx);
        let gh = GitHub::new(&ctx, "o/r");
        let manager = PrManager::new(&git, &gh, dir.path());

        let mut request = UpsertRequest::new("feat/existing", "release/beta");
        request.body.text = Some("custom body".to_string());
        let outcome = manager.upsert(&request).unwrap();

        assert_eq!(outcome.action, UpsertAction::Updated);
        let edits = exec.calls_matching(&Matcher::new("gh", ["pr", "edit", "44"]));
        assert_eq!(edits.len(), 1);
        assert!(edits[0].has_arg("custom body"));
        assert!(edits[0].has_arg("feat: something"));
    }

    #[test]
    fn missing_pr_is_pushed_and_created() {
        let dir = TempDir::new().unwrap();
        let (exec, ctx) = setup(&dir);
        exec.respond(Matcher::new("gh", ["pr", "list"]), CommandOutput::ok("[]"));
        exec.respond(
            Matcher::new("git", ["rev-parse", "--abbrev-ref", "--symbolic-full-name"]),
            CommandOutput::fail(128, "no upstream configured"),
        );
        exec.respond(
            Matcher::new("gh", ["pr", "create"]),
            CommandOutput::ok("https://github.com/o/r/pull/12\n"),
        );
        let git = Git::new(&ctx);
        let gh = GitHub::new(&ctx, "o/r");
        let manager = PrManager::new(&git, &gh, dir.path());

        let mut request = UpsertRequest::new("feat/test", "release/beta");
        request.draft = true;
        let outcome = manager.upsert(&request).unwrap();

        assert_eq!(outcome.action, UpsertAction::Created);
        let pr = outcome.pr.unwrap();
        assert_eq!(pr.number, 12);
        assert_eq!(pr.title, "feat: something");
        assert_eq!(
            exec.count(&Matcher::new("git", ["push", "--set-upstream", "origin", "feat/test"])),
            1
        );
        let create = exec.calls_matching(&Matcher::new("gh", ["pr", "create"]));
        assert!(create[0].has_arg("--draft"));
        assert!(create[0].has_arg("release/beta"));
        assert!(create[0].args.iter().any(|a| a.contains("## Release Impact")));
    }

    #[test]
    fn dry_run_neither_pushes_nor_creates() {
        let dir = TempDir::new().unwrap();
        let (exec, ctx) = setup(&dir);
        exec.respond(Matcher::new("gh", ["pr", "list"]), CommandOutput::ok("[]"));
        let git = Git::new(&ctx);
        let gh = GitHub::new(&ctx, "o/r");
        let manager = PrManager::new(&git, &gh, dir.path());

        let mut request = UpsertRequest::new("feat/test", "release/beta");
        request.dry_run = true;
        let outcome = manager.upsert(&request).unwrap();

        assert_eq!(outcome.action, UpsertAction::SkippedDryRun);
        assert!(outcome.pr.is_none());
        assert_eq!(exec.count(&Matcher::new("git", ["push"])), 0);
        assert_eq!(exec.count(&Matcher::new("gh", ["pr", "create"])), 0);
    }

    const READINESS: &str = "number,url,reviewDecision,mergeStateStatus,isDraft,headRefName,state";

    fn readiness_json(state: &str) -> String {
        format!(
            r#"{{"number":98,"url":"https://github.com/o/r/pull/98","reviewDecision":"APPROVED","mergeStateStatus":"UNKNOWN","isDraft":false,"headRefName":"changeset-release/release/beta","state":"{}"}}"#,
            state
        )
    }

    #[test]
    fn failed_merge_of_merged_pr_counts_as_merged() {
        let dir = TempDir::new().unwrap();
        let (exec, ctx) = setup(&dir);
        exec.respond(
            Matcher::new("gh", ["pr", "merge", "98"]),
            CommandOutput::fail(1, "Pull request o/r#98 was already merged"),
        );
        exec.respond(
            Matcher::new("gh", ["pr", "view", "98"]).containing(READINESS),
            CommandOutput::ok(readiness_json("MERGED")),
        );
        let gh = GitHub::new(&ctx, "o/r");

        let result = merge_unless_merged(&gh, 98, MergeMethod::Squash).unwrap();
        assert_eq!(result, MergeResult::AlreadyMerged);
    }

    #[test]
    fn failed_merge_of_open_pr_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (exec, ctx) = setup(&dir);
        exec.respond(
            Matcher::new("gh", ["pr", "merge", "98"]),
            CommandOutput::fail(1, "Base branch was modified"),
        );
        exec.respond(
            Matcher::new("gh", ["pr", "view", "98"]).containing(READINESS),
            CommandOutput::ok(readiness_json("OPEN")),
        );
        let gh = GitHub::new(&ctx, "o/r");

        let err = merge_unless_merged(&gh, 98, MergeMethod::Squash).unwrap_err();
        assert_eq!(err.class(), "github");
        assert!(err.to_string().contains("Base branch was modified"));
    }
}
