//! Hosting-platform operations through the `gh` CLI.
//!
//! Each call site gets its own typed result (`PullRequestRef`,
//! `MergeReadiness`, `CheckState`, `WorkflowRun`) parsed from `--json` output,
//! so the decision logic downstream never inspects untyped maps.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::exec::{CommandOutput, ExecContext};

/// Fields requested when listing pull requests.
const LIST_FIELDS: &str = "number,url,title,headRefName,baseRefName";
/// Fields requested for merge-readiness evaluation.
const READINESS_FIELDS: &str = "number,url,reviewDecision,mergeStateStatus,isDraft,headRefName,state";
/// Fields requested for the status-check rollup.
const CHECK_FIELDS: &str = "statusCheckRollup,url,number,state";

/// An open pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    /// PR number.
    pub number: u64,
    /// PR URL.
    pub url: String,
    /// PR title.
    #[serde(default)]
    pub title: String,
    /// Source branch.
    #[serde(rename = "headRefName")]
    pub head_ref: String,
    /// Target branch.
    #[serde(rename = "baseRefName")]
    pub base_ref: String,
}

/// Method used when merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// Squash all commits into one.
    #[default]
    Squash,
    /// Create a merge commit.
    Merge,
    /// Rebase commits onto the base branch.
    Rebase,
}

impl MergeMethod {
    /// The `gh pr merge` flag for this method.
    pub fn as_flag(&self) -> &'static str {
        match self {
            MergeMethod::Squash => "--squash",
            MergeMethod::Merge => "--merge",
            MergeMethod::Rebase => "--rebase",
        }
    }
}

/// Aggregate review state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewDecision {
    Approved,
    ReviewRequired,
    ChangesRequested,
    Unknown,
}

impl ReviewDecision {
    fn parse(raw: Option<&str>) -> Self {
        match raw.unwrap_or_default().trim().to_ascii_uppercase().as_str() {
            "APPROVED" => ReviewDecision::Approved,
            "REVIEW_REQUIRED" => ReviewDecision::ReviewRequired,
            "CHANGES_REQUESTED" => ReviewDecision::ChangesRequested,
            _ => ReviewDecision::Unknown,
        }
    }
}

/// Platform-computed mergeability classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStateStatus {
    Clean,
    Dirty,
    Behind,
    Blocked,
    Unstable,
    HasHooks,
    /// Reported, but `UNKNOWN` or unrecognized.
    Unknown,
    /// Nothing reported at all.
    Empty,
}

impl MergeStateStatus {
    fn parse(raw: Option<&str>) -> Self {
        let raw = raw.unwrap_or_default().trim();
        if raw.is_empty() {
            return MergeStateStatus::Empty;
        }
        match raw.to_ascii_uppercase().as_str() {
            "CLEAN" => MergeStateStatus::Clean,
            "DIRTY" => MergeStateStatus::Dirty,
            "BEHIND" => MergeStateStatus::Behind,
            "BLOCKED" => MergeStateStatus::Blocked,
            "UNSTABLE" => MergeStateStatus::Unstable,
            "HAS_HOOKS" => MergeStateStatus::HasHooks,
            _ => MergeStateStatus::Unknown,
        }
    }
}

/// Lifecycle state of a PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrState {
    Open,
    Closed,
    Merged,
    Unknown,
}

impl PrState {
    fn parse(raw: Option<&str>) -> Self {
        match raw.unwrap_or_default().trim().to_ascii_uppercase().as_str() {
            "OPEN" => PrState::Open,
            "CLOSED" => PrState::Closed,
            "MERGED" => PrState::Merged,
            _ => PrState::Unknown,
        }
    }
}

/// Merge-readiness fields of a PR, recomputed on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReadiness {
    pub number: u64,
    pub url: String,
    pub review_decision: ReviewDecision,
    pub merge_state_status: MergeStateStatus,
    pub is_draft: bool,
    pub head_ref_name: String,
    pub state: PrState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReadiness {
    #[serde(default)]
    number: Option<u64>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    review_decision: Option<String>,
    #[serde(default)]
    merge_state_status: Option<String>,
    #[serde(default)]
    is_draft: Option<bool>,
    #[serde(default)]
    head_ref_name: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

/// Parses `gh pr view --json <READINESS_FIELDS>` output.
pub fn parse_readiness(json: &str, number: u64) -> Result<MergeReadiness> {
    let raw: RawReadiness = serde_json::from_str(json)
        .map_err(|e| Error::GitHub(format!("failed to parse readiness of PR #{}: {}", number, e)))?;
    Ok(MergeReadiness {
        number: raw.number.unwrap_or(number),
        url: raw.url.unwrap_or_default(),
        review_decision: ReviewDecision::parse(raw.review_decision.as_deref()),
        merge_state_status: MergeStateStatus::parse(raw.merge_state_status.as_deref()),
        is_draft: raw.is_draft.unwrap_or(false),
        head_ref_name: raw.head_ref_name.unwrap_or_default(),
        state: PrState::parse(raw.state.as_deref()),
    })
}

/// Classification of a single status-check entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Pending,
    Passing,
    Failing,
}

/// One entry of a status-check rollup (CheckRun or StatusContext).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl CheckEntry {
    /// Display name of the check.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.context.as_deref())
            .unwrap_or("(unnamed check)")
    }

    /// Classifies the entry as pending, passing or failing.
    pub fn outcome(&self) -> CheckOutcome {
        let non_empty = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_ascii_uppercase)
        };

        if let Some(status) = non_empty(&self.status) {
            // CheckRun: not completed means still running regardless of conclusion
            if status != "COMPLETED" && non_empty(&self.conclusion).is_none() {
                return classify(&status);
            }
        }
        let effective = non_empty(&self.conclusion)
            .or_else(|| non_empty(&self.state))
            .or_else(|| non_empty(&self.status))
            .unwrap_or_else(|| "PENDING".to_string());
        classify(&effective)
    }
}

fn classify(value: &str) -> CheckOutcome {
    match value {
        "QUEUED" | "IN_PROGRESS" | "PENDING" | "EXPECTED" | "WAITING" | "REQUESTED" => {
            CheckOutcome::Pending
        }
        "SUCCESS" | "NEUTRAL" | "SKIPPED" => CheckOutcome::Passing,
        _ => CheckOutcome::Failing,
    }
}

/// Counts of status checks on a PR, recomputed per poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckState {
    pub pending: usize,
    pub failed: usize,
    pub total: usize,
    /// Names of failing checks.
    pub failing: Vec<String>,
    /// Names of checks still running.
    pub waiting_on: Vec<String>,
    /// Lifecycle state of the PR when the rollup was read.
    pub pr_state: Option<PrState>,
}

impl CheckState {
    /// Tallies a rollup.
    pub fn from_entries(entries: &[CheckEntry]) -> Self {
        let mut state = CheckState {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            match entry.outcome() {
                CheckOutcome::Pending => {
                    state.pending += 1;
                    state.waiting_on.push(entry.label().to_string());
                }
                CheckOutcome::Failing => {
                    state.failed += 1;
                    state.failing.push(entry.label().to_string());
                }
                CheckOutcome::Passing => {}
            }
        }
        state
    }

    /// One-line description for logs and timeout snapshots.
    pub fn describe(&self) -> String {
        let mut text = format!(
            "checks total={} pending={} failed={}",
            self.total, self.pending, self.failed
        );
        if !self.waiting_on.is_empty() {
            text.push_str(&format!(" waiting_on=[{}]", self.waiting_on.join(", ")));
        }
        if !self.failing.is_empty() {
            text.push_str(&format!(" failing=[{}]", self.failing.join(", ")));
        }
        text
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChecks {
    #[serde(default)]
    status_check_rollup: Option<Vec<CheckEntry>>,
    #[serde(default)]
    state: Option<String>,
}

/// Parses `gh pr view --json <CHECK_FIELDS>` output.
pub fn parse_checks(json: &str, number: u64) -> Result<CheckState> {
    let raw: RawChecks = serde_json::from_str(json)
        .map_err(|e| Error::GitHub(format!("failed to parse checks of PR #{}: {}", number, e)))?;
    let mut state = CheckState::from_entries(&raw.status_check_rollup.unwrap_or_default());
    state.pr_state = raw.state.as_deref().map(|s| PrState::parse(Some(s)));
    Ok(state)
}

/// Most recent CI run on a branch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    #[serde(default)]
    pub database_id: Option<u64>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub conclusion: String,
    #[serde(default)]
    pub workflow_name: String,
}

impl WorkflowRun {
    /// Whether the run is still queued or executing.
    pub fn is_active(&self) -> bool {
        !self.status.eq_ignore_ascii_case("completed")
    }

    /// Whether the run completed with a conclusion that counts as failure.
    pub fn failed(&self) -> bool {
        !self.is_active()
            && matches!(
                self.conclusion.to_ascii_lowercase().as_str(),
                "failure" | "cancelled" | "timed_out" | "startup_failure" | "action_required"
            )
    }
}

#[derive(Debug, Deserialize)]
struct RawFiles {
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    path: String,
}

#[derive(Debug, Deserialize)]
struct RawContent {
    #[serde(default)]
    content: String,
}

/// Decodes the base64 `content` field of a contents-API response.
pub fn decode_content(json: &str) -> Result<String> {
    let raw: RawContent = serde_json::from_str(json)
        .map_err(|e| Error::GitHub(format!("failed to parse contents response: {}", e)))?;
    let compact: String = raw.content.split_whitespace().collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| Error::GitHub(format!("failed to decode file content: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::GitHub(format!("file content is not UTF-8: {}", e)))
}

/// Extracts the PR number from a `.../pull/<n>` URL.
pub fn pr_number_from_url(url: &str) -> Option<u64> {
    url.trim().trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

/// Verifies `gh` is installed and authenticated.
pub fn preflight(ctx: &ExecContext) -> Result<()> {
    let version = ctx.run("gh", ["--version"])?;
    if !version.success() {
        return Err(Error::Preflight(format!(
            "GitHub CLI (gh) is not available: {}",
            version.diagnostic()
        )));
    }
    let auth = ctx.run("gh", ["auth", "status"])?;
    if !auth.success() {
        return Err(Error::Preflight(format!(
            "GitHub CLI is not authenticated; run `gh auth login`: {}",
            auth.diagnostic()
        )));
    }
    Ok(())
}

/// Wrapper over `gh` scoped to one repository.
pub struct GitHub<'a> {
    ctx: &'a ExecContext,
    repo: String,
}

impl<'a> GitHub<'a> {
    /// Creates a client for `owner/name`.
    pub fn new(ctx: &'a ExecContext, repo: impl Into<String>) -> Self {
        Self {
            ctx,
            repo: repo.into(),
        }
    }

    /// The `owner/name` slug in use.
    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn gh(&self, args: &[&str], action: &str) -> Result<CommandOutput> {
        let output = self.ctx.run("gh", args)?;
        if !output.success() {
            return Err(Error::GitHub(format!("{} failed: {}", action, output.diagnostic())));
        }
        Ok(output)
    }

    /// Lists open pull requests.
    pub fn list_open_prs(&self) -> Result<Vec<PullRequestRef>> {
        let output = self.gh(
            &[
                "pr", "list", "--repo", &self.repo, "--state", "open", "--limit", "100", "--json",
                LIST_FIELDS,
            ],
            "gh pr list",
        )?;
        let text = output.stdout_trimmed();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(text)
            .map_err(|e| Error::GitHub(format!("failed to parse gh pr list output: {}", e)))
    }

    /// Creates a PR and returns its URL.
    pub fn create_pr(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
        draft: bool,
    ) -> Result<String> {
        let mut args = vec![
            "pr", "create", "--repo", &self.repo, "--base", base, "--head", head, "--title", title,
            "--body", body,
        ];
        if draft {
            args.push("--draft");
        }
        let output = self.gh(&args, "gh pr create")?;
        let url = output
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|line| line.starts_with("http"))
            .unwrap_or_else(|| output.stdout_trimmed())
            .to_string();
        tracing::info!(head = %head, base = %base, url = %url, "created pull request");
        Ok(url)
    }

    /// Updates title and body of a PR.
    pub fn edit_pr(&self, number: u64, title: &str, body: &str) -> Result<()> {
        let n = number.to_string();
        self.gh(
            &["pr", "edit", &n, "--repo", &self.repo, "--title", title, "--body", body],
            "gh pr edit",
        )?;
        tracing::info!(pr = number, "updated pull request description");
        Ok(())
    }

    /// Enables auto-merge on a PR.
    pub fn enable_auto_merge(&self, number: u64, method: MergeMethod) -> Result<()> {
        let n = number.to_string();
        self.gh(
            &["pr", "merge", &n, "--repo", &self.repo, "--auto", method.as_flag()],
            "gh pr merge --auto",
        )?;
        tracing::info!(pr = number, method = ?method, "enabled auto-merge");
        Ok(())
    }

    /// Merges a PR and deletes its source branch.
    pub fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<()> {
        let n = number.to_string();
        self.gh(
            &[
                "pr",
                "merge",
                &n,
                "--repo",
                &self.repo,
                method.as_flag(),
                "--delete-branch",
            ],
            "gh pr merge",
        )?;
        tracing::info!(pr = number, method = ?method, "merged pull request");
        Ok(())
    }

    /// Reads the merge-readiness fields of a PR.
    pub fn readiness(&self, number: u64) -> Result<MergeReadiness> {
        let n = number.to_string();
        let output = self.gh(
            &["pr", "view", &n, "--repo", &self.repo, "--json", READINESS_FIELDS],
            "gh pr view (readiness)",
        )?;
        parse_readiness(output.stdout_trimmed(), number)
    }

    /// Reads the status-check rollup of a PR.
    pub fn checks(&self, number: u64) -> Result<CheckState> {
        let n = number.to_string();
        let output = self.gh(
            &["pr", "view", &n, "--repo", &self.repo, "--json", CHECK_FIELDS],
            "gh pr view (checks)",
        )?;
        parse_checks(output.stdout_trimmed(), number)
    }

    /// Paths of files changed by a PR.
    pub fn changed_files(&self, number: u64) -> Result<Vec<String>> {
        let n = number.to_string();
        let output = self.gh(
            &["pr", "view", &n, "--repo", &self.repo, "--json", "files"],
            "gh pr view (files)",
        )?;
        let text = output.stdout_trimmed();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let raw: RawFiles = serde_json::from_str(text)
            .map_err(|e| Error::GitHub(format!("failed to parse changed files: {}", e)))?;
        Ok(raw.files.into_iter().map(|f| f.path).collect())
    }

    /// Most recent workflow run on `branch`, if any.
    pub fn latest_run(&self, branch: &str) -> Result<Option<WorkflowRun>> {
        let output = self.gh(
            &[
                "run",
                "list",
                "--repo",
                &self.repo,
                "--branch",
                branch,
                "--limit",
                "1",
                "--json",
                "databaseId,status,conclusion,workflowName",
            ],
            "gh run list",
        )?;
        let text = output.stdout_trimmed();
        if text.is_empty() {
            return Ok(None);
        }
        let runs: Vec<WorkflowRun> = serde_json::from_str(text)
            .map_err(|e| Error::GitHub(format!("failed to parse gh run list output: {}", e)))?;
        Ok(runs.into_iter().next())
    }

    /// Dispatches a workflow on `git_ref`.
    pub fn dispatch_workflow(&self, workflow: &str, git_ref: &str) -> Result<()> {
        let endpoint = format!("repos/{}/actions/workflows/{}/dispatches", self.repo, workflow);
        let field = format!("ref={}", git_ref);
        self.gh(
            &["api", "-X", "POST", &endpoint, "-f", &field],
            &format!("dispatch of workflow {}", workflow),
        )?;
        tracing::info!(workflow = %workflow, git_ref = %git_ref, "dispatched workflow");
        Ok(())
    }

    /// Reads a repository file at `git_ref` through the contents API.
    pub fn read_file(&self, path: &str, git_ref: &str) -> Result<String> {
        let endpoint = format!(
            "repos/{}/contents/{}?ref={}",
            self.repo,
            path.trim_start_matches('/'),
            urlencoding::encode(git_ref)
        );
        let output = self.gh(
            &["api", "-X", "GET", &endpoint],
            &format!("read of {}@{}", path, git_ref),
        )?;
        decode_content(output.stdout_trimmed())
    }
}
