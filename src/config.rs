//! File configuration and validation.
//!
//! Settings are layered: built-in defaults, then an optional
//! `.release-cycle.toml` at the repository root, then command-line flags.
//! Everything is checked through [`Validate`] before a run starts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cycle::{OpenPrConfig, ReleaseCycleConfig, RequestedMode, RequestedTrack};
use crate::error::{Error, Result};
use crate::github::MergeMethod;
use crate::pr::{PROMOTION_PREFIX, RELEASE_PREFIX};

/// Configuration file looked up at the repository root.
pub const CONFIG_FILE: &str = ".release-cycle.toml";

/// Branch naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchesConfig {
    /// Prerelease integration branch.
    pub beta: String,
    /// Stable default branch.
    pub stable: String,
    /// Head prefix of changeset bot release PRs.
    pub release_prefix: String,
    /// Head prefix of promotion PRs.
    pub promotion_prefix: String,
    /// Prefixes of working branches that cleanup may delete.
    pub allowed_prefixes: Vec<String>,
    /// Branches cleanup never deletes.
    pub protected: Vec<String>,
}

impl Default for BranchesConfig {
    fn default() -> Self {
        Self {
            beta: "release/beta".to_string(),
            stable: "main".to_string(),
            release_prefix: RELEASE_PREFIX.to_string(),
            promotion_prefix: PROMOTION_PREFIX.to_string(),
            allowed_prefixes: [
                "feat/", "fix/", "chore/", "docs/", "refactor/", "test/", "ci/", "perf/",
                "build/", "style/", "hotfix/",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            protected: ["main", "master", "develop"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Hosting platform settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// `owner/name`; derived from the `origin` remote when unset.
    pub repo: Option<String>,
    /// Workflow file dispatched to start a stable promotion.
    pub promote_workflow: String,
    pub merge_method: MergeMethod,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            repo: None,
            promote_workflow: "promote-stable.yml".to_string(),
            merge_method: MergeMethod::Squash,
        }
    }
}

/// Bounded-wait timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub check_minutes: f64,
    pub release_pr_minutes: f64,
    pub registry_minutes: f64,
    pub poll_interval_secs: u64,
    pub progress_interval_secs: u64,
    pub behind_stall_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            check_minutes: 30.0,
            release_pr_minutes: 30.0,
            registry_minutes: 10.0,
            poll_interval_secs: 10,
            progress_interval_secs: 30,
            behind_stall_secs: 10,
        }
    }
}

/// Registry expectations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Packages to validate; empty means whatever the release PR changed.
    pub packages: Vec<String>,
    pub tag_beta: String,
    pub tag_stable: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            tag_beta: "beta".to_string(),
            tag_stable: "latest".to_string(),
        }
    }
}

/// Everything read from `.release-cycle.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    pub branches: BranchesConfig,
    pub github: GithubConfig,
    pub timeouts: TimeoutsConfig,
    pub registry: RegistryConfig,
}

impl ReleaseConfig {
    /// Parses configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid {}: {}", CONFIG_FILE, e)))
    }

    /// Reads `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Reads `<root>/.release-cycle.toml`, or returns defaults when absent.
    pub fn discover(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if path.is_file() {
            tracing::debug!(path = ?path, "loading configuration file");
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    ///
    /// Warnings are logged and handed back.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            for warning in &self.warnings {
                tracing::warn!(warning = %warning, "configuration warning");
            }
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

fn check_minutes(result: &mut ValidationResult, name: &str, minutes: f64) {
    if !minutes.is_finite() || minutes < 0.0 {
        result.add_error(format!("{} must be a non-negative number of minutes", name));
    } else if minutes > 24.0 * 60.0 {
        result.add_warning(format!("{} over 24 hours may indicate a misconfiguration", name));
    }
}

fn check_repo(result: &mut ValidationResult, repo: Option<&str>) {
    if let Some(repo) = repo {
        let parts: Vec<&str> = repo.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.trim().is_empty()) {
            result.add_error(format!("repo '{}' must look like owner/name", repo));
        }
    }
}

impl Validate for ReleaseConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        let b = &self.branches;

        if b.beta.trim().is_empty() || b.stable.trim().is_empty() {
            result.add_error("branches.beta and branches.stable must not be empty");
        }
        if b.beta == b.stable {
            result.add_error("branches.beta and branches.stable must differ");
        }
        if b.release_prefix.trim().is_empty() || b.promotion_prefix.trim().is_empty() {
            result.add_error("release and promotion prefixes must not be empty");
        }
        if b.allowed_prefixes.is_empty() {
            result.add_warning("branches.allowed_prefixes is empty; cleanup will never delete a branch");
        }
        if !b.protected.contains(&b.stable) {
            result.add_warning(format!(
                "stable branch '{}' is not listed in branches.protected",
                b.stable
            ));
        }

        check_repo(&mut result, self.github.repo.as_deref());
        if !self.github.promote_workflow.ends_with(".yml")
            && !self.github.promote_workflow.ends_with(".yaml")
        {
            result.add_warning(format!(
                "promote_workflow '{}' does not look like a workflow file",
                self.github.promote_workflow
            ));
        }

        let t = &self.timeouts;
        check_minutes(&mut result, "timeouts.check_minutes", t.check_minutes);
        check_minutes(&mut result, "timeouts.release_pr_minutes", t.release_pr_minutes);
        check_minutes(&mut result, "timeouts.registry_minutes", t.registry_minutes);
        if t.poll_interval_secs == 0 {
            result.add_warning("timeouts.poll_interval_secs = 0 polls as fast as allowed (100ms)");
        }

        if self.registry.tag_beta.trim().is_empty() || self.registry.tag_stable.trim().is_empty() {
            result.add_error("registry tags must not be empty");
        }

        result
    }
}

impl Validate for ReleaseCycleConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        check_repo(&mut result, self.repo.as_deref());
        check_minutes(&mut result, "--check-timeout", self.check_timeout_minutes);
        check_minutes(&mut result, "--release-pr-timeout", self.release_pr_timeout_minutes);
        check_minutes(&mut result, "--registry-timeout", self.registry_timeout_minutes);

        if self.track == RequestedTrack::Stable && !self.promote_stable {
            result.add_error("--track stable requires --promote-stable");
        }
        if self.promote_stable && self.track == RequestedTrack::Beta {
            result.add_error("--promote-stable cannot be combined with --track beta");
        }
        if self.promote_stable && self.mode == RequestedMode::OpenPr {
            result.add_error("--promote-stable cannot be combined with --mode open-pr");
        }
        if self.body.text.is_some() && self.body.file.is_some() {
            result.add_error("--body and --body-file are mutually exclusive");
        }
        if !self.merge && self.auto_merge {
            result.add_warning("--no-merge also disables auto-merge");
        }
        if !self.cleanup && self.dry_run {
            result.add_warning("--no-cleanup has no effect with --dry-run");
        }

        result
    }
}

impl Validate for OpenPrConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        check_repo(&mut result, self.repo.as_deref());
        check_minutes(&mut result, "--check-timeout", self.check_timeout_minutes);
        if self.body.text.is_some() && self.body.file.is_some() {
            result.add_error("--body and --body-file are mutually exclusive");
        }
        if let (Some(head), Some(base)) = (&self.head, &self.base) {
            if head == base {
                result.add_error(format!("head and base are both '{}'", head));
            }
        }
        if self.draft && self.auto_merge {
            result.add_warning("auto-merge on a draft PR only takes effect once it is marked ready");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let result = ReleaseConfig::default().validate();
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = ReleaseConfig::parse(
            r#"
[branches]
beta = "next"

[timeouts]
check_minutes = 5.5

[registry]
packages = ["@scope/core"]
"#,
        )
        .unwrap();
        assert_eq!(config.branches.beta, "next");
        assert_eq!(config.branches.stable, "main");
        assert_eq!(config.timeouts.check_minutes, 5.5);
        assert_eq!(config.timeouts.release_pr_minutes, 30.0);
        assert_eq!(config.registry.packages, vec!["@scope/core".to_string()]);
        assert_eq!(config.github.promote_workflow, "promote-stable.yml");
    }

    #[test]
    fn merge_method_parses_lowercase() {
        let config = ReleaseConfig::parse("[github]\nmerge_method = \"rebase\"\n").unwrap();
        assert_eq!(config.github.merge_method, MergeMethod::Rebase);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let err = ReleaseConfig::parse("[branches\n").unwrap_err();
        assert_eq!(err.class(), "config");
    }

    #[test]
    fn discover_without_file_returns_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(ReleaseConfig::discover(dir.path()).unwrap(), ReleaseConfig::default());
    }

    #[test]
    fn same_beta_and_stable_fails() {
        let mut config = ReleaseConfig::default();
        config.branches.beta = "main".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("must differ")));
    }

    #[test]
    fn bad_repo_slug_fails() {
        let mut config = ReleaseCycleConfig::default();
        config.repo = Some("just-a-name".to_string());
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn stable_track_without_promotion_fails() {
        let mut config = ReleaseCycleConfig::default();
        config.track = RequestedTrack::Stable;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.contains("--promote-stable")));
    }

    #[test]
    fn negative_timeout_fails() {
        let mut config = ReleaseCycleConfig::default();
        config.check_timeout_minutes = -1.0;
        assert!(config.validate().into_result().is_err());
    }

    #[test]
    fn open_pr_head_equal_to_base_fails() {
        let mut config = OpenPrConfig::default();
        config.head = Some("release/beta".to_string());
        config.base = Some("release/beta".to_string());
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn fractional_minute_timeouts_are_valid() {
        let mut config = ReleaseCycleConfig::default();
        config.check_timeout_minutes = 0.05;
        config.release_pr_timeout_minutes = 0.05;
        assert!(config.validate().is_valid());
    }
}
