//! Per-invocation settings of the release cycle and the open-pr command.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ReleaseConfig;
use crate::github::MergeMethod;
use crate::poll::PollConfig;
use crate::pr::BodySource;
use crate::sync::SyncStrategy;

/// Mode as requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RequestedMode {
    /// Infer from the branch and open PRs.
    #[default]
    Auto,
    OpenPr,
    Publish,
}

/// Resolved mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Drive a feature branch to merge.
    OpenPr,
    /// Drive an already-open release PR to merge.
    Publish,
}

/// How far the cycle goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Stop once the code PR is merged.
    Code,
    /// Continue through the release PR and registry validation.
    #[default]
    Full,
}

/// Track as requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RequestedTrack {
    #[default]
    Auto,
    Beta,
    Stable,
}

/// Resolved release line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Beta,
    Stable,
}

/// Converts fractional minutes from the command line into a poll config.
pub fn poll_config(minutes: f64, settings: &ReleaseConfig) -> PollConfig {
    PollConfig::from_minutes(
        minutes,
        Duration::from_secs(settings.timeouts.poll_interval_secs),
        Duration::from_secs(settings.timeouts.progress_interval_secs),
    )
}

/// Settings for one `release-cycle` run.
#[derive(Debug, Clone)]
pub struct ReleaseCycleConfig {
    pub repo: Option<String>,
    pub mode: RequestedMode,
    pub phase: Phase,
    pub track: RequestedTrack,
    pub promote_stable: bool,
    pub sync: SyncStrategy,
    pub check_timeout_minutes: f64,
    pub release_pr_timeout_minutes: f64,
    pub registry_timeout_minutes: f64,
    pub merge_method: MergeMethod,
    /// Enable auto-merge on the code PR instead of merging it explicitly.
    pub auto_merge: bool,
    /// Merge at all; when false the run stops after checks.
    pub merge: bool,
    pub resume: bool,
    pub cleanup: bool,
    pub yes: bool,
    pub dry_run: bool,
    pub title: Option<String>,
    pub body: BodySource,
    pub update_description: bool,
}

impl ReleaseCycleConfig {
    /// Defaults taken from the file configuration.
    pub fn from_settings(settings: &ReleaseConfig) -> Self {
        Self {
            repo: settings.github.repo.clone(),
            mode: RequestedMode::Auto,
            phase: Phase::Full,
            track: RequestedTrack::Auto,
            promote_stable: false,
            sync: SyncStrategy::Auto,
            check_timeout_minutes: settings.timeouts.check_minutes,
            release_pr_timeout_minutes: settings.timeouts.release_pr_minutes,
            registry_timeout_minutes: settings.timeouts.registry_minutes,
            merge_method: settings.github.merge_method,
            auto_merge: true,
            merge: true,
            resume: true,
            cleanup: true,
            yes: false,
            dry_run: false,
            title: None,
            body: BodySource::default(),
            update_description: false,
        }
    }
}

impl Default for ReleaseCycleConfig {
    fn default() -> Self {
        Self::from_settings(&ReleaseConfig::default())
    }
}

/// Settings for one `open-pr` run.
#[derive(Debug, Clone)]
pub struct OpenPrConfig {
    pub repo: Option<String>,
    /// Target branch; defaults to the beta branch.
    pub base: Option<String>,
    /// Source branch; defaults to the current branch.
    pub head: Option<String>,
    pub title: Option<String>,
    pub body: BodySource,
    pub update_description: bool,
    pub draft: bool,
    pub sync: SyncStrategy,
    pub auto_merge: bool,
    pub watch_checks: bool,
    pub check_timeout_minutes: f64,
    pub merge_method: MergeMethod,
    pub yes: bool,
    pub dry_run: bool,
}

impl OpenPrConfig {
    /// Defaults taken from the file configuration.
    pub fn from_settings(settings: &ReleaseConfig) -> Self {
        Self {
            repo: settings.github.repo.clone(),
            base: None,
            head: None,
            title: None,
            body: BodySource::default(),
            update_description: false,
            draft: false,
            sync: SyncStrategy::Off,
            auto_merge: false,
            watch_checks: false,
            check_timeout_minutes: settings.timeouts.check_minutes,
            merge_method: settings.github.merge_method,
            yes: false,
            dry_run: false,
        }
    }
}

impl Default for OpenPrConfig {
    fn default() -> Self {
        Self::from_settings(&ReleaseConfig::default())
    }
}
