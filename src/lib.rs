//! Release Cycle - trunk-based changeset release automation
//!
//! This library drives a change from a feature branch through a code PR, the
//! changeset bot's release PR and finally the npm registry, failing fast on
//! anything that needs a human.

pub mod changeset;
pub mod checks;
pub mod config;
pub mod cycle;
pub mod error;
pub mod exec;
pub mod git;
pub mod github;
pub mod poll;
pub mod pr;
pub mod prompt;
pub mod readiness;
pub mod registry;
pub mod sync;

pub use error::{Error, Result};

pub use config::{
    BranchesConfig, GithubConfig, RegistryConfig, ReleaseConfig, TimeoutsConfig, Validate,
    ValidationResult, CONFIG_FILE,
};
pub use cycle::{
    open_pr, Mode, OpenPrConfig, Phase, ReleaseCycle, ReleaseCycleConfig, RequestedMode,
    RequestedTrack, RunSummary, StepOutcome, Track,
};
pub use exec::{
    Clock, CommandExecutor, CommandOutput, ExecContext, Invocation, ManualClock, Matcher,
    ScriptedExecutor, SystemClock, SystemExecutor,
};
pub use git::Git;
pub use github::{
    CheckState, GitHub, MergeMethod, MergeReadiness, MergeStateStatus, PrState, PullRequestRef,
    ReviewDecision,
};
pub use poll::{poll_until, Poll, PollConfig};
pub use pr::{
    merge_unless_merged, BodySource, MergeResult, PrManager, UpsertAction, UpsertOutcome,
    UpsertRequest,
};
pub use prompt::{AssumeYes, Confirm, StdinConfirm};
pub use readiness::ReadinessOptions;
pub use registry::{Expectation, Npm, NpmObservation, NpmTarget};
pub use sync::{SyncOutcome, SyncStrategy};
