//! Release-cycle orchestration.
//!
//! [`ReleaseCycle`] walks a change from a feature branch to a published
//! package; [`open_pr`] is the standalone PR half of that walk.

pub mod config;
pub mod detect;
pub mod open_pr;
pub mod runner;
pub mod summary;

pub use config::{
    poll_config, Mode, OpenPrConfig, Phase, ReleaseCycleConfig, RequestedMode, RequestedTrack,
    Track,
};
pub use detect::{
    cleanup_block_reason, detect_mode, release_base, resolve_context, resolve_repo,
    resolve_track, ReleaseContext,
};
pub use open_pr::open_pr;
pub use runner::ReleaseCycle;
pub use summary::{steps, ActionRecord, RunSummary, StepOutcome};
