//! Release Cycle CLI
//!
//! Drives a feature branch through review, release and publish.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use release_cycle::cycle::{
    open_pr, OpenPrConfig, Phase, ReleaseCycle, ReleaseCycleConfig, RequestedMode,
    RequestedTrack, RunSummary,
};
use release_cycle::{
    AssumeYes, BodySource, Confirm, ExecContext, MergeMethod, ReleaseConfig, StdinConfirm,
    SyncStrategy,
};

#[derive(Parser)]
#[command(name = "release-cycle")]
#[command(about = "Trunk-based changeset release automation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (default: .release-cycle.toml in the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Drive the current branch through code PR, release PR and registry
    ReleaseCycle(ReleaseCycleArgs),
    /// Push a branch and open or update its PR
    OpenPr(OpenPrArgs),
}

/// Flags shared by both commands.
#[derive(Args)]
struct PrArgs {
    /// Repository as owner/name (default: parsed from origin)
    #[arg(long)]
    repo: Option<String>,
    /// PR title (default: last commit subject)
    #[arg(long)]
    title: Option<String>,
    /// PR body text
    #[arg(long, conflicts_with = "body_file")]
    body: Option<String>,
    /// File containing the PR body
    #[arg(long)]
    body_file: Option<PathBuf>,
    /// Rewrite the title and body of an existing PR
    #[arg(long)]
    update_pr_description: bool,
    #[arg(long, value_enum)]
    merge_method: Option<MergeMethod>,
    /// Minutes to wait for status checks
    #[arg(long)]
    check_timeout: Option<f64>,
    /// Answer yes to every confirmation
    #[arg(long, short = 'y')]
    yes: bool,
    /// Report what would happen without changing anything
    #[arg(long)]
    dry_run: bool,
}

impl PrArgs {
    fn body(&self) -> BodySource {
        BodySource {
            text: self.body.clone(),
            file: self.body_file.clone(),
        }
    }
}

#[derive(Args)]
struct ReleaseCycleArgs {
    #[command(flatten)]
    pr: PrArgs,
    #[arg(long, value_enum, default_value_t = RequestedMode::Auto)]
    mode: RequestedMode,
    #[arg(long, value_enum, default_value_t = Phase::Full)]
    phase: Phase,
    #[arg(long, value_enum, default_value_t = RequestedTrack::Auto)]
    track: RequestedTrack,
    /// Promote beta to stable before publishing
    #[arg(long)]
    promote_stable: bool,
    #[arg(long = "sync-base", value_enum, default_value_t = SyncStrategy::Auto)]
    sync: SyncStrategy,
    /// Minutes to wait for the release PR to appear
    #[arg(long)]
    release_pr_timeout: Option<f64>,
    /// Minutes to wait for the registry to reflect the release
    #[arg(long)]
    registry_timeout: Option<f64>,
    /// Merge the code PR explicitly instead of enabling auto-merge
    #[arg(long)]
    no_auto_merge: bool,
    /// Stop after checks without merging
    #[arg(long)]
    no_merge: bool,
    /// Always open or update the code PR, even if HEAD is already merged
    #[arg(long)]
    no_resume: bool,
    /// Keep the working branch after a successful release
    #[arg(long)]
    no_cleanup: bool,
}

impl ReleaseCycleArgs {
    fn into_config(self, settings: &ReleaseConfig) -> ReleaseCycleConfig {
        let mut config = ReleaseCycleConfig::from_settings(settings);
        if self.pr.repo.is_some() {
            config.repo = self.pr.repo.clone();
        }
        config.body = self.pr.body();
        config.title = self.pr.title;
        config.update_description = self.pr.update_pr_description;
        if let Some(method) = self.pr.merge_method {
            config.merge_method = method;
        }
        if let Some(minutes) = self.pr.check_timeout {
            config.check_timeout_minutes = minutes;
        }
        if let Some(minutes) = self.release_pr_timeout {
            config.release_pr_timeout_minutes = minutes;
        }
        if let Some(minutes) = self.registry_timeout {
            config.registry_timeout_minutes = minutes;
        }
        config.yes = self.pr.yes;
        config.dry_run = self.pr.dry_run;
        config.mode = self.mode;
        config.phase = self.phase;
        config.track = self.track;
        config.promote_stable = self.promote_stable;
        config.sync = self.sync;
        config.auto_merge = !self.no_auto_merge;
        config.merge = !self.no_merge;
        config.resume = !self.no_resume;
        config.cleanup = !self.no_cleanup;
        config
    }
}

#[derive(Args)]
struct OpenPrArgs {
    #[command(flatten)]
    pr: PrArgs,
    /// Target branch (default: the beta branch)
    #[arg(long)]
    base: Option<String>,
    /// Source branch (default: the current branch)
    #[arg(long)]
    head: Option<String>,
    #[arg(long)]
    draft: bool,
    #[arg(long = "sync-base", value_enum, default_value_t = SyncStrategy::Off)]
    sync: SyncStrategy,
    #[arg(long)]
    auto_merge: bool,
    #[arg(long)]
    watch_checks: bool,
}

impl OpenPrArgs {
    fn into_config(self, settings: &ReleaseConfig) -> OpenPrConfig {
        let mut config = OpenPrConfig::from_settings(settings);
        if self.pr.repo.is_some() {
            config.repo = self.pr.repo.clone();
        }
        config.body = self.pr.body();
        config.title = self.pr.title;
        config.update_description = self.pr.update_pr_description;
        if let Some(method) = self.pr.merge_method {
            config.merge_method = method;
        }
        if let Some(minutes) = self.pr.check_timeout {
            config.check_timeout_minutes = minutes;
        }
        config.yes = self.pr.yes;
        config.dry_run = self.pr.dry_run;
        config.base = self.base;
        config.head = self.head;
        config.draft = self.draft;
        config.sync = self.sync;
        config.auto_merge = self.auto_merge;
        config.watch_checks = self.watch_checks;
        config
    }
}

fn load_settings(cwd: &Path, explicit: Option<&PathBuf>) -> release_cycle::Result<ReleaseConfig> {
    match explicit {
        Some(path) => ReleaseConfig::load(path),
        None => ReleaseConfig::discover(cwd),
    }
}

fn run(cli: Cli) -> release_cycle::Result<RunSummary> {
    let cwd = std::env::current_dir()?;
    let settings = load_settings(&cwd, cli.config.as_ref())?;
    let ctx = ExecContext::system(&cwd);

    match cli.command {
        Command::ReleaseCycle(args) => {
            let confirm: &dyn Confirm = if args.pr.yes { &AssumeYes } else { &StdinConfirm };
            let config = args.into_config(&settings);
            ReleaseCycle::new(&ctx, &settings)
                .with_confirm(confirm)
                .run(&config)
        }
        Command::OpenPr(args) => {
            let confirm: &dyn Confirm = if args.pr.yes { &AssumeYes } else { &StdinConfirm };
            let config = args.into_config(&settings);
            open_pr(&ctx, &settings, confirm, &config)
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match run(cli) {
        Ok(summary) => {
            if json {
                match summary.to_json() {
                    Ok(text) => println!("{}", text),
                    Err(e) => {
                        eprintln!("error: failed to serialize summary: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                println!("{}", summary);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(class = e.class(), "release cycle failed");
            eprintln!("error [{}]: {}", e.class(), e);
            ExitCode::FAILURE
        }
    }
}
