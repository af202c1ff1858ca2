//! Command execution and time, injected into every component.
//!
//! All external systems (git, gh, npm) are reached through a
//! [`CommandExecutor`], and every wait goes through a [`Clock`]. Both live in
//! an [`ExecContext`] that is passed by reference, so the engine never reads
//! process-global state and tests can run against [`ScriptedExecutor`] and
//! [`ManualClock`] without real tools or real time passing.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// A single external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name (looked up on `PATH`).
    pub program: String,
    /// Arguments, not including the program.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Renders the invocation as a shell-like line for logs and errors.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(char::is_whitespace) || arg.is_empty() {
                line.push_str(&format!("{:?}", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }

    /// Returns true if any argument equals `needle`.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status (`-1` when terminated by a signal).
    pub status: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// A successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed output with the given status and stderr.
    pub fn fail(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Trimmed stdout.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Best available diagnostic text: stderr, falling back to stdout.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs external processes synchronously.
pub trait CommandExecutor: Send + Sync {
    /// Runs the invocation to completion and captures its output.
    ///
    /// A non-zero exit status is not an error at this layer; callers decide.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Executor backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let output = Command::new(&invocation.program)
            .current_dir(&invocation.cwd)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::Preflight(format!(
                    "`{}` was not found on PATH",
                    invocation.program
                )),
                _ => Error::Io(e),
            })?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Source of time for the poll loops.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time with real blocking sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time instantly.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    /// Creates a clock starting at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Advances virtual time without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        *lock(&self.elapsed) += duration;
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        *lock(&self.elapsed)
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *lock(&self.elapsed)
    }

    fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
        self.advance(duration);
    }
}

// A poisoned lock only means another test thread panicked; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything a component needs to touch the outside world.
#[derive(Clone)]
pub struct ExecContext {
    executor: Arc<dyn CommandExecutor>,
    clock: Arc<dyn Clock>,
    cwd: PathBuf,
    env: Vec<(String, String)>,
}

impl ExecContext {
    /// Creates a context from explicit collaborators.
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        clock: Arc<dyn Clock>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executor,
            clock,
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    /// Creates a context that runs real processes with real time.
    pub fn system(cwd: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(SystemExecutor), Arc::new(SystemClock), cwd)
    }

    /// Adds an environment variable passed to every invocation.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Working directory for every invocation.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// The injected clock.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Runs `program` with `args` in the context's directory.
    pub fn run<I, S>(&self, program: &str, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let invocation = Invocation {
            program: program.to_string(),
            args: args.into_iter().map(|a| a.as_ref().to_string()).collect(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
        };
        tracing::debug!(command = %invocation.command_line(), "exec");
        let output = self.executor.run(&invocation)?;
        if !output.success() {
            tracing::debug!(
                command = %invocation.command_line(),
                status = output.status,
                stderr = %output.stderr.trim(),
                "command exited non-zero"
            );
        }
        Ok(output)
    }
}

/// Selects invocations by program, leading arguments and contained arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    program: String,
    prefix: Vec<String>,
    contains: Vec<String>,
}

impl Matcher {
    /// Matches `program` whose arguments start with `prefix`.
    pub fn new<I, S>(program: &str, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            program: program.to_string(),
            prefix: prefix.into_iter().map(|s| s.as_ref().to_string()).collect(),
            contains: Vec::new(),
        }
    }

    /// Additionally requires `arg` to appear anywhere in the arguments.
    pub fn containing(mut self, arg: impl Into<String>) -> Self {
        self.contains.push(arg.into());
        self
    }

    /// Whether the invocation satisfies this matcher.
    pub fn matches(&self, invocation: &Invocation) -> bool {
        invocation.program == self.program
            && invocation.args.len() >= self.prefix.len()
            && invocation.args.iter().zip(&self.prefix).all(|(a, p)| a == p)
            && self.contains.iter().all(|c| invocation.has_arg(c))
    }
}

struct Rule {
    matcher: Matcher,
    responses: VecDeque<CommandOutput>,
}

/// Rule-based fake executor that records every call.
///
/// Rules added later take precedence over earlier ones. A rule with several
/// queued responses hands them out in order and then keeps repeating the last
/// one. Unmatched invocations succeed with empty output.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedExecutor {
    /// Creates an executor with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers matching invocations with `output`.
    pub fn respond(&self, matcher: Matcher, output: CommandOutput) -> &Self {
        self.respond_seq(matcher, vec![output])
    }

    /// Answers matching invocations with each of `outputs` in turn.
    pub fn respond_seq(&self, matcher: Matcher, outputs: Vec<CommandOutput>) -> &Self {
        lock(&self.rules).push(Rule {
            matcher,
            responses: outputs.into(),
        });
        self
    }

    /// All recorded invocations, in call order.
    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }

    /// Recorded invocations satisfying `matcher`.
    pub fn calls_matching(&self, matcher: &Matcher) -> Vec<Invocation> {
        lock(&self.calls)
            .iter()
            .filter(|c| matcher.matches(c))
            .cloned()
            .collect()
    }

    /// Number of recorded invocations satisfying `matcher`.
    pub fn count(&self, matcher: &Matcher) -> usize {
        self.calls_matching(matcher).len()
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        lock(&self.calls).push(invocation.clone());

        let mut rules = lock(&self.rules);
        let rule = rules
            .iter_mut()
            .rev()
            .find(|rule| rule.matcher.matches(invocation));

        let output = match rule {
            Some(rule) if rule.responses.len() > 1 => rule.responses.pop_front(),
            Some(rule) => rule.responses.front().cloned(),
            None => None,
        };
        Ok(output.unwrap_or_default())
    }
}
