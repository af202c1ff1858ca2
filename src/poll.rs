//! Bounded polling with a fixed wall-clock deadline.
//!
//! A poll loop is split into a step function that observes external state and
//! decides ([`Poll`]), and the loop in [`poll_until`] that owns sleeping,
//! deadline checks and progress throttling. Fatal conditions are returned as
//! `Err` from the step and end the loop immediately.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::exec::Clock;

/// Shortest sleep between two iterations.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    /// Terminal success.
    Ready(T),
    /// Not there yet; carries a diagnostic snapshot of what was observed.
    Pending(String),
}

/// Timing parameters for a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Sleep between iterations (clamped to the remaining time).
    pub interval: Duration,
    /// Total time allowed before failing with a timeout.
    pub timeout: Duration,
    /// Minimum spacing between progress log lines.
    pub progress_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30 * 60),
            progress_interval: Duration::from_secs(30),
        }
    }
}

impl PollConfig {
    /// Builds a config from a timeout expressed in (possibly fractional) minutes.
    pub fn from_minutes(minutes: f64, interval: Duration, progress_interval: Duration) -> Self {
        Self {
            interval,
            timeout: Duration::from_secs_f64((minutes * 60.0).max(0.0)),
            progress_interval,
        }
    }
}

/// Rate limiter for progress output.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    /// Creates a throttle that allows one emission per `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Returns true (and records the emission) if enough time has passed.
    pub fn should_emit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Computes the sleep before the next iteration.
pub fn next_sleep(interval: Duration, remaining: Duration) -> Duration {
    interval.min(remaining).max(MIN_POLL_INTERVAL)
}

/// Repeats `step` until it is ready, fails, or `config.timeout` elapses.
///
/// The deadline is `now + timeout`, computed once. The step always runs at
/// least once; afterwards the deadline is checked at the top of every
/// iteration. On timeout the error carries the last pending snapshot.
pub fn poll_until<T, F>(clock: &dyn Clock, what: &str, config: &PollConfig, mut step: F) -> Result<T>
where
    F: FnMut() -> Result<Poll<T>>,
{
    let started = clock.now();
    let deadline = started + config.timeout;
    let mut throttle = ProgressThrottle::new(config.progress_interval);
    let mut snapshot = String::new();
    let mut attempts: u32 = 0;

    loop {
        let now = clock.now();
        if attempts > 0 && now >= deadline {
            tracing::warn!(what = %what, attempts, "bounded wait timed out");
            return Err(Error::Timeout {
                what: what.to_string(),
                seconds: config.timeout.as_secs(),
                snapshot: if snapshot.is_empty() {
                    "(nothing observed)".to_string()
                } else {
                    snapshot
                },
            });
        }
        attempts += 1;

        match step()? {
            Poll::Ready(value) => {
                tracing::debug!(what = %what, attempts, "wait satisfied");
                return Ok(value);
            }
            Poll::Pending(observed) => {
                tracing::debug!(what = %what, attempt = attempts, state = %observed, "still waiting");
                let now = clock.now();
                if throttle.should_emit(now) {
                    tracing::info!(
                        what = %what,
                        elapsed_secs = now.saturating_duration_since(started).as_secs(),
                        state = %observed,
                        "waiting"
                    );
                }
                snapshot = observed;
                let remaining = deadline.saturating_duration_since(now);
                clock.sleep(next_sleep(config.interval, remaining));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ManualClock;

    fn config(interval: u64, timeout: u64) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(interval),
            timeout: Duration::from_secs(timeout),
            progress_interval: Duration::from_secs(30),
        }
    }

    #[test]
    fn returns_value_once_ready() {
        let clock = ManualClock::new();
        let mut calls = 0;
        let value = poll_until(&clock, "thing", &config(5, 60), || {
            calls += 1;
            Ok(if calls == 3 {
                Poll::Ready(calls)
            } else {
                Poll::Pending(format!("attempt {}", calls))
            })
        })
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn times_out_with_last_snapshot() {
        let clock = ManualClock::new();
        let mut calls = 0;
        let err = poll_until::<(), _>(&clock, "release PR", &config(10, 25), || {
            calls += 1;
            Ok(Poll::Pending(format!("seen {}", calls)))
        })
        .unwrap_err();

        match err {
            Error::Timeout { what, seconds, snapshot } => {
                assert_eq!(what, "release PR");
                assert_eq!(seconds, 25);
                assert_eq!(snapshot, "seen 3");
            }
            other => panic!("unexpected error: {other}"),
        }
        // 10 + 10 + 5 (clamped to remaining time)
        assert_eq!(clock.elapsed(), Duration::from_secs(25));
    }

    #[test]
    fn fatal_step_error_stops_immediately() {
        let clock = ManualClock::new();
        let mut calls = 0;
        let err = poll_until::<(), _>(&clock, "checks", &config(5, 60), || {
            calls += 1;
            Err(Error::Ambiguity("two PRs".to_string()))
        })
        .unwrap_err();

        assert!(matches!(err, Error::Ambiguity(_)));
        assert_eq!(calls, 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn zero_timeout_still_observes_once() {
        let clock = ManualClock::new();
        let value = poll_until(&clock, "x", &config(5, 0), || Ok(Poll::Ready(7))).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn sleep_never_drops_below_minimum() {
        assert_eq!(next_sleep(Duration::from_secs(10), Duration::ZERO), MIN_POLL_INTERVAL);
        assert_eq!(
            next_sleep(Duration::from_secs(10), Duration::from_secs(3)),
            Duration::from_secs(3)
        );
        assert_eq!(
            next_sleep(Duration::from_millis(10), Duration::from_secs(3)),
            MIN_POLL_INTERVAL
        );
    }

    #[test]
    fn progress_throttle_limits_emissions() {
        let clock = ManualClock::new();
        let mut throttle = ProgressThrottle::new(Duration::from_secs(30));

        assert!(throttle.should_emit(clock.now()));
        clock.advance(Duration::from_secs(10));
        assert!(!throttle.should_emit(clock.now()));
        clock.advance(Duration::from_secs(20));
        assert!(throttle.should_emit(clock.now()));
    }

    #[test]
    fn from_minutes_accepts_fractions() {
        let cfg = PollConfig::from_minutes(0.05, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(cfg.timeout, Duration::from_secs(3));
    }
}
