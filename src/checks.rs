//! Status-check watching.

use crate::error::{Error, Result};
use crate::exec::Clock;
use crate::github::{CheckState, GitHub, PrState};
use crate::poll::{poll_until, Poll, PollConfig};

/// Decides whether a rollup is finished.
///
/// A single failing check ends the watch immediately. A PR that is already
/// merged needs no further waiting.
pub fn assess_checks(number: u64, url: &str, state: &CheckState) -> Result<Poll<()>> {
    if state.failed > 0 {
        return Err(Error::ChecksFailed {
            pr: number,
            url: url.to_string(),
            failed: state.failing.join(", "),
        });
    }
    if state.pending == 0 || state.pr_state == Some(PrState::Merged) {
        return Ok(Poll::Ready(()));
    }
    Ok(Poll::Pending(format!("PR #{} {}", number, state.describe())))
}

/// Polls the checks of PR `number` until all resolve or one fails.
pub fn watch_checks(
    github: &GitHub<'_>,
    clock: &dyn Clock,
    number: u64,
    url: &str,
    config: &PollConfig,
) -> Result<CheckState> {
    tracing::info!(pr = number, url = %url, "watching status checks");
    let what = format!("checks of PR #{}", number);
    let state = poll_until(clock, &what, config, || {
        let state = github.checks(number)?;
        Ok(match assess_checks(number, url, &state)? {
            Poll::Ready(()) => Poll::Ready(state),
            Poll::Pending(snapshot) => Poll::Pending(snapshot),
        })
    })?;
    tracing::info!(pr = number, total = state.total, "status checks passed");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::exec::{CommandOutput, ExecContext, ManualClock, Matcher, ScriptedExecutor};

    const URL: &str = "https://github.com/o/r/pull/7";

    fn rollup(entries: &str) -> CommandOutput {
        CommandOutput::ok(format!(
            r#"{{"statusCheckRollup":[{}],"url":"{}","number":7,"state":"OPEN"}}"#,
            entries, URL
        ))
    }

    fn setup() -> (Arc<ScriptedExecutor>, Arc<ManualClock>, ExecContext) {
        let exec = Arc::new(ScriptedExecutor::new());
        let clock = Arc::new(ManualClock::new());
        let ctx = ExecContext::new(exec.clone(), clock.clone(), "/repo");
        (exec, clock, ctx)
    }

    fn config() -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
            progress_interval: Duration::from_secs(30),
        }
    }

    #[test]
    fn waits_until_pending_checks_clear() {
        let (exec, clock, ctx) = setup();
        exec.respond_seq(
            Matcher::new("gh", ["pr", "view", "7"]).containing("statusCheckRollup,url,number,state"),
            vec![
                rollup(r#"{"name":"build","status":"IN_PROGRESS"}"#),
                rollup(r#"{"name":"build","status":"COMPLETED","conclusion":"SUCCESS"}"#),
            ],
        );
        let gh = GitHub::new(&ctx, "o/r");

        let state = watch_checks(&gh, clock.as_ref(), 7, URL, &config()).unwrap();
        assert_eq!(state.total, 1);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn failing_check_ends_watch_immediately() {
        let (exec, clock, ctx) = setup();
        exec.respond(
            Matcher::new("gh", ["pr", "view", "7"]),
            rollup(
                r#"{"name":"lint","status":"IN_PROGRESS"},{"name":"test","status":"COMPLETED","conclusion":"FAILURE"}"#,
            ),
        );
        let gh = GitHub::new(&ctx, "o/r");

        let err = watch_checks(&gh, clock.as_ref(), 7, URL, &config()).unwrap_err();
        match err {
            Error::ChecksFailed { pr, failed, .. } => {
                assert_eq!(pr, 7);
                assert_eq!(failed, "test");
            }
            other => panic!("unexpected: {other}"),
        }
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn checks_that_never_finish_time_out() {
        let (exec, clock, ctx) = setup();
        exec.respond(
            Matcher::new("gh", ["pr", "view", "7"]),
            rollup(r#"{"context":"ci/slow","state":"PENDING"}"#),
        );
        let gh = GitHub::new(&ctx, "o/r");

        let err = watch_checks(&gh, clock.as_ref(), 7, URL, &config()).unwrap_err();
        match err {
            Error::Timeout { snapshot, .. } => assert!(snapshot.contains("ci/slow")),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn merged_pr_needs_no_more_waiting() {
        let state = CheckState {
            pending: 1,
            total: 1,
            pr_state: Some(PrState::Merged),
            ..Default::default()
        };
        assert_eq!(assess_checks(1, URL, &state).unwrap(), Poll::Ready(()));
    }
}
