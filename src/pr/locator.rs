//! Discovery of bot-generated release PRs and promotion PRs.

use crate::error::{Error, Result};
use crate::exec::Clock;
use crate::github::{GitHub, PullRequestRef};
use crate::poll::{poll_until, Poll, PollConfig};

/// Head-branch prefix of release PRs opened by the changeset bot.
pub const RELEASE_PREFIX: &str = "changeset-release/";

/// Head-branch prefix of stable promotion PRs.
pub const PROMOTION_PREFIX: &str = "promote/stable-";

/// Open PRs whose head starts with `prefix` and, when given, whose base is `base`.
pub fn release_candidates<'p>(
    prs: &'p [PullRequestRef],
    prefix: &str,
    base: Option<&str>,
) -> Vec<&'p PullRequestRef> {
    prs.iter()
        .filter(|pr| pr.head_ref.starts_with(prefix))
        .filter(|pr| base.map_or(true, |b| pr.base_ref == b))
        .collect()
}

/// The unique release PR among `prs`, if any.
///
/// More than one candidate is an ambiguity and never resolved automatically.
pub fn unique_release_pr(
    prs: &[PullRequestRef],
    prefix: &str,
    base: Option<&str>,
) -> Result<Option<PullRequestRef>> {
    let candidates = release_candidates(prs, prefix, base);
    match candidates.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some((*only).clone())),
        many => Err(Error::Ambiguity(format!(
            "Multiple candidate release PRs detected for base {}: {}. Close the extra PRs and re-run",
            base.unwrap_or("(any)"),
            many.iter()
                .map(|pr| format!("#{} {} ({})", pr.number, pr.head_ref, pr.url))
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Highest-numbered open promotion PR; newer promotions supersede older ones.
pub fn latest_promotion_pr(prs: &[PullRequestRef], prefix: &str) -> Option<PullRequestRef> {
    prs.iter()
        .filter(|pr| pr.head_ref.starts_with(prefix))
        .max_by_key(|pr| pr.number)
        .cloned()
}

/// Polls the open PR list until the unique release PR for `base` appears.
pub fn wait_for_release_pr(
    github: &GitHub<'_>,
    clock: &dyn Clock,
    prefix: &str,
    base: &str,
    config: &PollConfig,
) -> Result<PullRequestRef> {
    let what = format!("release PR ({}*) targeting {}", prefix, base);
    let pr = poll_until(clock, &what, config, || {
        let prs = github.list_open_prs()?;
        Ok(match unique_release_pr(&prs, prefix, Some(base))? {
            Some(pr) => Poll::Ready(pr),
            None => Poll::Pending(format!(
                "no open PR with head {}* targeting {} among {} open PR(s)",
                prefix,
                base,
                prs.len()
            )),
        })
    })?;
    tracing::info!(pr = pr.number, url = %pr.url, head = %pr.head_ref, "found release PR");
    Ok(pr)
}

/// Polls the open PR list until a promotion PR appears.
pub fn wait_for_promotion_pr(
    github: &GitHub<'_>,
    clock: &dyn Clock,
    prefix: &str,
    config: &PollConfig,
) -> Result<PullRequestRef> {
    let what = format!("promotion PR ({}*)", prefix);
    let pr = poll_until(clock, &what, config, || {
        let prs = github.list_open_prs()?;
        Ok(match latest_promotion_pr(&prs, prefix) {
            Some(pr) => Poll::Ready(pr),
            None => Poll::Pending(format!("no open PR with head {}*", prefix)),
        })
    })?;
    tracing::info!(pr = pr.number, url = %pr.url, "found promotion PR");
    Ok(pr)
}
