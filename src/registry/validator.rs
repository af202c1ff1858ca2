//! Post-merge registry validation.
//!
//! Targets come from the `package.json` files a release PR touched, read at
//! the track's base branch after the merge. Each poll re-queries the registry
//! for every target; all must pass in the same poll.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::exec::Clock;
use crate::github::GitHub;
use crate::poll::{poll_until, Poll, PollConfig};

use super::client::Npm;

/// Manifest consulted when a release PR changed no `package.json`.
pub const ROOT_MANIFEST: &str = "package.json";

/// A package and the version the release should have published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpmTarget {
    pub name: String,
    pub version: String,
}

/// What a successful publish must look like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Expectation {
    /// Distribution tag that must point at the expected version.
    pub tag: String,
    /// Whether the default published version must equal the expected one.
    pub require_version: bool,
}

/// One target's registry state in one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NpmObservation {
    pub name: String,
    pub expected_version: String,
    pub observed_version: Option<String>,
    pub tag: String,
    pub observed_tag_version: Option<String>,
    pub ok: bool,
}

impl NpmObservation {
    /// `name: expected X, observed version=Y tag[t]=Z` line.
    pub fn describe(&self) -> String {
        format!(
            "{} {}: expected {} (tag {}), observed version={} {}={}",
            if self.ok { "ok  " } else { "FAIL" },
            self.name,
            self.expected_version,
            self.tag,
            self.observed_version.as_deref().unwrap_or("(none)"),
            self.tag,
            self.observed_tag_version.as_deref().unwrap_or("(none)")
        )
    }
}

/// Compares one target with what the registry reports.
pub fn evaluate(
    target: &NpmTarget,
    published: Option<&str>,
    tags: &BTreeMap<String, String>,
    expectation: &Expectation,
) -> NpmObservation {
    let tag_version = tags.get(&expectation.tag).cloned();
    let tag_ok = tag_version.as_deref() == Some(target.version.as_str());
    let version_ok = !expectation.require_version || published == Some(target.version.as_str());
    NpmObservation {
        name: target.name.clone(),
        expected_version: target.version.clone(),
        observed_version: published.map(str::to_string),
        tag: expectation.tag.clone(),
        observed_tag_version: tag_version,
        ok: tag_ok && version_ok,
    }
}

fn diff(observations: &[NpmObservation]) -> String {
    observations
        .iter()
        .map(NpmObservation::describe)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Queries the registry once for every target.
pub fn observe(
    npm: &Npm<'_>,
    targets: &[NpmTarget],
    expectation: &Expectation,
) -> Result<Vec<NpmObservation>> {
    targets
        .iter()
        .map(|target| {
            let published = npm.published_version(&target.name)?;
            let tags = npm.dist_tags(&target.name)?;
            Ok(evaluate(target, published.as_deref(), &tags, expectation))
        })
        .collect()
}

/// Polls until every target passes; on deadline fails with the full diff.
pub fn validate_registry(
    npm: &Npm<'_>,
    clock: &dyn Clock,
    targets: &[NpmTarget],
    expectation: &Expectation,
    config: &PollConfig,
) -> Result<Vec<NpmObservation>> {
    tracing::info!(
        targets = targets.len(),
        tag = %expectation.tag,
        require_version = expectation.require_version,
        "validating registry state"
    );
    let result = poll_until(clock, "registry publish", config, || {
        let observations = observe(npm, targets, expectation)?;
        if observations.iter().all(|o| o.ok) {
            Ok(Poll::Ready(observations))
        } else {
            Ok(Poll::Pending(diff(&observations)))
        }
    });

    match result {
        Ok(observations) => {
            for o in &observations {
                tracing::info!(package = %o.name, version = %o.expected_version, tag = %o.tag, "registry state confirmed");
            }
            Ok(observations)
        }
        Err(Error::Timeout { seconds, snapshot, .. }) => Err(Error::ValidationMismatch(format!(
            "registry did not reach the expected state within {}s\n{}",
            seconds, snapshot
        ))),
        Err(other) => Err(other),
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    private: bool,
}

/// Extracts a target from manifest JSON; private or incomplete manifests yield `None`.
pub fn target_from_manifest(json: &str) -> Result<Option<NpmTarget>> {
    let manifest: Manifest = serde_json::from_str(json)
        .map_err(|e| Error::Registry(format!("invalid package.json: {}", e)))?;
    if manifest.private {
        return Ok(None);
    }
    Ok(match (manifest.name, manifest.version) {
        (Some(name), Some(version)) if !name.is_empty() && !version.is_empty() => {
            Some(NpmTarget { name, version })
        }
        _ => None,
    })
}

fn is_manifest(path: &str) -> bool {
    (path == ROOT_MANIFEST || path.ends_with("/package.json")) && !path.contains("node_modules/")
}

/// Resolves what the release PR should have published.
///
/// `allow_list`, when non-empty, restricts targets to those names; if that
/// leaves nothing the run fails rather than validating an empty set.
pub fn resolve_targets(
    github: &GitHub<'_>,
    release_pr: u64,
    base_ref: &str,
    allow_list: &[String],
) -> Result<Vec<NpmTarget>> {
    let mut manifests: Vec<String> = github
        .changed_files(release_pr)?
        .into_iter()
        .filter(|p| is_manifest(p))
        .collect();
    if manifests.is_empty() {
        manifests.push(ROOT_MANIFEST.to_string());
    }

    let mut targets: Vec<NpmTarget> = Vec::new();
    for path in &manifests {
        let content = match github.read_file(path, base_ref) {
            Ok(content) => content,
            Err(e) if path != ROOT_MANIFEST => {
                tracing::warn!(path = %path, error = %e, "skipping unreadable manifest");
                continue;
            }
            Err(e) => return Err(e),
        };
        match target_from_manifest(&content)? {
            Some(target) if !targets.iter().any(|t| t.name == target.name) => targets.push(target),
            Some(_) => {}
            None => tracing::debug!(path = %path, "manifest is private or unversioned"),
        }
    }

    if !allow_list.is_empty() {
        targets.retain(|t| allow_list.contains(&t.name));
        if targets.is_empty() {
            return Err(Error::ValidationMismatch(format!(
                "none of the allowed packages [{}] were released by PR #{}",
                allow_list.join(", "),
                release_pr
            )));
        }
    }

    if targets.is_empty() {
        return Err(Error::ValidationMismatch(format!(
            "no publishable package found in PR #{} (read at {})",
            release_pr, base_ref
        )));
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::exec::{CommandOutput, ExecContext, ManualClock, Matcher, ScriptedExecutor};
    use base64::Engine;

    fn target(version: &str) -> NpmTarget {
        NpmTarget {
            name: "@scope/pkg".to_string(),
            version: version.to_string(),
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn beta() -> Expectation {
        Expectation {
            tag: "beta".to_string(),
            require_version: false,
        }
    }

    fn stable() -> Expectation {
        Expectation {
            tag: "beta".to_string(),
            require_version: true,
        }
    }

    #[test]
    fn beta_track_ignores_default_version() {
        let obs = evaluate(
            &target("1.2.0-beta.3"),
            Some("1.1.0"),
            &tags(&[("beta", "1.2.0-beta.3")]),
            &beta(),
        );
        assert!(obs.ok);
    }

    #[test]
    fn stable_track_requires_version_equality() {
        let obs = evaluate(
            &target("1.2.0-beta.3"),
            Some("1.1.0"),
            &tags(&[("beta", "1.2.0-beta.3")]),
            &stable(),
        );
        assert!(!obs.ok);
        assert!(obs.describe().contains("observed version=1.1.0"));
    }

    #[test]
    fn tag_must_match_on_every_track() {
        let obs = evaluate(
            &target("2.0.0"),
            Some("2.0.0"),
            &tags(&[("latest", "1.9.0")]),
            &Expectation {
                tag: "latest".to_string(),
                require_version: true,
            },
        );
        assert!(!obs.ok);
    }

    fn encoded(json: &str) -> CommandOutput {
        let content = base64::engine::general_purpose::STANDARD.encode(json);
        CommandOutput::ok(format!("{{\"content\":\"{}\"}}", content))
    }

    fn setup() -> (Arc<ScriptedExecutor>, Arc<ManualClock>, ExecContext) {
        let exec = Arc::new(ScriptedExecutor::new());
        let clock = Arc::new(ManualClock::new());
        let ctx = ExecContext::new(exec.clone(), clock.clone(), "/repo");
        (exec, clock, ctx)
    }

    #[test]
    fn targets_fall_back_to_root_manifest() {
        let (exec, _clock, ctx) = setup();
        exec.respond(
            Matcher::new("gh", ["pr", "view", "101"]).containing("files"),
            CommandOutput::ok(r#"{"files":[{"path":"CHANGELOG.md"}]}"#),
        );
        exec.respond(
            Matcher::new("gh", ["api", "-X", "GET", "repos/o/r/contents/package.json?ref=release%2Fbeta"]),
            encoded(r#"{"name":"@scope/pkg","version":"1.2.3-beta.0"}"#),
        );
        let gh = GitHub::new(&ctx, "o/r");

        let targets = resolve_targets(&gh, 101, "release/beta", &[]).unwrap();
        assert_eq!(targets, vec![target("1.2.3-beta.0")]);
    }

    #[test]
    fn changed_manifests_skip_private_packages() {
        let (exec, _clock, ctx) = setup();
        exec.respond(
            Matcher::new("gh", ["pr", "view", "5"]),
            CommandOutput::ok(
                r#"{"files":[{"path":"packages/a/package.json"},{"path":"packages/b/package.json"},{"path":"packages/a/CHANGELOG.md"}]}"#,
            ),
        );
        exec.respond(
            Matcher::new("gh", ["api", "-X", "GET", "repos/o/r/contents/packages/a/package.json?ref=main"]),
            encoded(r#"{"name":"a","version":"1.0.0"}"#),
        );
        exec.respond(
            Matcher::new("gh", ["api", "-X", "GET", "repos/o/r/contents/packages/b/package.json?ref=main"]),
            encoded(r#"{"name":"b","version":"0.1.0","private":true}"#),
        );
        let gh = GitHub::new(&ctx, "o/r");

        let targets = resolve_targets(&gh, 5, "main", &[]).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "a");
    }

    #[test]
    fn allow_list_with_no_match_is_fatal() {
        let (exec, _clock, ctx) = setup();
        exec.respond(
            Matcher::new("gh", ["api"]),
            encoded(r#"{"name":"a","version":"1.0.0"}"#),
        );
        let gh = GitHub::new(&ctx, "o/r");
        let err = resolve_targets(&gh, 5, "main", &["other".to_string()]).unwrap_err();
        assert_eq!(err.class(), "validation-mismatch");
    }

    #[test]
    fn validation_polls_until_tag_moves() {
        let (exec, clock, ctx) = setup();
        exec.respond(
            Matcher::new("npm", ["view", "@scope/pkg", "version"]),
            CommandOutput::ok("\"1.1.0\""),
        );
        exec.respond_seq(
            Matcher::new("npm", ["view", "@scope/pkg", "dist-tags"]),
            vec![
                CommandOutput::ok(r#"{"beta":"1.2.0-beta.2"}"#),
                CommandOutput::ok(r#"{"beta":"1.2.0-beta.3"}"#),
            ],
        );
        let npm = Npm::new(&ctx);
        let config = PollConfig {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
            progress_interval: Duration::from_secs(30),
        };

        let obs = validate_registry(&npm, clock.as_ref(), &[target("1.2.0-beta.3")], &beta(), &config)
            .unwrap();
        assert!(obs[0].ok);
        assert_eq!(clock.sleeps().len(), 1);
    }

    #[test]
    fn validation_timeout_reports_full_diff() {
        let (exec, clock, ctx) = setup();
        exec.respond(
            Matcher::new("npm", ["view"]),
            CommandOutput::fail(1, "npm ERR! code E404"),
        );
        let npm = Npm::new(&ctx);
        let config = PollConfig {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            progress_interval: Duration::from_secs(30),
        };

        let err = validate_registry(&npm, clock.as_ref(), &[target("2.0.0")], &stable(), &config)
            .unwrap_err();
        match err {
            Error::ValidationMismatch(msg) => {
                assert!(msg.contains("@scope/pkg"));
                assert!(msg.contains("expected 2.0.0"));
                assert!(msg.contains("(none)"));
            }
            other => panic!("unexpected: {other}"),
        }
    }
}
