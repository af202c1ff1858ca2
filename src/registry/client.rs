//! Package-registry queries through the `npm` CLI.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::exec::{CommandOutput, ExecContext};

/// Read-only `npm view` wrapper.
pub struct Npm<'a> {
    ctx: &'a ExecContext,
}

fn is_not_found(output: &CommandOutput) -> bool {
    let text = format!("{}\n{}", output.stderr, output.stdout);
    text.contains("E404") || text.contains("404 Not Found")
}

impl<'a> Npm<'a> {
    pub fn new(ctx: &'a ExecContext) -> Self {
        Self { ctx }
    }

    /// Verifies `npm` is installed.
    pub fn preflight(&self) -> Result<()> {
        let output = self.ctx.run("npm", ["--version"])?;
        if !output.success() {
            return Err(Error::Preflight(format!(
                "npm is not available: {}",
                output.diagnostic()
            )));
        }
        Ok(())
    }

    fn view(&self, name: &str, field: &str) -> Result<Option<String>> {
        let output = self.ctx.run("npm", ["view", name, field, "--json"])?;
        if !output.success() {
            if is_not_found(&output) {
                tracing::debug!(package = %name, "package not found in registry");
                return Ok(None);
            }
            return Err(Error::Registry(format!(
                "npm view {} {} failed: {}",
                name,
                field,
                output.diagnostic()
            )));
        }
        let text = output.stdout_trimmed();
        Ok(if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        })
    }

    /// Currently published default version; `None` when nothing is published.
    pub fn published_version(&self, name: &str) -> Result<Option<String>> {
        match self.view(name, "version")? {
            Some(json) => parse_version(&json),
            None => Ok(None),
        }
    }

    /// Distribution tag to version map; empty when nothing is published.
    pub fn dist_tags(&self, name: &str) -> Result<BTreeMap<String, String>> {
        match self.view(name, "dist-tags")? {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                Error::Registry(format!("unexpected dist-tags for {}: {}", name, e))
            }),
            None => Ok(BTreeMap::new()),
        }
    }
}

/// `npm view <pkg> version --json` prints a JSON string (or an array when a
/// range matched several versions; the last one is the newest).
pub fn parse_version(json: &str) -> Result<Option<String>> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| Error::Registry(format!("unexpected version output {:?}: {}", json, e)))?;
    Ok(match value {
        serde_json::Value::String(v) => Some(v),
        serde_json::Value::Array(items) => items
            .into_iter()
            .rev()
            .find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::exec::{ManualClock, Matcher, ScriptedExecutor};

    fn ctx(exec: Arc<ScriptedExecutor>) -> ExecContext {
        ExecContext::new(exec, Arc::new(ManualClock::new()), "/repo")
    }

    #[test]
    fn reads_version_and_tags() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond(
            Matcher::new("npm", ["view", "pkg", "version"]),
            CommandOutput::ok("\"1.2.3\"\n"),
        );
        exec.respond(
            Matcher::new("npm", ["view", "pkg", "dist-tags"]),
            CommandOutput::ok("{\"latest\":\"1.2.3\",\"beta\":\"1.3.0-beta.1\"}\n"),
        );
        let ctx = ctx(exec);
        let npm = Npm::new(&ctx);

        assert_eq!(npm.published_version("pkg").unwrap().as_deref(), Some("1.2.3"));
        let tags = npm.dist_tags("pkg").unwrap();
        assert_eq!(tags.get("beta").map(String::as_str), Some("1.3.0-beta.1"));
    }

    #[test]
    fn unpublished_package_is_an_observation_not_an_error() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond(
            Matcher::new("npm", ["view"]),
            CommandOutput::fail(1, "npm ERR! code E404\nnpm ERR! 404 Not Found - GET https://registry.npmjs.org/new-pkg"),
        );
        let ctx = ctx(exec);
        let npm = Npm::new(&ctx);

        assert_eq!(npm.published_version("new-pkg").unwrap(), None);
        assert!(npm.dist_tags("new-pkg").unwrap().is_empty());
    }

    #[test]
    fn other_failures_are_registry_errors() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond(
            Matcher::new("npm", ["view"]),
            CommandOutput::fail(1, "npm ERR! code ETIMEDOUT"),
        );
        let ctx = ctx(exec);
        let err = Npm::new(&ctx).published_version("pkg").unwrap_err();
        assert_eq!(err.class(), "registry");
    }

    #[test]
    fn version_array_takes_newest() {
        assert_eq!(
            parse_version(r#"["1.0.0","1.1.0"]"#).unwrap().as_deref(),
            Some("1.1.0")
        );
    }
}
