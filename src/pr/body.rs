//! Deterministic PR descriptions.
//!
//! Precedence: explicit body text, then a body file, then the repository's
//! PR template with the generated block substituted or appended, then the
//! generated block on its own.

use std::collections::BTreeMap;
use std::path::Path;

use crate::changeset::Bump;
use crate::error::Result;

/// Marker in a PR template replaced by the generated block.
pub const GENERATED_MARKER: &str = "<!-- GENERATED_PR_BODY -->";

/// Template locations, searched in order.
pub const TEMPLATE_PATHS: &[&str] = &[
    ".github/pull_request_template.md",
    ".github/PULL_REQUEST_TEMPLATE.md",
    "PULL_REQUEST_TEMPLATE.md",
    "docs/pull_request_template.md",
];

/// Where the body text comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodySource {
    /// Literal body passed by the operator.
    pub text: Option<String>,
    /// File whose contents become the body.
    pub file: Option<std::path::PathBuf>,
}

/// Inputs of the generated block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyInputs {
    pub head: String,
    pub base: String,
    /// `(short hash, subject)` pairs, newest first.
    pub commits: Vec<(String, String)>,
    /// Highest pending bump per package.
    pub bumps: BTreeMap<String, Bump>,
}

/// Renders the generated block.
pub fn generated_block(inputs: &BodyInputs) -> String {
    let mut body = String::new();

    body.push_str("## Summary\n\n");
    body.push_str(&format!(
        "Merges `{}` into `{}`.\n\n",
        inputs.head, inputs.base
    ));

    body.push_str("## Changes\n\n");
    if inputs.commits.is_empty() {
        body.push_str("- No commits ahead of base.\n");
    } else {
        for (hash, subject) in &inputs.commits {
            body.push_str(&format!("- `{}` {}\n", hash, subject));
        }
    }
    body.push('\n');

    body.push_str("## Release Impact\n\n");
    if inputs.bumps.is_empty() {
        body.push_str("- No pending changesets; this PR does not trigger a release.\n");
    } else {
        for (package, bump) in &inputs.bumps {
            body.push_str(&format!("- `{}`: {}\n", package, bump));
        }
    }
    body.push('\n');

    body.push_str("## Validation\n\n");
    body.push_str("- CI status checks on this PR\n\n");

    body.push_str("## Checklist\n\n");
    body.push_str("- [ ] Changeset added for user-facing changes\n");
    body.push_str("- [ ] Tests cover the change\n");
    body.push_str("- [ ] Documentation updated if needed\n");

    body
}

/// Substitutes `block` into `template`, or appends it when there is no marker.
pub fn apply_template(template: &str, block: &str) -> String {
    if template.contains(GENERATED_MARKER) {
        template.replacen(GENERATED_MARKER, block.trim_end(), 1)
    } else {
        format!("{}\n\n{}", template.trim_end(), block)
    }
}

/// Reads the first PR template found under `root`.
pub fn find_template(root: &Path) -> Option<String> {
    TEMPLATE_PATHS
        .iter()
        .map(|p| root.join(p))
        .find(|p| p.is_file())
        .and_then(|p| std::fs::read_to_string(p).ok())
}

/// Produces the final PR body.
pub fn render_body(root: &Path, source: &BodySource, inputs: &BodyInputs) -> Result<String> {
    if let Some(text) = &source.text {
        return Ok(text.clone());
    }
    if let Some(file) = &source.file {
        let path = if file.is_absolute() {
            file.clone()
        } else {
            root.join(file)
        };
        return Ok(std::fs::read_to_string(path)?);
    }

    let block = generated_block(inputs);
    Ok(match find_template(root) {
        Some(template) => apply_template(&template, &block),
        None => block,
    })
}
