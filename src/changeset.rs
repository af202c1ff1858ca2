//! Pending changeset metadata.
//!
//! A changeset is a markdown file under `.changeset/` whose YAML front matter
//! maps package names to a bump type, followed by a free-form summary.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Directory holding pending changesets, relative to the repository root.
pub const CHANGESET_DIR: &str = ".changeset";

/// Semver bump requested by a changeset. Ordered from smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bump {
    Patch,
    Minor,
    Major,
}

impl fmt::Display for Bump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bump::Patch => write!(f, "patch"),
            Bump::Minor => write!(f, "minor"),
            Bump::Major => write!(f, "major"),
        }
    }
}

/// One parsed changeset file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    /// File the changeset was read from.
    pub path: PathBuf,
    /// Package name to requested bump.
    pub releases: BTreeMap<String, Bump>,
    /// Summary text after the front matter.
    pub summary: String,
}

/// Splits `---\n<yaml>\n---\n<body>` into its two halves.
fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start_matches('\u{feff}');
    let rest = text.strip_prefix("---")?;
    let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

/// Parses the contents of a single changeset file.
pub fn parse_changeset(path: &Path, text: &str) -> Result<Changeset> {
    let (yaml, body) = split_front_matter(text).ok_or_else(|| {
        Error::Config(format!("{}: missing YAML front matter", path.display()))
    })?;
    let releases: BTreeMap<String, Bump> = if yaml.trim().is_empty() {
        BTreeMap::new()
    } else {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("{}: invalid front matter: {}", path.display(), e)))?
    };
    Ok(Changeset {
        path: path.to_path_buf(),
        releases,
        summary: body.trim().to_string(),
    })
}

/// Reads every pending changeset under `<root>/.changeset`.
///
/// A missing directory means there is nothing pending. Files are returned in
/// name order.
pub fn pending_changesets(root: &Path) -> Result<Vec<Changeset>> {
    let dir = root.join(CHANGESET_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().is_some_and(|ext| ext == "md")
                && !p
                    .file_name()
                    .is_some_and(|n| n.eq_ignore_ascii_case("README.md"))
        })
        .collect();
    paths.sort();

    let mut changesets = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(&path)?;
        match parse_changeset(&path, &text) {
            Ok(changeset) => changesets.push(changeset),
            Err(e) => tracing::warn!(path = ?path, error = %e, "ignoring unreadable changeset"),
        }
    }
    Ok(changesets)
}

/// Highest bump per package across all changesets.
pub fn package_bumps(changesets: &[Changeset]) -> BTreeMap<String, Bump> {
    let mut bumps: BTreeMap<String, Bump> = BTreeMap::new();
    for changeset in changesets {
        for (name, bump) in &changeset.releases {
            bumps
                .entry(name.clone())
                .and_modify(|b| *b = (*b).max(*bump))
                .or_insert(*bump);
        }
    }
    bumps
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_front_matter_and_summary() {
        let text = "---\n\"@scope/core\": minor\ncli: patch\n---\n\nAdd the thing.\n";
        let cs = parse_changeset(Path::new("a.md"), text).unwrap();
        assert_eq!(cs.releases.get("@scope/core"), Some(&Bump::Minor));
        assert_eq!(cs.releases.get("cli"), Some(&Bump::Patch));
        assert_eq!(cs.summary, "Add the thing.");
    }

    #[test]
    fn empty_front_matter_is_allowed() {
        let cs = parse_changeset(Path::new("e.md"), "---\n---\nnothing to release\n").unwrap();
        assert!(cs.releases.is_empty());
    }

    #[test]
    fn missing_front_matter_is_an_error() {
        assert!(parse_changeset(Path::new("x.md"), "just text").is_err());
    }

    #[test]
    fn highest_bump_wins_per_package() {
        let dir = TempDir::new().unwrap();
        let cs_dir = dir.path().join(CHANGESET_DIR);
        std::fs::create_dir(&cs_dir).unwrap();
        std::fs::write(cs_dir.join("a.md"), "---\npkg: patch\n---\nfix\n").unwrap();
        std::fs::write(cs_dir.join("b.md"), "---\npkg: major\nother: minor\n---\nbreak\n").unwrap();
        std::fs::write(cs_dir.join("README.md"), "# Changesets\n").unwrap();
        std::fs::write(cs_dir.join("config.json"), "{}").unwrap();

        let changesets = pending_changesets(dir.path()).unwrap();
        assert_eq!(changesets.len(), 2);

        let bumps = package_bumps(&changesets);
        assert_eq!(bumps.get("pkg"), Some(&Bump::Major));
        assert_eq!(bumps.get("other"), Some(&Bump::Minor));
    }

    #[test]
    fn missing_directory_means_nothing_pending() {
        let dir = TempDir::new().unwrap();
        assert!(pending_changesets(dir.path()).unwrap().is_empty());
    }
}
