/*!
 * Gitignore-style rules for excluding entries from the download manifest
 *
 * Rules are compiled once with the `ignore` crate's gitignore engine. Negated
 * rules (`!pattern`) are compiled after every positive rule, so a negation
 * always gets the final say over the positive rules it overlaps with, and
 * among negations the last matching one wins.
 */

use std::fs;
use std::path::{Component, Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, warn};

/// Compiled ignore rules
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    gitignore: Gitignore,
    project_root: PathBuf,
    source: Option<PathBuf>,
}

impl IgnoreMatcher {
    /// A matcher that ignores nothing
    pub fn empty(project_root: &Path) -> Self {
        Self {
            gitignore: Gitignore::empty(),
            project_root: project_root.to_path_buf(),
            source: None,
        }
    }

    /// Compile rules from raw ignore-file text.
    ///
    /// Invalid lines are skipped with a warning; they never fail the whole set.
    pub fn from_patterns(project_root: &Path, text: &str) -> Self {
        let mut positive = Vec::new();
        let mut negated = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim_end();
            if trimmed.trim_start().is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('!') {
                negated.push(trimmed);
            } else {
                positive.push(trimmed);
            }
        }

        let mut builder = GitignoreBuilder::new(project_root);
        for line in positive.iter().chain(negated.iter()) {
            if let Err(e) = builder.add_line(None, line) {
                warn!(pattern = %line, error = %e, "skipping invalid ignore pattern");
            }
        }

        let gitignore = match builder.build() {
            Ok(gi) => gi,
            Err(e) => {
                warn!(error = %e, "failed to build ignore rules, ignoring nothing");
                Gitignore::empty()
            }
        };

        debug!(
            positive = positive.len(),
            negated = negated.len(),
            "compiled ignore rules"
        );

        Self {
            gitignore,
            project_root: project_root.to_path_buf(),
            source: None,
        }
    }

    /// Load rules from `path`, anchoring `/`-prefixed patterns at `project_root`.
    ///
    /// A missing or unreadable file yields an empty matcher.
    pub fn load(path: &Path, project_root: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "ignore rules not readable, nothing will be ignored"
                );
                return Self::empty(project_root);
            }
        };

        let mut matcher = Self::from_patterns(project_root, &text);
        matcher.source = Some(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
        matcher
    }

    /// Root that anchored patterns are resolved against
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Canonical path of the rules file, if one was loaded
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Number of compiled rules
    pub fn len(&self) -> usize {
        self.gitignore.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gitignore.is_empty()
    }

    /// Whether `relative_path` matches a rule on its own, without looking at
    /// its parent directories.
    pub fn matches(&self, relative_path: &Path, is_dir: bool) -> bool {
        match self.relativize(relative_path) {
            Some(rel) => self.gitignore.matched(rel, is_dir).is_ignore(),
            None => false,
        }
    }

    /// Whether `relative_path` or any of its ancestor directories is ignored.
    ///
    /// Ancestors are checked top-down first: once a directory is excluded,
    /// nothing below it can be re-included.
    pub fn is_ignored(&self, relative_path: &Path, is_dir: bool) -> bool {
        let Some(rel) = self.relativize(relative_path) else {
            return false;
        };

        let mut ancestors: Vec<&Path> = rel
            .ancestors()
            .skip(1)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        ancestors.reverse();

        ancestors
            .into_iter()
            .any(|dir| self.gitignore.matched(dir, true).is_ignore())
            || self.gitignore.matched(rel, is_dir).is_ignore()
    }

    /// Turn the input into a root-free path below the project root.
    fn relativize<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        let rel = if path.has_root() {
            path.strip_prefix(&self.project_root).ok()?
        } else {
            path
        };
        let escapes = rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes || rel.as_os_str().is_empty() {
            None
        } else {
            Some(rel)
        }
    }
}

/// Load ignore rules with patterns anchored at the rules file's directory
pub fn load_ignore_rules(path: &Path) -> IgnoreMatcher {
    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    IgnoreMatcher::load(path, root)
}
