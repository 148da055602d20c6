/*!
 * Directory scanning for the download manifest
 */

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, ResultExt};
use crate::ignore_rules::IgnoreMatcher;
use crate::types::{join_item_path, DownloadableItem};
use crate::ensure;

/// Counters collected during one scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    /// Number of file nodes emitted
    pub files: usize,
    /// Number of directory nodes emitted
    pub directories: usize,
    /// Sum of all emitted file sizes
    pub total_bytes: u64,
    /// Entries dropped by ignore rules
    pub ignored: usize,
}

/// Recursive scanner producing [`DownloadableItem`] trees
///
/// Entries are listed in file-name order. Symlinks are followed; a directory
/// whose canonical path is already one of its own ancestors is emitted with
/// no children.
pub struct Scanner {
    /// Compiled ignore rules
    matcher: Arc<IgnoreMatcher>,
    /// Directory that `/`-anchored rules are resolved against
    project_root: PathBuf,
    /// Maximum recursion depth (unbounded when `None`)
    max_depth: Option<usize>,
}

struct ScanContext<'a> {
    base: &'a Path,
    project_root: &'a Path,
    rules_file: Option<&'a Path>,
    ancestors: HashSet<PathBuf>,
    summary: ScanSummary,
}

impl Scanner {
    /// Create a scanner anchored at the matcher's project root
    pub fn new(matcher: Arc<IgnoreMatcher>) -> Self {
        let project_root = matcher.project_root().to_path_buf();
        Self {
            matcher,
            project_root,
            max_depth: None,
        }
    }

    /// Override the directory anchored patterns are resolved against
    pub fn with_project_root(mut self, project_root: impl Into<PathBuf>) -> Self {
        self.project_root = project_root.into();
        self
    }

    /// Limit how many directory levels below the scan root are expanded
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Scan `root`, producing node paths relative to `base`
    pub fn scan(&self, root: &Path, base: &Path) -> Result<Vec<DownloadableItem>> {
        self.scan_directory(root, base, 0).map(|(items, _)| items)
    }

    /// Scan `root` starting at `current_depth` and report what was seen
    pub fn scan_directory(
        &self,
        root: &Path,
        base: &Path,
        current_depth: usize,
    ) -> Result<(Vec<DownloadableItem>, ScanSummary)> {
        let root = fs::canonicalize(root)
            .with_context(|| format!("Cannot open scan root {}", root.display()))?;
        ensure!(
            root.is_dir(),
            Filesystem,
            "Scan root is not a directory: {}",
            root.display()
        );
        let base = fs::canonicalize(base)
            .with_context(|| format!("Cannot open scan base {}", base.display()))?;
        ensure!(
            root.starts_with(&base),
            InvalidInput,
            "Scan root {} is not inside {}",
            root.display(),
            base.display()
        );
        let project_root = fs::canonicalize(&self.project_root).unwrap_or_else(|_| base.clone());

        let root_rel = relative_item_path(&root, &base);

        let mut ctx = ScanContext {
            base: &base,
            project_root: &project_root,
            rules_file: self.matcher.source(),
            ancestors: HashSet::from([root.clone()]),
            summary: ScanSummary::default(),
        };

        let items = self.list_directory(&root, &root_rel, current_depth, &mut ctx);

        info!(
            root = %root.display(),
            files = ctx.summary.files,
            directories = ctx.summary.directories,
            bytes = ctx.summary.total_bytes,
            ignored = ctx.summary.ignored,
            "scan complete"
        );

        Ok((items, ctx.summary))
    }

    fn list_directory(
        &self,
        dir: &Path,
        dir_rel: &str,
        depth: usize,
        ctx: &mut ScanContext<'_>,
    ) -> Vec<DownloadableItem> {
        let mut items = Vec::new();

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let abs_path = entry.path();
            if ctx.rules_file.is_some_and(|rules| rules == abs_path) {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            let file_type = entry.file_type();
            let is_dir = file_type.is_dir();

            let rule_path = abs_path
                .strip_prefix(ctx.project_root)
                .or_else(|_| abs_path.strip_prefix(ctx.base))
                .unwrap_or(abs_path);
            if self.matcher.matches(rule_path, is_dir) {
                debug!(path = %rule_path.display(), "ignored");
                ctx.summary.ignored += 1;
                continue;
            }

            let item_path = join_item_path(dir_rel, &name);

            if is_dir {
                let children = if self.max_depth.map_or(true, |max| depth < max) {
                    self.descend(abs_path, &item_path, depth + 1, ctx)
                } else {
                    Vec::new()
                };
                ctx.summary.directories += 1;
                items.push(DownloadableItem::directory(name, item_path, children));
            } else if file_type.is_file() {
                match entry.metadata() {
                    Ok(metadata) => {
                        ctx.summary.files += 1;
                        ctx.summary.total_bytes += metadata.len();
                        items.push(DownloadableItem::file(name, item_path, metadata.len()));
                    }
                    Err(e) => {
                        warn!(path = %abs_path.display(), error = %e, "cannot stat file");
                    }
                }
            }
        }

        items
    }

    /// Recurse into `dir` unless it would close a symlink loop
    fn descend(
        &self,
        dir: &Path,
        dir_rel: &str,
        depth: usize,
        ctx: &mut ScanContext<'_>,
    ) -> Vec<DownloadableItem> {
        let canonical = match fs::canonicalize(dir) {
            Ok(path) => path,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot resolve directory");
                return Vec::new();
            }
        };

        if !ctx.ancestors.insert(canonical.clone()) {
            warn!(dir = %dir.display(), "symlink loop detected, not descending");
            return Vec::new();
        }
        let children = self.list_directory(dir, dir_rel, depth, ctx);
        ctx.ancestors.remove(&canonical);
        children
    }
}

/// Forward-slash path of `path` relative to `base`, empty for `base` itself
fn relative_item_path(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}
