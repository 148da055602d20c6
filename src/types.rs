/*!
 * Core types for the download manifest
 */

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::{bail, ensure};

/// Kind of a manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// Regular file
    File,
    /// Directory containing other entries
    Directory,
}

/// A node in the download manifest
///
/// Trees produced by the scanner are never mutated; selection changes go
/// through [`DownloadableItem::with_selection`], which returns a new tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadableItem {
    /// Base name of the entry
    pub name: String,
    /// Path relative to the scan base, forward slashes
    pub path: String,
    /// File or directory
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Size in bytes (files only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Directory contents in listing order (directories only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<DownloadableItem>>,
    /// User selection
    #[serde(default)]
    pub is_selected: bool,
    /// Display flag; scanned trees omit ignored entries entirely
    #[serde(default)]
    pub is_ignored: bool,
}

impl DownloadableItem {
    /// Create a file node
    pub fn file(name: impl Into<String>, path: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            item_type: ItemType::File,
            size: Some(size),
            children: None,
            is_selected: false,
            is_ignored: false,
        }
    }

    /// Create a directory node
    pub fn directory(
        name: impl Into<String>,
        path: impl Into<String>,
        children: Vec<DownloadableItem>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            item_type: ItemType::Directory,
            size: None,
            children: Some(children),
            is_selected: false,
            is_ignored: false,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.item_type == ItemType::Directory
    }

    /// Children of a directory, empty for files
    pub fn children(&self) -> &[DownloadableItem] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// Byte size of a file, or the sum of all descendant files of a directory
    pub fn total_size(&self) -> u64 {
        match self.item_type {
            ItemType::File => self.size.unwrap_or(0),
            ItemType::Directory => self.children().iter().map(|c| c.total_size()).sum(),
        }
    }

    /// Return a copy of this subtree with `path` (and, for directories,
    /// every descendant) set to `selected`.
    pub fn with_selection(&self, path: &str, selected: bool) -> Self {
        if self.path == path {
            return self.with_all_selected(selected);
        }

        let mut node = self.clone();
        if let Some(children) = &self.children {
            if is_ancestor_path(&self.path, path) {
                node.children = Some(
                    children
                        .iter()
                        .map(|c| c.with_selection(path, selected))
                        .collect(),
                );
            }
        }
        node
    }

    fn with_all_selected(&self, selected: bool) -> Self {
        Self {
            is_selected: selected,
            children: self.children.as_ref().map(|children| {
                children
                    .iter()
                    .map(|c| c.with_all_selected(selected))
                    .collect()
            }),
            ..self.clone()
        }
    }

    /// All file nodes in this subtree, depth first
    pub fn files(&self) -> Vec<&DownloadableItem> {
        let mut out = Vec::new();
        self.collect_files(&mut out, false);
        out
    }

    /// File nodes in this subtree whose own selection flag is set
    pub fn selected_files(&self) -> Vec<&DownloadableItem> {
        let mut out = Vec::new();
        self.collect_files(&mut out, true);
        out
    }

    fn collect_files<'a>(&'a self, out: &mut Vec<&'a DownloadableItem>, only_selected: bool) {
        match self.item_type {
            ItemType::File => {
                if !only_selected || self.is_selected {
                    out.push(self);
                }
            }
            ItemType::Directory => {
                for child in self.children() {
                    child.collect_files(out, only_selected);
                }
            }
        }
    }

    /// Check the shape of an item received from a client.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), InvalidInput, "Item name must not be empty");
        validate_relative_path(&self.path)?;

        let expected_tail = self.path.rsplit('/').next().unwrap_or_default();
        ensure!(
            expected_tail == self.name,
            InvalidInput,
            "Item path '{}' does not end with its name '{}'",
            self.path,
            self.name
        );

        match self.item_type {
            ItemType::File => ensure!(
                self.children.is_none(),
                InvalidInput,
                "File '{}' must not have children",
                self.path
            ),
            ItemType::Directory => {
                ensure!(
                    self.size.is_none(),
                    InvalidInput,
                    "Directory '{}' must not carry a size",
                    self.path
                );
                for child in self.children() {
                    ensure!(
                        child.path == format!("{}/{}", self.path, child.name),
                        InvalidInput,
                        "Child '{}' is not located under '{}'",
                        child.path,
                        self.path
                    );
                    child.validate()?;
                }
            }
        }
        Ok(())
    }
}

/// Apply a selection change to a forest of root items
pub fn select_in(items: &[DownloadableItem], path: &str, selected: bool) -> Vec<DownloadableItem> {
    items
        .iter()
        .map(|item| item.with_selection(path, selected))
        .collect()
}

/// Join a parent path and a child name the way manifest paths are built
pub fn join_item_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn is_ancestor_path(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Reject anything that is not a plain forward-slash relative path
pub fn validate_relative_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!(InvalidInput, "Item path must not be empty");
    }
    if path.starts_with('/') || path.contains('\\') || path.contains('\0') {
        bail!(InvalidInput, "Invalid item path '{}'", path);
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." {
            bail!(InvalidInput, "Invalid item path '{}'", path);
        }
        if segment == ".." {
            bail!(Forbidden, "Path traversal is not allowed: '{}'", path);
        }
    }
    Ok(())
}
