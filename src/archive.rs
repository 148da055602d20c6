/*!
 * ZIP packaging of download selections and HTML presentations
 *
 * Archives are assembled entirely in memory. Bulk archives mirror the
 * manifest paths; presentation archives hold the HTML document at the top
 * level plus every `assets/...` file it references.
 */

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use chrono::{DateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{EduDropError, Result, ResultExt};
use crate::paths::{resolve_within, validate_presentation_name};
use crate::types::DownloadableItem;
use crate::{bail, ensure};

/// Deflate level used for every entry
pub const COMPRESSION_LEVEL: i32 = 6;

/// Directory, relative to a presentation, that holds its assets
pub const ASSETS_DIR: &str = "assets";

/// `src="assets/..."` and `href='assets/...'` attribute values
static ASSET_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:src|href)\s*=\s*["']assets/([^"'?#]+)"#)
        .expect("asset reference pattern is valid")
});

fn entry_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
}

/// Build a ZIP of every selected file in `items`, read from below `base_path`.
///
/// Only each file's own `is_selected` flag is consulted; directory selection
/// has already been pushed down to the files by the time a tree gets here.
pub fn build_archive(items: &[DownloadableItem], base_path: &Path) -> Result<Vec<u8>> {
    let base_meta = fs::metadata(base_path)
        .with_context(|| format!("Cannot open download root {}", base_path.display()))?;
    ensure!(
        base_meta.is_dir(),
        Filesystem,
        "Download root is not a directory: {}",
        base_path.display()
    );

    let mut seen = HashSet::new();
    let selected: Vec<&DownloadableItem> = items
        .iter()
        .flat_map(|item| item.selected_files())
        .filter(|file| seen.insert(file.path.as_str()))
        .collect();

    if selected.is_empty() {
        return Err(EduDropError::NoFilesSelected);
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = entry_options();
    let mut total_bytes = 0u64;

    for file in &selected {
        let abs_path = resolve_within(base_path, &file.path)?;
        ensure!(abs_path.is_file(), InvalidInput, "Not a file: {}", file.path);

        let bytes = fs::read(&abs_path)?;
        total_bytes += bytes.len() as u64;

        zip.start_file(file.path.as_str(), options)?;
        zip.write_all(&bytes)?;
        debug!(path = %file.path, bytes = bytes.len(), "added to archive");
    }

    let buffer = zip.finish()?.into_inner();
    info!(
        files = selected.len(),
        input_bytes = total_bytes,
        archive_bytes = buffer.len(),
        "bulk archive built"
    );
    Ok(buffer)
}

/// Distinct asset paths (relative to `assets/`) referenced by `html`
pub fn extract_asset_refs(html: &str) -> BTreeSet<String> {
    ASSET_REF
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|path| !path.is_empty())
        .collect()
}

/// Build a ZIP holding `html` as `file_name` plus its referenced assets.
///
/// Assets that are missing or resolve outside `assets_dir` are skipped with a
/// warning; they never fail the archive.
pub fn build_presentation_archive(
    file_name: &str,
    html: &str,
    assets_dir: &Path,
) -> Result<Vec<u8>> {
    validate_presentation_name(file_name)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = entry_options();

    zip.start_file(file_name, options)?;
    zip.write_all(html.as_bytes())?;

    let refs = extract_asset_refs(html);
    let mut included = 0usize;

    for asset in &refs {
        let abs_path = match resolve_within(assets_dir, asset) {
            Ok(path) if path.is_file() => path,
            Ok(_) => {
                warn!(asset = %asset, "asset is not a regular file, skipping");
                continue;
            }
            Err(e) => {
                warn!(asset = %asset, error = %e, "asset unavailable, skipping");
                continue;
            }
        };

        match fs::read(&abs_path) {
            Ok(bytes) => {
                zip.start_file(format!("{}/{}", ASSETS_DIR, asset), options)?;
                zip.write_all(&bytes)?;
                included += 1;
            }
            Err(e) => warn!(asset = %asset, error = %e, "cannot read asset, skipping"),
        }
    }

    let buffer = zip.finish()?.into_inner();
    info!(
        presentation = %file_name,
        referenced = refs.len(),
        included,
        archive_bytes = buffer.len(),
        "presentation archive built"
    );
    Ok(buffer)
}

/// Locate `file_name` in `presentations_dir` and bundle it with its assets
pub fn bundle_presentation(presentations_dir: &Path, file_name: &str) -> Result<Vec<u8>> {
    validate_presentation_name(file_name)?;

    let html_path = match resolve_within(presentations_dir, file_name) {
        Ok(path) => path,
        Err(EduDropError::NotFound(_)) => bail!(NotFound, "Presentation not found"),
        Err(e) => return Err(e),
    };
    ensure!(html_path.is_file(), NotFound, "Presentation not found");

    let html = fs::read_to_string(&html_path)?;
    build_presentation_archive(file_name, &html, &presentations_dir.join(ASSETS_DIR))
}

/// File name offered for a bulk download made at `now`
pub fn bulk_archive_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("downloads-{}.zip", now.format("%Y%m%d-%H%M%S"))
}

/// File name offered for a presentation bundle (`intro.html` → `intro.zip`)
pub fn presentation_archive_name(file_name: &str) -> String {
    let stem = file_name.strip_suffix(".html").unwrap_or(file_name);
    format!("{}.zip", stem)
}
