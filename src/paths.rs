/*!
 * Traversal-safe path resolution and content types
 */

use std::fs;
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::error::{EduDropError, Result};
use crate::{bail, ensure};

/// Extension to MIME type table for served files
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("html", "text/html; charset=utf-8"),
    ("css", "text/css; charset=utf-8"),
    ("js", "application/javascript; charset=utf-8"),
    ("json", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("pdf", "application/pdf"),
    ("txt", "text/plain; charset=utf-8"),
    ("md", "text/markdown; charset=utf-8"),
];

/// Fallback for unknown extensions
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type for `path`, chosen by extension (case-insensitive)
pub fn content_type_for(path: &Path) -> &'static str {
    let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()) else {
        return DEFAULT_CONTENT_TYPE;
    };
    CONTENT_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Check externally supplied path segments before they touch the filesystem.
///
/// A segment that is `..` (literally or as `%2e%2e`) is a traversal attempt.
pub fn validate_segments<S: AsRef<str>>(segments: &[S]) -> Result<()> {
    ensure!(!segments.is_empty(), InvalidInput, "Empty path");

    for segment in segments {
        let segment = segment.as_ref();
        let dots = segment.to_ascii_lowercase().replace("%2e", ".");
        if dots == ".." {
            bail!(Forbidden, "Forbidden");
        }
        if segment.is_empty()
            || segment == "."
            || segment.contains('\\')
            || segment.contains('\0')
            || segment.contains('/')
        {
            bail!(InvalidInput, "Invalid path segment");
        }
    }
    Ok(())
}

/// Percent-decode raw URL path segments.
///
/// Segments are checked both before and after decoding, so an encoded `/`,
/// `..` or NUL is refused like its literal form.
pub fn decode_segments<S: AsRef<str>>(raw: &[S]) -> Result<Vec<String>> {
    validate_segments(raw)?;

    let decoded = raw
        .iter()
        .map(|segment| {
            percent_decode_str(segment.as_ref())
                .decode_utf8()
                .map(|s| s.into_owned())
                .map_err(|_| EduDropError::InvalidInput("Path is not valid UTF-8".to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    validate_segments(&decoded)?;
    Ok(decoded)
}

/// Resolve `relative` below `base`, refusing anything that ends up outside.
///
/// Symlinks are resolved before the containment check, so a link pointing
/// out of `base` is refused as well.
pub fn resolve_within(base: &Path, relative: &str) -> Result<PathBuf> {
    let segments: Vec<&str> = relative.split('/').collect();
    validate_segments(&segments)?;

    let base = fs::canonicalize(base).map_err(|e| {
        EduDropError::Filesystem(format!("Cannot open {}: {}", base.display(), e))
    })?;

    let joined = segments.iter().fold(base.clone(), |acc, s| acc.join(s));
    let resolved = match fs::canonicalize(&joined) {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            bail!(NotFound, "File not found: {}", relative)
        }
        Err(e) => return Err(e.into()),
    };

    ensure!(resolved.starts_with(&base), Forbidden, "Forbidden");
    Ok(resolved)
}

/// Validate the file name of a presentation request
pub fn validate_presentation_name(name: &str) -> Result<()> {
    ensure!(
        !name.is_empty() && name.ends_with(".html"),
        InvalidInput,
        "Invalid filename: must end with .html"
    );
    ensure!(
        !name.contains('/') && !name.contains('\\') && !name.contains('\0'),
        InvalidInput,
        "Invalid filename"
    );
    ensure!(name.len() > ".html".len(), InvalidInput, "Invalid filename");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a/index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type_for(Path::new("photo.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("notes.md")), "text/markdown; charset=utf-8");
        assert_eq!(content_type_for(Path::new("archive.tar.gz")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(Path::new("Makefile")), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_segments_reject_traversal() {
        assert!(matches!(
            validate_segments(&["docs", "..", "secret"]),
            Err(EduDropError::Forbidden(_))
        ));
        assert!(matches!(
            validate_segments(&["%2E%2e", "etc"]),
            Err(EduDropError::Forbidden(_))
        ));
        assert!(validate_segments::<&str>(&[]).is_err());
        assert!(validate_segments(&["a\\b"]).is_err());
        assert!(validate_segments(&["docs", "guide.pdf"]).is_ok());
    }

    #[test]
    fn test_segments_allow_dots_and_colons_inside_names() {
        assert!(validate_segments(&["notes..v2.pdf"]).is_ok());
        assert!(validate_segments(&["12:30-slides.pdf"]).is_ok());
        assert!(validate_segments(&["...", "a..b"]).is_ok());
        assert!(validate_segments(&["docs", "."]).is_err());
    }

    #[test]
    fn test_decode_segments() {
        assert_eq!(
            decode_segments(&["week%201.txt"]).unwrap(),
            vec!["week 1.txt".to_string()]
        );
        assert_eq!(
            decode_segments(&["cours%20%C3%A9l%C3%A8ve.pdf"]).unwrap(),
            vec!["cours élève.pdf".to_string()]
        );
        assert!(matches!(
            decode_segments(&["%2E%2E", "secret.txt"]),
            Err(EduDropError::Forbidden(_))
        ));
        assert!(matches!(
            decode_segments(&["..%2Fsecret.txt"]),
            Err(EduDropError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_segments(&["a%00b"]),
            Err(EduDropError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_segments(&["bad%FF.txt"]),
            Err(EduDropError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_resolve_within() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        File::create(dir.path().join("docs/guide.txt")).unwrap();

        let resolved = resolve_within(dir.path(), "docs/guide.txt").unwrap();
        assert!(resolved.ends_with("docs/guide.txt"));

        assert!(matches!(
            resolve_within(dir.path(), "docs/missing.txt"),
            Err(EduDropError::NotFound(_))
        ));
        assert!(matches!(
            resolve_within(dir.path(), "docs/../../etc/passwd"),
            Err(EduDropError::Forbidden(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_within_rejects_escaping_symlink() {
        let outside = tempdir().unwrap();
        File::create(outside.path().join("secret.txt")).unwrap();
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        assert!(matches!(
            resolve_within(dir.path(), "link/secret.txt"),
            Err(EduDropError::Forbidden(_))
        ));
    }

    #[test]
    fn test_presentation_names() {
        assert!(validate_presentation_name("intro.html").is_ok());
        assert!(validate_presentation_name("intro.htm").is_err());
        assert!(validate_presentation_name("../intro.html").is_err());
        assert!(validate_presentation_name("week..2.html").is_ok());
        assert!(validate_presentation_name("sub/intro.html").is_err());
        assert!(validate_presentation_name(".html").is_err());
        assert!(validate_presentation_name("").is_err());
    }
}
