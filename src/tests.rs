/*!
 * Tests for scanning and archiving
 */

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::archive::{build_archive, build_presentation_archive, bundle_presentation};
use crate::error::EduDropError;
use crate::ignore_rules::{load_ignore_rules, IgnoreMatcher};
use crate::scanner::Scanner;
use crate::types::{select_in, DownloadableItem};

fn write_file(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(content)
}

// Helper function to create a test directory structure
fn setup_test_directory() -> io::Result<tempfile::TempDir> {
    let temp_dir = tempdir()?;
    let root = temp_dir.path();

    write_file(&root.join("syllabus.md"), b"# Week 1\n")?;
    write_file(&root.join("slides/intro.pdf"), &[0u8, 1, 2, 3, 4, 5, 6])?;
    write_file(&root.join("slides/extra/notes.txt"), b"notes")?;
    write_file(&root.join("configs/vimrc"), b"set number\n")?;
    fs::create_dir(root.join("empty"))?;

    Ok(temp_dir)
}

fn no_rules(root: &Path) -> Arc<IgnoreMatcher> {
    Arc::new(IgnoreMatcher::empty(root))
}

fn scan_with_rules(root: &Path, rules: &str) -> Vec<DownloadableItem> {
    write_file(&root.join(".downloadignore"), rules.as_bytes()).unwrap();
    let matcher = Arc::new(load_ignore_rules(&root.join(".downloadignore")));
    Scanner::new(matcher).scan(root, root).unwrap()
}

fn all_paths(items: &[DownloadableItem]) -> Vec<String> {
    let mut out = Vec::new();
    fn walk(items: &[DownloadableItem], out: &mut Vec<String>) {
        for item in items {
            out.push(item.path.clone());
            walk(item.children(), out);
        }
    }
    walk(items, &mut out);
    out
}

fn unzip(bytes: Vec<u8>) -> BTreeMap<String, Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entries = BTreeMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        entries.insert(file.name().to_string(), content);
    }
    entries
}

#[test]
fn test_basic_scan() -> io::Result<()> {
    let temp_dir = setup_test_directory()?;
    let root = temp_dir.path();

    let items = Scanner::new(no_rules(root)).scan(root, root)?;

    let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["configs", "empty", "slides", "syllabus.md"]);

    let slides = &items[2];
    assert!(slides.is_dir());
    assert_eq!(slides.path, "slides");
    assert_eq!(slides.size, None);
    assert_eq!(slides.children()[0].path, "slides/extra");
    assert_eq!(slides.children()[0].children()[0].path, "slides/extra/notes.txt");
    assert_eq!(slides.children()[1].size, Some(7));
    assert_eq!(slides.total_size(), 12);

    // empty directories stay visible
    assert!(items[1].is_dir());
    assert_eq!(items[1].children, Some(vec![]));

    Ok(())
}

#[test]
fn test_size_sum_matches_filesystem() -> io::Result<()> {
    let temp_dir = setup_test_directory()?;
    let root = temp_dir.path();

    let items = Scanner::new(no_rules(root)).scan(root, root)?;
    let scanned: u64 = items.iter().map(|i| i.total_size()).sum();

    let on_disk: u64 = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.metadata().map(|m| m.len()).unwrap_or(0))
        .sum();

    assert_eq!(scanned, on_disk);
    Ok(())
}

#[test]
fn test_ignored_directory_scenario() -> io::Result<()> {
    let temp_dir = tempdir()?;
    let root = temp_dir.path();
    write_file(&root.join("a.txt"), b"hello world\n")?;
    write_file(&root.join("sub/b.txt"), b"12345")?;

    let items = scan_with_rules(root, "sub/\n");

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name, "a.txt");
    assert_eq!(items[0].size, Some(12));
    Ok(())
}

#[test]
fn test_anchored_pattern_only_excludes_root_entry() -> io::Result<()> {
    let temp_dir = tempdir()?;
    let root = temp_dir.path();
    write_file(&root.join("answers.txt"), b"42")?;
    write_file(&root.join("week1/answers.txt"), b"43")?;

    let paths = all_paths(&scan_with_rules(root, "/answers.txt\n"));

    assert!(!paths.contains(&"answers.txt".to_string()));
    assert!(paths.contains(&"week1/answers.txt".to_string()));
    Ok(())
}

#[test]
fn test_ignored_parent_hides_reincluded_children() -> io::Result<()> {
    let temp_dir = tempdir()?;
    let root = temp_dir.path();
    write_file(&root.join("private/keep.txt"), b"k")?;
    write_file(&root.join("private/deep/keep.txt"), b"k")?;
    write_file(&root.join("public.txt"), b"p")?;

    let paths = all_paths(&scan_with_rules(
        root,
        "# instructor material\nprivate/\n!private/keep.txt\n!**/keep.txt\n",
    ));

    assert_eq!(paths, vec!["public.txt".to_string()]);
    Ok(())
}

#[test]
fn test_glob_patterns_and_negation() -> io::Result<()> {
    let temp_dir = tempdir()?;
    let root = temp_dir.path();
    write_file(&root.join("a.log"), b"")?;
    write_file(&root.join("keep.log"), b"")?;
    write_file(&root.join("x/y/z.tmp"), b"")?;
    write_file(&root.join("x/y/z.txt"), b"")?;

    let paths = all_paths(&scan_with_rules(root, "!keep.log\n*.log\n**/*.tmp\n"));

    assert_eq!(paths, vec!["keep.log", "x", "x/y", "x/y/z.txt"]);
    Ok(())
}

#[test]
fn test_max_depth() -> io::Result<()> {
    let temp_dir = setup_test_directory()?;
    let root = temp_dir.path();

    let shallow = Scanner::new(no_rules(root))
        .with_max_depth(Some(0))
        .scan(root, root)?;
    let slides = shallow.iter().find(|i| i.name == "slides").unwrap();
    assert_eq!(slides.children, Some(vec![]));

    let one_level = Scanner::new(no_rules(root))
        .with_max_depth(Some(1))
        .scan(root, root)?;
    let slides = one_level.iter().find(|i| i.name == "slides").unwrap();
    let extra = &slides.children()[0];
    assert_eq!(extra.path, "slides/extra");
    assert!(extra.children().is_empty());
    assert_eq!(slides.children()[1].name, "intro.pdf");

    Ok(())
}

#[test]
fn test_subdirectory_scan_keeps_base_paths_and_root_anchor() -> io::Result<()> {
    let temp_dir = tempdir()?;
    let root = temp_dir.path();
    write_file(&root.join("top.txt"), b"t")?;
    write_file(&root.join("unit1/top.txt"), b"t")?;
    write_file(&root.join("unit1/lab.md"), b"lab")?;
    write_file(&root.join(".downloadignore"), b"/top.txt\n/unit1/lab.md\n")?;

    let matcher = Arc::new(load_ignore_rules(&root.join(".downloadignore")));
    let items = Scanner::new(matcher)
        .with_project_root(root)
        .scan(&root.join("unit1"), root)?;

    assert_eq!(all_paths(&items), vec!["unit1/top.txt".to_string()]);
    Ok(())
}

#[test]
fn test_missing_root_is_an_error() {
    let temp_dir = tempdir().unwrap();
    let missing = temp_dir.path().join("nope");
    let result = Scanner::new(no_rules(temp_dir.path())).scan(&missing, temp_dir.path());
    assert!(matches!(result, Err(EduDropError::Filesystem(_))));
}

#[cfg(unix)]
#[test]
fn test_symlink_loop_terminates() -> io::Result<()> {
    let temp_dir = tempdir()?;
    let root = temp_dir.path();
    write_file(&root.join("course/readme.md"), b"r")?;
    std::os::unix::fs::symlink(root.join("course"), root.join("course/again"))?;
    std::os::unix::fs::symlink(root, root.join("course/up"))?;

    let items = Scanner::new(no_rules(root)).scan(root, root)?;
    let paths = all_paths(&items);

    assert!(paths.contains(&"course/readme.md".to_string()));
    assert!(!paths.iter().any(|p| p.contains("again/again")));
    assert!(!paths.iter().any(|p| p.contains("up/course/up")));
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_yields_empty_children() -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = tempdir()?;
    let root = temp_dir.path();
    write_file(&root.join("locked/secret.txt"), b"s")?;
    write_file(&root.join("open.txt"), b"o")?;
    fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o000))?;

    // privileged users can read anyway; nothing to check then
    let readable = fs::read_dir(root.join("locked")).is_ok();
    let items = Scanner::new(no_rules(root)).scan(root, root);
    fs::set_permissions(root.join("locked"), fs::Permissions::from_mode(0o755))?;
    if readable {
        return Ok(());
    }

    let items = items?;
    let locked = items.iter().find(|i| i.name == "locked").unwrap();
    assert!(locked.children().is_empty());
    assert!(items.iter().any(|i| i.name == "open.txt"));
    Ok(())
}

#[test]
fn test_selection_propagation_survives_serialization() -> io::Result<()> {
    let temp_dir = setup_test_directory()?;
    let root = temp_dir.path();
    let items = Scanner::new(no_rules(root)).scan(root, root)?;

    let selected = select_in(&items, "slides", true);
    let json = serde_json::to_string(&selected)?;
    let decoded: Vec<DownloadableItem> = serde_json::from_str(&json)?;

    let slides = decoded.iter().find(|i| i.name == "slides").unwrap();
    let files = slides.files();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.is_selected));
    assert!(!decoded.iter().find(|i| i.name == "syllabus.md").unwrap().is_selected);

    // the scanned tree itself is untouched
    assert!(items.iter().all(|i| i.selected_files().is_empty()));
    Ok(())
}

#[test]
fn test_archive_round_trip() -> io::Result<()> {
    let temp_dir = setup_test_directory()?;
    let root = temp_dir.path();
    let items = Scanner::new(no_rules(root)).scan(root, root)?;

    let items = select_in(&items, "slides", true);
    let items = select_in(&items, "configs/vimrc", true);

    let bytes = build_archive(&items, root).unwrap();
    let entries = unzip(bytes);

    assert_eq!(entries.len(), 3);
    for path in ["slides/intro.pdf", "slides/extra/notes.txt", "configs/vimrc"] {
        assert_eq!(entries[path], fs::read(root.join(path))?, "content of {}", path);
    }
    assert!(!entries.keys().any(|k| k.ends_with('/')));
    Ok(())
}

#[test]
fn test_archive_requires_a_selection() -> io::Result<()> {
    let temp_dir = setup_test_directory()?;
    let root = temp_dir.path();
    let items = Scanner::new(no_rules(root)).scan(root, root)?;

    assert!(matches!(
        build_archive(&items, root),
        Err(EduDropError::NoFilesSelected)
    ));
    assert!(matches!(
        build_archive(&[], root),
        Err(EduDropError::NoFilesSelected)
    ));
    Ok(())
}

#[test]
fn test_archive_missing_base_is_filesystem_error() {
    let temp_dir = tempdir().unwrap();
    let mut file = DownloadableItem::file("a.txt", "a.txt", 1);
    file.is_selected = true;

    let result = build_archive(&[file], &temp_dir.path().join("gone"));
    assert!(matches!(result, Err(EduDropError::Filesystem(_))));
}

#[test]
fn test_archive_rejects_traversal() {
    let temp_dir = tempdir().unwrap();
    fs::create_dir(temp_dir.path().join("dl")).unwrap();
    write_file(&temp_dir.path().join("secret.txt"), b"s").unwrap();

    let mut file = DownloadableItem::file("secret.txt", "../secret.txt", 1);
    file.is_selected = true;

    let result = build_archive(&[file], &temp_dir.path().join("dl"));
    assert!(matches!(result, Err(EduDropError::Forbidden(_))));
}

#[test]
fn test_presentation_archive_tolerates_missing_asset() -> io::Result<()> {
    let temp_dir = tempdir()?;
    let assets = temp_dir.path().join("assets");
    write_file(&assets.join("logo.png"), &[137, 80, 78, 71])?;
    write_file(&assets.join("css/theme.css"), b"body{}")?;

    let html = r#"<html>
        <link href="assets/css/theme.css" rel="stylesheet">
        <img src="assets/logo.png"><img src="assets/logo.png">
        <img src="assets/missing.gif">
    </html>"#;

    let bytes = build_presentation_archive("lesson.html", html, &assets).unwrap();
    let entries = unzip(bytes);

    let names: Vec<_> = entries.keys().cloned().collect();
    assert_eq!(
        names,
        vec!["assets/css/theme.css", "assets/logo.png", "lesson.html"]
    );
    assert_eq!(entries["lesson.html"], html.as_bytes());
    assert_eq!(entries["assets/logo.png"], vec![137, 80, 78, 71]);
    Ok(())
}

#[test]
fn test_presentation_assets_cannot_escape() -> io::Result<()> {
    let temp_dir = tempdir()?;
    write_file(&temp_dir.path().join("secret.txt"), b"s")?;
    let assets = temp_dir.path().join("assets");
    fs::create_dir(&assets)?;

    let html = r#"<img src="assets/../secret.txt">"#;
    let entries = unzip(build_presentation_archive("p.html", html, &assets).unwrap());

    assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["p.html"]);
    Ok(())
}

#[test]
fn test_bundle_presentation_from_directory() -> io::Result<()> {
    let temp_dir = tempdir()?;
    let dir = temp_dir.path();
    write_file(&dir.join("week1.html"), br#"<img src="assets/a.png">"#)?;
    write_file(&dir.join("assets/a.png"), b"png")?;

    let entries = unzip(bundle_presentation(dir, "week1.html").unwrap());
    assert_eq!(entries.len(), 2);
    assert_eq!(entries["assets/a.png"], b"png");

    assert!(matches!(
        bundle_presentation(dir, "week2.html"),
        Err(EduDropError::NotFound(_))
    ));
    assert!(matches!(
        bundle_presentation(dir, "../week1.html"),
        Err(EduDropError::InvalidInput(_))
    ));
    Ok(())
}
