//! Source discovery: expands an ingestion target into the current file set.
//!
//! A directory target is walked recursively with `walkdir`, filtered through
//! the configured include/exclude globs (plus built-in excludes for VCS and
//! build directories), and sorted by document id for deterministic ordering.
//! Files under the root that no include glob matches are returned as
//! skipped so the run can report them. A file-list target is taken as
//! given; the list defines the whole corpus for that run.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::DocsConfig;
use crate::error::{DocletError, Result};
use crate::models::SourceFile;

/// What an ingestion run should look at.
#[derive(Debug, Clone)]
pub enum IngestTarget {
    /// Every matching file under a root directory.
    Directory(PathBuf),
    /// An explicit list of files. Ids are the paths as given.
    Files(Vec<PathBuf>),
}

/// Result of expanding a target.
#[derive(Debug, Default)]
pub struct Scan {
    /// Sorted, de-duplicated source files.
    pub files: Vec<SourceFile>,
    /// Ids of files under a directory root that no include glob matched.
    pub skipped: Vec<String>,
}

/// Expand `target` into the current file set.
pub fn scan(target: &IngestTarget, docs: &DocsConfig) -> Result<Scan> {
    let mut scan = match target {
        IngestTarget::Directory(root) => scan_directory(root, docs)?,
        IngestTarget::Files(paths) => Scan {
            files: paths
                .iter()
                .map(|p| SourceFile {
                    id: path_to_id(p),
                    path: p.clone(),
                })
                .collect(),
            skipped: Vec::new(),
        },
    };

    scan.files.sort_by(|a, b| a.id.cmp(&b.id));
    scan.files.dedup_by(|a, b| a.id == b.id);
    scan.skipped.sort();
    Ok(scan)
}

fn scan_directory(root: &Path, docs: &DocsConfig) -> Result<Scan> {
    if !root.is_dir() {
        return Err(DocletError::load(root, "document root is not a directory"));
    }

    let include_set = build_globset(&docs.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(docs.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut scan = Scan::default();
    for entry in WalkDir::new(root).follow_links(docs.follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let id = path_to_id(relative);

        if exclude_set.is_match(&id) {
            continue;
        }
        if !include_set.is_match(&id) {
            tracing::debug!(document = %id, "no include glob matches; skipped");
            scan.skipped.push(id);
            continue;
        }

        scan.files.push(SourceFile {
            id,
            path: path.to_path_buf(),
        });
    }

    tracing::debug!(
        root = %root.display(),
        count = scan.files.len(),
        skipped = scan.skipped.len(),
        "scanned document root"
    );
    Ok(scan)
}

/// Document ids always use `/` separators regardless of platform.
fn path_to_id(path: &Path) -> String {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| match c {
            Component::RootDir => "".into(),
            other => other.as_os_str().to_string_lossy(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| DocletError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| DocletError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn directory_scan_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b.md", "b");
        write(tmp.path(), "a.txt", "a");
        write(tmp.path(), "nested/c.pdf", "c");
        write(tmp.path(), "image.png", "x");
        write(tmp.path(), ".git/config.txt", "x");
        write(tmp.path(), "drafts/skip.md", "x");

        let docs = DocsConfig {
            exclude_globs: vec!["drafts/**".into()],
            ..DocsConfig::default()
        };
        let scanned = scan(&IngestTarget::Directory(tmp.path().to_path_buf()), &docs).unwrap();
        let ids: Vec<_> = scanned.files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "b.md", "nested/c.pdf"]);
    }

    #[test]
    fn unmatched_files_are_reported_as_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.md", "a");
        write(tmp.path(), "notes.docx", "x");
        write(tmp.path(), "img/logo.png", "x");
        write(tmp.path(), "drafts/old.docx", "x");

        let docs = DocsConfig {
            exclude_globs: vec!["drafts/**".into()],
            ..DocsConfig::default()
        };
        let scanned = scan(&IngestTarget::Directory(tmp.path().to_path_buf()), &docs).unwrap();
        assert_eq!(scanned.files.len(), 1);
        // Excluded paths are silent.
        assert_eq!(scanned.skipped, vec!["img/logo.png", "notes.docx"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let target = IngestTarget::Directory(tmp.path().join("nope"));
        assert!(scan(&target, &DocsConfig::default()).is_err());
    }

    #[test]
    fn file_list_is_taken_as_given() {
        let target = IngestTarget::Files(vec![
            PathBuf::from("notes/b.md"),
            PathBuf::from("a.docx"),
            PathBuf::from("notes/b.md"),
        ]);
        let scanned = scan(&target, &DocsConfig::default()).unwrap();
        let ids: Vec<_> = scanned.files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a.docx", "notes/b.md"]);
        assert!(scanned.skipped.is_empty());
    }

    #[test]
    fn file_ids_keep_root_and_drop_dot() {
        assert_eq!(path_to_id(Path::new("/srv/docs/a.md")), "/srv/docs/a.md");
        assert_eq!(path_to_id(Path::new("./notes/b.md")), "notes/b.md");
    }
}
