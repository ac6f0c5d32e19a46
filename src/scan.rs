//! Directory discovery for one-shot conversion and startup catch-up.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::Result;
use crate::notebook::has_notebook_extension;

/// Suffixes of files the device or editors write while a save is in progress
const TRANSIENT_SUFFIXES: &[&str] = &["~", ".tmp", ".swp", ".part"];

fn is_hidden(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// True for hidden files and in-progress write artifacts.
///
/// These never reach the classifier.
pub fn is_transient_artifact(path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return true;
    };
    if is_hidden(name) {
        return true;
    }
    let name = name.to_string_lossy();
    TRANSIENT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Discover every visible regular file under `root`.
///
/// Hidden directories are not descended into. With `recursive == false` only
/// the top level of `root` is listed. Entries are sorted by file name within
/// each directory.
pub fn discover_files(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("scan: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() || is_transient_artifact(entry.path()) {
            continue;
        }
        files.push(entry.into_path());
    }

    log::debug!("Discovered {} files in {}", files.len(), root.display());
    Ok(files)
}

/// Notebooks under a root sorted by whether their PDF is current.
#[derive(Debug, Default)]
pub struct StalenessClassification {
    /// No PDF exists yet
    pub new_files: Vec<PathBuf>,
    /// PDF exists but is older than the notebook
    pub modified_files: Vec<PathBuf>,
    /// PDF is at least as new as the notebook
    pub up_to_date: Vec<PathBuf>,
}

impl StalenessClassification {
    /// Files that need converting
    pub fn stale(self) -> Vec<PathBuf> {
        self.new_files.into_iter().chain(self.modified_files).collect()
    }
}

/// Classify notebook files by comparing the modification time of each
/// source with that of the PDF `destination_for` maps it to.
///
/// Non-notebook extensions are ignored. A file that cannot be resolved or
/// has vanished since discovery is skipped with a warning. Nothing is
/// persisted between runs.
pub fn classify_staleness<F>(files: &[PathBuf], destination_for: F) -> StalenessClassification
where
    F: Fn(&Path) -> Result<PathBuf>,
{
    let mut classification = StalenessClassification::default();

    for file in files.iter().filter(|f| has_notebook_extension(f)) {
        let destination = match destination_for(file) {
            Ok(destination) => destination,
            Err(e) => {
                log::warn!("catch-up: skipping {}: {}", file.display(), e);
                continue;
            }
        };
        let source_modified = match std::fs::metadata(file).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                log::warn!("catch-up: skipping {}: {}", file.display(), e);
                continue;
            }
        };

        match std::fs::metadata(&destination).and_then(|m| m.modified()) {
            Err(_) => classification.new_files.push(file.clone()),
            Ok(pdf_modified) if pdf_modified < source_modified => {
                classification.modified_files.push(file.clone())
            }
            Ok(_) => classification.up_to_date.push(file.clone()),
        }
    }

    classification
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::resolve;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_transient_artifacts() {
        assert!(is_transient_artifact(Path::new("/w/.page.rm")));
        assert!(is_transient_artifact(Path::new("/w/page.rm~")));
        assert!(is_transient_artifact(Path::new("/w/page.rm.tmp")));
        assert!(is_transient_artifact(Path::new("/w/.page.rm.swp")));
        assert!(is_transient_artifact(Path::new("/o/page.pdf.part")));
        assert!(!is_transient_artifact(Path::new("/w/page.rm")));
        assert!(!is_transient_artifact(Path::new("/w/abc.content")));
    }

    #[test]
    fn test_discover_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("uuid-1")).unwrap();
        fs::create_dir_all(root.join(".trash/uuid-2")).unwrap();
        fs::write(root.join("uuid-1.content"), "{}").unwrap();
        fs::write(root.join("uuid-1/0.rm"), b"x").unwrap();
        fs::write(root.join("uuid-1/1.rm"), b"x").unwrap();
        fs::write(root.join("uuid-1/1.rm.tmp"), b"x").unwrap();
        fs::write(root.join(".trash/uuid-2/0.rm"), b"x").unwrap();
        fs::write(root.join("scan.pdf"), b"%PDF").unwrap();

        let files = discover_files(root, true).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["scan.pdf", "uuid-1/0.rm", "uuid-1/1.rm", "uuid-1.content"]);
    }

    #[test]
    fn test_discover_files_flat() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("top.rm"), b"x").unwrap();
        fs::write(root.join("sub/nested.rm"), b"x").unwrap();

        let files = discover_files(root, false).unwrap();
        assert_eq!(files, vec![root.join("top.rm")]);
    }

    #[test]
    fn test_discover_files_empty() {
        let temp_dir = TempDir::new().unwrap();
        let files = discover_files(temp_dir.path(), true).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_classify_staleness() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("w");
        let out = temp_dir.path().join("o");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&out).unwrap();

        let now = SystemTime::now();
        let earlier = now - Duration::from_secs(3600);

        // never converted
        fs::write(root.join("new.rm"), b"x").unwrap();
        // converted before the last edit
        fs::write(root.join("edited.rm"), b"x").unwrap();
        fs::write(out.join("edited.pdf"), b"%PDF").unwrap();
        set_mtime(&out.join("edited.pdf"), earlier);
        set_mtime(&root.join("edited.rm"), now);
        // converted after the last edit
        fs::write(root.join("done.rm"), b"x").unwrap();
        fs::write(out.join("done.pdf"), b"%PDF").unwrap();
        set_mtime(&root.join("done.rm"), earlier);
        set_mtime(&out.join("done.pdf"), now);
        // not a notebook
        fs::write(root.join("scan.pdf"), b"%PDF").unwrap();

        let files = discover_files(&root, true).unwrap();
        let classification = classify_staleness(&files, |f| resolve(f, &root, &out));
        assert_eq!(classification.new_files, vec![root.join("new.rm")]);
        assert_eq!(classification.modified_files, vec![root.join("edited.rm")]);
        assert_eq!(classification.up_to_date, vec![root.join("done.rm")]);

        let stale = classification.stale();
        assert_eq!(stale.len(), 2);
    }

    #[test]
    fn test_classify_staleness_skips_vanished_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("w");
        let out = temp_dir.path().join("o");
        fs::create_dir_all(&root).unwrap();

        fs::write(root.join("a.rm"), b"x").unwrap();
        fs::write(root.join("gone.rm"), b"x").unwrap();
        fs::write(root.join("b.rm"), b"x").unwrap();
        let files = discover_files(&root, false).unwrap();
        assert_eq!(files.len(), 3);

        // Removed between discovery and classification
        fs::remove_file(root.join("gone.rm")).unwrap();

        let classification = classify_staleness(&files, |f| resolve(f, &root, &out));
        assert_eq!(classification.new_files, vec![root.join("a.rm"), root.join("b.rm")]);
        assert!(classification.modified_files.is_empty());
        assert!(classification.up_to_date.is_empty());
    }

    #[test]
    fn test_classify_staleness_skips_unresolvable_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("w");
        let elsewhere = temp_dir.path().join("elsewhere");
        let out = temp_dir.path().join("o");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&elsewhere).unwrap();
        fs::write(root.join("a.rm"), b"x").unwrap();
        fs::write(elsewhere.join("b.rm"), b"x").unwrap();

        let files = vec![elsewhere.join("b.rm"), root.join("a.rm")];
        let classification = classify_staleness(&files, |f| resolve(f, &root, &out));
        assert_eq!(classification.new_files, vec![root.join("a.rm")]);
    }
}
