//! Notebook classification: decides whether a path is a convertible notebook
//! page and which backend generation it needs.
//!
//! Classification is recomputed from the current file bytes on every call;
//! nothing is cached, so a page that changes format between writes is simply
//! reclassified.

pub mod annotation;
pub mod header;

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::ClassificationError;

pub use annotation::is_annotation_page;
pub use header::parse_version;

/// Extension of device notebook pages
pub const NOTEBOOK_EXTENSION: &str = "rm";

/// On-disk notebook generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatVersion {
    V6Plus,
    PreV6,
    NotANotebook,
}

impl FormatVersion {
    fn from_header_version(version: u32) -> Self {
        if version >= header::V6 {
            FormatVersion::V6Plus
        } else {
            FormatVersion::PreV6
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FormatVersion::V6Plus => "v6+",
            FormatVersion::PreV6 => "pre-v6",
            FormatVersion::NotANotebook => "not a notebook",
        };
        f.write_str(label)
    }
}

/// A classified path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookFile {
    pub path: PathBuf,
    pub format: FormatVersion,
    /// Version number from the header, when one was read
    pub version: Option<u32>,
}

impl NotebookFile {
    pub fn not_a_notebook(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            format: FormatVersion::NotANotebook,
            version: None,
        }
    }

    pub fn is_convertible(&self) -> bool {
        self.format != FormatVersion::NotANotebook
    }

    /// Short tag for log lines, e.g. `[v6]`
    pub fn tag(&self) -> String {
        match self.version {
            Some(v) => format!("[v{}]", v),
            None => format!("[{}]", self.format),
        }
    }

    /// File name for log lines
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// True when the path carries the notebook extension
pub fn has_notebook_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == NOTEBOOK_EXTENSION)
        .unwrap_or(false)
}

/// Classify `path`.
///
/// - wrong extension, or a page annotating an imported PDF/ePub → `NotANotebook`
/// - otherwise the header decides `V6Plus` vs `PreV6`
///
/// Fails only when the file cannot be read or its header is unrecognized.
pub fn classify(path: &Path) -> std::result::Result<NotebookFile, ClassificationError> {
    if !has_notebook_extension(path) || is_annotation_page(path) {
        return Ok(NotebookFile::not_a_notebook(path));
    }

    let header = read_header(path).map_err(|source| ClassificationError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let version = parse_version(&header).ok_or_else(|| ClassificationError::UnrecognizedFormat {
        path: path.to_path_buf(),
    })?;

    Ok(NotebookFile {
        path: path.to_path_buf(),
        format: FormatVersion::from_header_version(version),
        version: Some(version),
    })
}

fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(header::HEADER_LEN);
    File::open(path)?
        .take(header::HEADER_LEN as u64)
        .read_to_end(&mut header)?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Write a minimal synthetic page with the given header version.
    fn write_rm(path: &Path, version: u32) -> PathBuf {
        let mut bytes = header::HEADER_PREFIX.to_vec();
        bytes.extend_from_slice(version.to_string().as_bytes());
        bytes.extend_from_slice(b"          \n");
        bytes.extend_from_slice(&[0u8; 16]);
        fs::write(path, bytes).unwrap();
        path.to_path_buf()
    }

    #[test]
    fn test_v6_and_legacy() {
        let temp = TempDir::new().unwrap();
        let v6 = classify(&write_rm(&temp.path().join("page.rm"), 6)).unwrap();
        assert_eq!(v6.format, FormatVersion::V6Plus);
        assert_eq!(v6.version, Some(6));
        assert_eq!(v6.tag(), "[v6]");

        let v5 = classify(&write_rm(&temp.path().join("old.rm"), 5)).unwrap();
        assert_eq!(v5.format, FormatVersion::PreV6);

        let v3 = classify(&write_rm(&temp.path().join("older.rm"), 3)).unwrap();
        assert_eq!(v3.format, FormatVersion::PreV6);
    }

    #[test]
    fn test_other_extensions_not_notebooks() {
        let temp = TempDir::new().unwrap();
        let pdf = temp.path().join("scan.pdf");
        fs::write(&pdf, b"%PDF-1.7").unwrap();
        let notebook = classify(&pdf).unwrap();
        assert_eq!(notebook.format, FormatVersion::NotANotebook);
        assert!(!notebook.is_convertible());

        // Header is irrelevant when the extension is wrong
        let disguised = write_rm(&temp.path().join("page.txt"), 6);
        assert_eq!(classify(&disguised).unwrap().format, FormatVersion::NotANotebook);
    }

    #[test]
    fn test_annotation_pages_not_notebooks() {
        let temp = TempDir::new().unwrap();
        let page_dir = temp.path().join("abc123");
        fs::create_dir_all(&page_dir).unwrap();
        let page = write_rm(&page_dir.join("page.rm"), 6);
        fs::write(temp.path().join("abc123.content"), r#"{"fileType": "pdf"}"#).unwrap();

        assert_eq!(classify(&page).unwrap().format, FormatVersion::NotANotebook);
    }

    #[test]
    fn test_unrecognized_header() {
        let temp = TempDir::new().unwrap();
        let garbage = temp.path().join("page.rm");
        fs::write(&garbage, b"garbage").unwrap();
        let err = classify(&garbage).unwrap_err();
        assert!(matches!(err, ClassificationError::UnrecognizedFormat { .. }));

        let empty = temp.path().join("empty.rm");
        fs::write(&empty, b"").unwrap();
        assert!(classify(&empty).is_err());
    }

    #[test]
    fn test_missing_file_is_transient() {
        let temp = TempDir::new().unwrap();
        let err = classify(&temp.path().join("ghost.rm")).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_reclassifies_after_format_change() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("page.rm");
        write_rm(&path, 5);
        assert_eq!(classify(&path).unwrap().format, FormatVersion::PreV6);
        write_rm(&path, 6);
        assert_eq!(classify(&path).unwrap().format, FormatVersion::V6Plus);
    }

    #[test]
    fn test_extension_match() {
        assert!(has_notebook_extension(Path::new("/w/page.rm")));
        // Case-sensitive so that page.rm and page.RM never share a destination
        assert!(!has_notebook_extension(Path::new("/w/page.RM")));
        assert!(!has_notebook_extension(Path::new("/w/page.rmx")));
        assert!(!has_notebook_extension(Path::new("/w/rm")));
    }
}
