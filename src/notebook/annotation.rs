//! Detection of pages that annotate an imported PDF or ePub.
//!
//! Device sync layout:
//!
//! ```text
//! <root>/<uuid>.content      JSON, {"fileType": "pdf" | "epub" | "notebook" | "", ...}
//! <root>/<uuid>/<page>.rm    one file per page
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Document types whose pages are overlays on an existing document
const ANNOTATED_FILE_TYPES: &[&str] = &["pdf", "epub"];

#[derive(Debug, Deserialize)]
struct ContentFile {
    #[serde(rename = "fileType", default)]
    file_type: String,
}

/// The `.content` file describing the document a page belongs to.
pub fn content_file_for(page: &Path) -> Option<PathBuf> {
    let page_dir = page.parent()?;
    let uuid = page_dir.file_name()?;
    let mut name = uuid.to_os_string();
    name.push(".content");
    Some(page_dir.parent()?.join(name))
}

/// True when `content_json` describes an imported PDF or ePub.
///
/// Malformed JSON or a missing `fileType` counts as a notebook.
pub fn is_annotation_content(content_json: &str) -> bool {
    match serde_json::from_str::<ContentFile>(content_json) {
        Ok(content) => ANNOTATED_FILE_TYPES.contains(&content.file_type.as_str()),
        Err(_) => false,
    }
}

/// True when `page` is an annotation layer over a PDF or ePub.
///
/// Standalone pages without a readable `.content` sibling are notebooks, so
/// they are never silently dropped.
pub fn is_annotation_page(page: &Path) -> bool {
    let Some(content_file) = content_file_for(page) else {
        return false;
    };
    match std::fs::read_to_string(&content_file) {
        Ok(json) => is_annotation_content(&json),
        Err(_) => false,
    }
}
