//! Destination paths for converted notebooks.

use std::path::{Path, PathBuf};

use crate::error::{Result, RmwatchError};

/// Extension of every produced file
pub const PDF_EXTENSION: &str = "pdf";

/// Map `source` (under `watch_root`) to its PDF under `output_root`.
///
/// The subpath below the watch root is mirrored under the output root and
/// the extension is replaced with `.pdf`. Pure path arithmetic, no I/O.
pub fn resolve(source: &Path, watch_root: &Path, output_root: &Path) -> Result<PathBuf> {
    let relative = source
        .strip_prefix(watch_root)
        .ok()
        .filter(|r| r.file_name().is_some())
        .ok_or_else(|| RmwatchError::OutsideRoot {
            path: source.to_path_buf(),
            root: watch_root.to_path_buf(),
        })?;

    Ok(output_root.join(relative).with_extension(PDF_EXTENSION))
}
