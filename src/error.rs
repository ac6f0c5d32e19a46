use std::path::PathBuf;
use thiserror::Error;

/// Main error type for rmwatch
#[derive(Error, Debug)]
pub enum RmwatchError {
    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// OS watch subscription errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A configured watch root or input path is unusable
    #[error("Invalid watch root {}: {reason}", path.display())]
    WatchRootInvalid { path: PathBuf, reason: String },

    /// A notebook could not be classified
    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),

    /// Source path does not live under the root it was resolved against
    #[error("{} is outside watch root {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },

    /// The external converter is not installed or not on PATH
    #[error("'{tool}' not found — install it and try again")]
    BackendMissing { tool: String },

    /// The external converter ran but did not produce a usable PDF
    #[error("{tool} failed: {reason}")]
    BackendFailure { tool: String, reason: String },
}

/// Why a path could not be classified.
#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unrecognized header in {}", path.display())]
    UnrecognizedFormat { path: PathBuf },
}

impl ClassificationError {
    /// Vanished or inaccessible files, as opposed to bad content.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClassificationError::Unreadable { .. })
    }
}

/// Convenient Result type using RmwatchError
pub type Result<T> = std::result::Result<T, RmwatchError>;
