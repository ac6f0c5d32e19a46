//! Conversion dispatch: picks the backend for a classified notebook, runs it
//! in a private staging directory and installs the PDF at its destination.

pub mod backend;
pub mod fingerprint;
pub mod output;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{ClassificationError, Result, RmwatchError};
use crate::notebook::{FormatVersion, NotebookFile};

pub use backend::{Backend, CommandBackend};
pub use fingerprint::compute_file_hash;
pub use output::resolve;

/// The unit handed to a backend: one notebook, one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub source: NotebookFile,
    pub destination: PathBuf,
}

/// How a single dispatch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// PDF written at the destination
    Converted,
    /// Not a notebook (wrong extension, PDF/ePub annotation); no backend invoked
    SkippedUnsupported,
    /// Backend output was a blank page; destination untouched
    SkippedBlank,
    /// Same bytes as the last successful conversion; no backend invoked
    Unchanged,
    /// Classification failed; job dropped
    Dropped,
    /// Required converter is not installed
    BackendMissing,
    /// Converter ran but failed or produced nothing
    BackendFailure,
}

impl fmt::Display for ConversionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConversionOutcome::Converted => "converted",
            ConversionOutcome::SkippedUnsupported => "skipped (unsupported)",
            ConversionOutcome::SkippedBlank => "skipped (blank)",
            ConversionOutcome::Unchanged => "unchanged",
            ConversionOutcome::Dropped => "dropped",
            ConversionOutcome::BackendMissing => "backend missing",
            ConversionOutcome::BackendFailure => "backend failure",
        };
        f.write_str(label)
    }
}

/// Result of one dispatch, reported to the caller and the log
#[derive(Debug)]
pub struct ConversionResult {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub notebook: Option<NotebookFile>,
    pub outcome: ConversionOutcome,
    pub error: Option<RmwatchError>,
}

impl ConversionResult {
    fn for_job(job: &ConversionJob, outcome: ConversionOutcome, error: Option<RmwatchError>) -> Self {
        Self {
            source: job.source.path.clone(),
            destination: Some(job.destination.clone()),
            notebook: Some(job.source.clone()),
            outcome,
            error,
        }
    }

    pub fn skipped(notebook: NotebookFile) -> Self {
        Self {
            source: notebook.path.clone(),
            destination: None,
            notebook: Some(notebook),
            outcome: ConversionOutcome::SkippedUnsupported,
            error: None,
        }
    }

    pub fn unchanged(job: &ConversionJob) -> Self {
        Self::for_job(job, ConversionOutcome::Unchanged, None)
    }

    pub fn dropped(source: &Path, error: RmwatchError) -> Self {
        Self {
            source: source.to_path_buf(),
            destination: None,
            notebook: None,
            outcome: ConversionOutcome::Dropped,
            error: Some(error),
        }
    }

    pub fn from_classification_error(source: &Path, error: ClassificationError) -> Self {
        Self::dropped(source, RmwatchError::Classification(error))
    }

    /// Only backend problems fail a run; skips and drops do not.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.outcome,
            ConversionOutcome::BackendMissing | ConversionOutcome::BackendFailure
        )
    }

    /// Human-readable reason, for summaries
    pub fn reason(&self) -> String {
        match &self.error {
            Some(e) => e.to_string(),
            None => self.outcome.to_string(),
        }
    }
}

enum Rendered {
    Written,
    Blank,
}

/// Routes jobs to the v6 or legacy backend
pub struct ConversionDispatcher {
    v6: Arc<dyn Backend>,
    legacy: Arc<dyn Backend>,
    staging_dir: Option<PathBuf>,
    blank_pdf_threshold: u64,
}

impl ConversionDispatcher {
    /// Create a dispatcher with no blank-page check and system temp staging.
    pub fn new(v6: Arc<dyn Backend>, legacy: Arc<dyn Backend>) -> Self {
        Self {
            v6,
            legacy,
            staging_dir: None,
            blank_pdf_threshold: 0,
        }
    }

    /// Dispatcher running the configured external commands
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(CommandBackend::new(&config.backends.v6)),
            Arc::new(CommandBackend::new(&config.backends.legacy)),
        )
        .with_staging_dir(config.output.staging_dir.clone())
        .with_blank_pdf_threshold(config.output.blank_pdf_threshold)
    }

    pub fn with_staging_dir(mut self, staging_dir: Option<PathBuf>) -> Self {
        self.staging_dir = staging_dir;
        self
    }

    pub fn with_blank_pdf_threshold(mut self, threshold: u64) -> Self {
        self.blank_pdf_threshold = threshold;
        self
    }

    fn backend_for(&self, format: FormatVersion) -> Option<&dyn Backend> {
        match format {
            FormatVersion::V6Plus => Some(self.v6.as_ref()),
            FormatVersion::PreV6 => Some(self.legacy.as_ref()),
            FormatVersion::NotANotebook => None,
        }
    }

    /// Run the backend for `job` and report how it went.
    ///
    /// Never retries. On any failure the destination is left untouched.
    pub async fn dispatch(&self, job: &ConversionJob) -> ConversionResult {
        let Some(backend) = self.backend_for(job.source.format) else {
            return ConversionResult::skipped(job.source.clone());
        };

        log::debug!(
            "→ {} {} converting with {}…",
            job.source.tag(),
            job.source.display_name(),
            backend.tool()
        );

        match self.render_to_destination(backend, job).await {
            Ok(Rendered::Written) => ConversionResult::for_job(job, ConversionOutcome::Converted, None),
            Ok(Rendered::Blank) => ConversionResult::for_job(job, ConversionOutcome::SkippedBlank, None),
            Err(e @ RmwatchError::BackendMissing { .. }) => {
                ConversionResult::for_job(job, ConversionOutcome::BackendMissing, Some(e))
            }
            Err(e) => ConversionResult::for_job(job, ConversionOutcome::BackendFailure, Some(e)),
        }
    }

    async fn render_to_destination(&self, backend: &dyn Backend, job: &ConversionJob) -> Result<Rendered> {
        // Removed on drop, which also covers an aborted task
        let staging = self.staging_tempdir()?;

        let file_name = job.destination.file_name().ok_or_else(|| {
            RmwatchError::Config(format!("destination has no file name: {}", job.destination.display()))
        })?;
        let staged_pdf = staging.path().join(file_name);

        backend.render(&job.source.path, &staged_pdf).await?;

        let size = match fs::metadata(&staged_pdf) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            _ => {
                return Err(RmwatchError::BackendFailure {
                    tool: backend.tool().to_string(),
                    reason: "produced no output".to_string(),
                })
            }
        };

        if self.blank_pdf_threshold > 0 && size <= self.blank_pdf_threshold {
            return Ok(Rendered::Blank);
        }

        if let Some(parent) = job.destination.parent() {
            fs::create_dir_all(parent)?;
        }
        install(&staged_pdf, &job.destination)?;
        Ok(Rendered::Written)
    }

    fn staging_tempdir(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("rmwatch-");
        let dir = match &self.staging_dir {
            Some(staging) => {
                fs::create_dir_all(staging)?;
                builder.tempdir_in(staging)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

/// Move `staged` to `destination`, replacing any previous PDF.
///
/// Falls back to copy + rename when the staging area is on another
/// filesystem; the destination is never observed half-written.
fn install(staged: &Path, destination: &Path) -> Result<()> {
    if fs::rename(staged, destination).is_ok() {
        return Ok(());
    }
    let partial = destination.with_extension("pdf.part");
    let copied = fs::copy(staged, &partial).and_then(|_| fs::rename(&partial, destination));
    if let Err(e) = copied {
        let _ = fs::remove_file(&partial);
        return Err(RmwatchError::Io(e));
    }
    Ok(())
}
