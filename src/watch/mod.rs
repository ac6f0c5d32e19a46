//! The watch-debounce-dispatch engine.
//!
//! One control loop owns the debounce table and the set of running
//! conversions. It waits on four things at once: the shutdown signal, a
//! finished conversion, the next raw event and the earliest debounce
//! deadline. Conversions run as tasks so a slow backend never stalls intake.
//!
//! Conversions writing the same PDF never overlap. A path that fires while
//! a conversion to its destination is still running is queued once, and
//! started when the running one completes.

pub mod debounce;
pub mod source;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{sleep_until, timeout_at, Instant};

use crate::config::InFlightPolicy;
use crate::convert::{
    compute_file_hash, resolve, ConversionDispatcher, ConversionJob, ConversionOutcome, ConversionResult,
};
use crate::error::{Result, RmwatchError};
use crate::notebook::classify;
use crate::scan::{classify_staleness, discover_files};

pub use debounce::{DebounceScheduler, PendingConversion};
pub use source::{is_covered, owning_root, RawEvent, RawEventKind, WatchEventSource, WatchRoot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Watching,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedConversion {
    pub source: PathBuf,
    pub reason: String,
}

/// Tally of one engine run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub converted: usize,
    pub skipped_unsupported: usize,
    pub skipped_blank: usize,
    pub unchanged: usize,
    pub dropped: usize,
    /// Conversions aborted at shutdown
    pub cancelled: usize,
    pub failures: Vec<FailedConversion>,
}

impl RunSummary {
    pub fn record(&mut self, result: &ConversionResult) {
        match result.outcome {
            ConversionOutcome::Converted => self.converted += 1,
            ConversionOutcome::SkippedUnsupported => self.skipped_unsupported += 1,
            ConversionOutcome::SkippedBlank => self.skipped_blank += 1,
            ConversionOutcome::Unchanged => self.unchanged += 1,
            ConversionOutcome::Dropped => self.dropped += 1,
            ConversionOutcome::BackendMissing | ConversionOutcome::BackendFailure => {
                self.failures.push(FailedConversion {
                    source: result.source.clone(),
                    reason: result.reason(),
                })
            }
        }
    }

    /// An input path that could not be used at all
    pub fn record_invalid_input(&mut self, path: &Path, error: &RmwatchError) {
        self.failures.push(FailedConversion {
            source: path.to_path_buf(),
            reason: error.to_string(),
        });
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Number of recorded results, failures included
    pub fn processed(&self) -> usize {
        self.converted
            + self.skipped_unsupported
            + self.skipped_blank
            + self.unchanged
            + self.dropped
            + self.failures.len()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} converted, {} skipped, {} unchanged, {} failed",
            self.converted,
            self.skipped_unsupported + self.skipped_blank + self.dropped,
            self.unchanged,
            self.failures.len()
        )
    }
}

/// What a conversion task hands back to the control loop
#[derive(Debug)]
struct JobReport {
    result: ConversionResult,
    /// Hash of the bytes that were classified, when readable
    fingerprint: Option<String>,
}

impl JobReport {
    fn without_fingerprint(result: ConversionResult) -> Self {
        Self {
            result,
            fingerprint: None,
        }
    }
}

pub struct WatcherEngine {
    roots: Vec<WatchRoot>,
    output_root: PathBuf,
    dispatcher: Arc<ConversionDispatcher>,
    scheduler: DebounceScheduler,
    in_flight_policy: InFlightPolicy,
    shutdown_timeout: Option<Duration>,
    state: EngineState,
    /// Destinations with a running conversion, and the sources queued behind it
    running: HashMap<PathBuf, Vec<PathBuf>>,
    /// Source and destination of each task
    task_paths: HashMap<Id, (PathBuf, PathBuf)>,
    tasks: JoinSet<JobReport>,
    /// Per destination, the source and SHA-256 behind its last good conversion
    fingerprints: HashMap<PathBuf, (PathBuf, String)>,
}

impl WatcherEngine {
    pub fn new(
        roots: Vec<WatchRoot>,
        output_root: impl Into<PathBuf>,
        dispatcher: Arc<ConversionDispatcher>,
        delay: Duration,
    ) -> Self {
        let output_root = output_root.into();
        let output_root = output_root.canonicalize().unwrap_or(output_root);
        Self {
            roots,
            output_root,
            dispatcher,
            scheduler: DebounceScheduler::new(delay),
            in_flight_policy: InFlightPolicy::default(),
            shutdown_timeout: None,
            state: EngineState::Idle,
            running: HashMap::new(),
            task_paths: HashMap::new(),
            tasks: JoinSet::new(),
            fingerprints: HashMap::new(),
        }
    }

    pub fn with_shutdown_policy(mut self, policy: InFlightPolicy, timeout: Option<Duration>) -> Self {
        self.in_flight_policy = policy;
        self.shutdown_timeout = timeout;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn roots(&self) -> &[WatchRoot] {
        &self.roots
    }

    /// Feed an event before `run`, as if the source had produced it.
    ///
    /// Only an `Idle` engine accepts seeded events; this is how catch-up
    /// schedules work ahead of the first real event. Once running, events
    /// come from the source alone and only while `Watching`.
    pub fn seed(&mut self, event: RawEvent) {
        if self.state != EngineState::Idle {
            log::debug!("engine is {:?}; not seeding {}", self.state, event.path.display());
            return;
        }
        self.admit(event);
    }

    /// Schedule every notebook under the roots whose PDF is missing or older
    /// than the notebook. Returns how many were scheduled.
    pub fn catch_up(&mut self) -> Result<usize> {
        let mut files = BTreeSet::new();
        for root in &self.roots {
            files.extend(
                discover_files(&root.path, root.recursive)?
                    .into_iter()
                    .filter(|f| !f.starts_with(&self.output_root)),
            );
        }
        let files: Vec<PathBuf> = files.into_iter().collect();

        let staleness = classify_staleness(&files, |file| self.destination_for(file));
        log::info!(
            "catch-up: {} new, {} modified, {} up to date",
            staleness.new_files.len(),
            staleness.modified_files.len(),
            staleness.up_to_date.len()
        );
        let stale = staleness.stale();
        let scheduled = stale.len();
        for path in stale {
            self.seed(RawEvent::created(path));
        }
        Ok(scheduled)
    }

    /// Run until `shutdown` resolves or `source` is exhausted.
    ///
    /// On shutdown, pending debounce timers and queued re-runs are cancelled
    /// and running conversions are drained per the in-flight policy. On
    /// exhaustion, pending timers fire normally and every conversion finishes.
    pub async fn run<F>(mut self, mut source: WatchEventSource, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        let mut summary = RunSummary::default();
        self.state = EngineState::Watching;
        tokio::pin!(shutdown);

        let mut source_open = true;
        let mut stop_requested = false;

        loop {
            if !source_open && self.scheduler.is_empty() && self.tasks.is_empty() {
                break;
            }
            let deadline = self.scheduler.next_deadline();

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    stop_requested = true;
                    break;
                }
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.on_joined(joined, &mut summary);
                }
                event = source.next(), if source_open => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        log::debug!("event source exhausted");
                        source_open = false;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.fire_due(Instant::now(), &mut summary);
                }
            }
        }

        source.close();
        if stop_requested {
            self.stop(&mut summary).await;
        }
        self.state = EngineState::Stopped;
        log::debug!("engine stopped: {}", summary);
        summary
    }

    /// Convert every notebook found under `inputs` once, without watching.
    ///
    /// A file input is watched through its parent directory, a directory is
    /// scanned (recursively when asked). Every file is mirrored from the
    /// outermost input directory it lies under. An input that does not exist
    /// is recorded as a failure; the others still proceed.
    pub async fn convert_once(
        inputs: &[PathBuf],
        output_root: &Path,
        recursive: bool,
        dispatcher: Arc<ConversionDispatcher>,
    ) -> RunSummary {
        let mut roots = Vec::new();
        let mut events = Vec::new();
        let mut invalid = Vec::new();

        for input in inputs {
            match one_shot_input(input, recursive) {
                Ok((root, files)) => {
                    log::info!("{}: {} file(s)", input.display(), files.len());
                    roots.push(root);
                    events.extend(files.into_iter().map(RawEvent::created));
                }
                Err(e) => {
                    log::error!("✗ {}", e);
                    invalid.push((input.clone(), e));
                }
            }
        }

        let engine = WatcherEngine::new(roots, output_root, dispatcher, Duration::ZERO);
        let mut summary = engine
            .run(WatchEventSource::from_events(events), std::future::pending::<()>())
            .await;
        for (input, error) in &invalid {
            summary.record_invalid_input(input, error);
        }
        summary
    }

    fn on_event(&mut self, event: RawEvent) {
        if self.state != EngineState::Watching {
            return;
        }
        self.admit(event);
    }

    fn admit(&mut self, event: RawEvent) {
        if event.path.starts_with(&self.output_root) {
            return;
        }
        if !is_covered(&self.roots, &event.path) {
            log::trace!("ignoring event outside watch roots: {}", event.path.display());
            return;
        }

        if event.kind == RawEventKind::Deleted {
            self.fingerprints
                .retain(|_, (source, _)| !source.starts_with(&event.path));
            for queued in self.running.values_mut() {
                queued.retain(|path| !path.starts_with(&event.path));
            }
        }
        self.scheduler.observe(&event);
    }

    /// The PDF `path` converts to
    fn destination_for(&self, path: &Path) -> Result<PathBuf> {
        let root = owning_root(&self.roots, path).ok_or_else(|| RmwatchError::OutsideRoot {
            path: path.to_path_buf(),
            root: self
                .roots
                .first()
                .map(|r| r.path.clone())
                .unwrap_or_default(),
        })?;
        resolve(path, &root.path, &self.output_root)
    }

    fn fire_due(&mut self, now: Instant, summary: &mut RunSummary) {
        for path in self.scheduler.take_due(now) {
            let destination = match self.destination_for(&path) {
                Ok(destination) => destination,
                Err(e) => {
                    let result = ConversionResult::dropped(&path, e);
                    log_result(&result);
                    summary.record(&result);
                    continue;
                }
            };
            match self.running.get_mut(&destination) {
                Some(queued) => {
                    log::debug!(
                        "{} is being written; {} queued",
                        destination.display(),
                        display_name(&path)
                    );
                    if !queued.contains(&path) {
                        queued.push(path);
                    }
                }
                None => self.start_job(path, destination),
            }
        }
    }

    fn start_job(&mut self, path: PathBuf, destination: PathBuf) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let previous = self
            .fingerprints
            .get(&destination)
            .filter(|(source, _)| *source == path)
            .map(|(_, hash)| hash.clone());
        let job_path = path.clone();
        let job_destination = destination.clone();

        let handle = self.tasks.spawn(async move {
            convert_one(&dispatcher, &job_path, job_destination, previous).await
        });
        self.task_paths.insert(handle.id(), (path, destination.clone()));
        self.running.entry(destination).or_default();
    }

    fn on_joined(&mut self, joined: std::result::Result<(Id, JobReport), JoinError>, summary: &mut RunSummary) {
        let (id, report) = match joined {
            Ok((id, report)) => (id, Ok(report)),
            Err(e) => (e.id(), Err(e)),
        };
        let Some((path, destination)) = self.task_paths.remove(&id) else {
            return;
        };
        let mut queued = self.running.remove(&destination).unwrap_or_default();

        match report {
            Ok(JobReport { result, fingerprint }) => {
                match (result.outcome, fingerprint) {
                    (ConversionOutcome::Converted | ConversionOutcome::SkippedBlank, Some(fingerprint)) => {
                        self.fingerprints
                            .insert(destination.clone(), (path.clone(), fingerprint));
                    }
                    (ConversionOutcome::Converted, None) => {
                        self.fingerprints.remove(&destination);
                    }
                    _ => {}
                }
                log_result(&result);
                summary.record(&result);
            }
            Err(e) if e.is_cancelled() => {
                log::warn!("✗ {}: conversion abandoned", display_name(&path));
                summary.cancelled += 1;
            }
            Err(e) => {
                log::error!("✗ {}: conversion task failed: {}", display_name(&path), e);
                summary.failures.push(FailedConversion {
                    source: path.clone(),
                    reason: e.to_string(),
                });
            }
        }

        if self.state == EngineState::Watching && !queued.is_empty() {
            let next = queued.remove(0);
            self.start_job(next, destination.clone());
            if let Some(rest) = self.running.get_mut(&destination) {
                *rest = queued;
            }
        }
    }

    async fn stop(&mut self, summary: &mut RunSummary) {
        self.state = EngineState::Stopping;
        let cancelled = self.scheduler.clear();
        for queued in self.running.values_mut() {
            queued.clear();
        }
        log::info!(
            "stopping: {} pending cancelled, {} conversion(s) in flight",
            cancelled,
            self.tasks.len()
        );

        if self.in_flight_policy == InFlightPolicy::Abandon {
            self.tasks.abort_all();
        }

        let mut deadline = self
            .shutdown_timeout
            .and_then(|t| Instant::now().checked_add(t));
        loop {
            let joined = match deadline {
                Some(at) => match timeout_at(at, self.tasks.join_next_with_id()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        log::warn!(
                            "shutdown timeout: aborting {} conversion(s) still running",
                            self.tasks.len()
                        );
                        self.tasks.abort_all();
                        deadline = None;
                        continue;
                    }
                },
                None => self.tasks.join_next_with_id().await,
            };
            let Some(joined) = joined else {
                break;
            };
            self.on_joined(joined, summary);
        }
    }
}

/// Classify and convert one path to `destination`. Runs inside a task.
async fn convert_one(
    dispatcher: &ConversionDispatcher,
    path: &Path,
    destination: PathBuf,
    previous: Option<String>,
) -> JobReport {
    let notebook = match classify(path) {
        Ok(notebook) => notebook,
        Err(e) => return JobReport::without_fingerprint(ConversionResult::from_classification_error(path, e)),
    };
    if !notebook.is_convertible() {
        return JobReport::without_fingerprint(ConversionResult::skipped(notebook));
    }

    let job = ConversionJob {
        source: notebook,
        destination,
    };

    let fingerprint = match compute_file_hash(path) {
        Ok(hash) => Some(hash),
        Err(e) => {
            log::debug!("hash {}: {}", path.display(), e);
            None
        }
    };
    if fingerprint.is_some() && fingerprint == previous && job.destination.exists() {
        return JobReport {
            result: ConversionResult::unchanged(&job),
            fingerprint,
        };
    }

    let result = dispatcher.dispatch(&job).await;
    JobReport { result, fingerprint }
}

fn one_shot_input(input: &Path, recursive: bool) -> Result<(WatchRoot, Vec<PathBuf>)> {
    let invalid = |reason: String| RmwatchError::WatchRootInvalid {
        path: input.to_path_buf(),
        reason,
    };
    let canonical = input.canonicalize().map_err(|e| invalid(e.to_string()))?;

    if canonical.is_file() {
        let parent = canonical
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| invalid("no parent directory".to_string()))?;
        return Ok((WatchRoot::new(parent, false), vec![canonical]));
    }

    let root = WatchRoot::new(canonical, recursive).validate()?;
    let files = discover_files(&root.path, root.recursive)?;
    Ok((root, files))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn log_result(result: &ConversionResult) {
    let name = display_name(&result.source);
    match result.outcome {
        ConversionOutcome::Converted => {
            let tag = result.notebook.as_ref().map(|n| n.tag()).unwrap_or_default();
            let destination = result
                .destination
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_default();
            log::info!("✓ {} {} → {}", tag, name, destination);
        }
        ConversionOutcome::SkippedBlank => log::info!("· {} blank — skipped", name),
        ConversionOutcome::SkippedUnsupported => log::debug!("skip {}: not a notebook", name),
        ConversionOutcome::Unchanged => log::debug!("skip {}: unchanged since last conversion", name),
        ConversionOutcome::Dropped => log::warn!("skip {}: {}", name, result.reason()),
        ConversionOutcome::BackendMissing | ConversionOutcome::BackendFailure => {
            log::error!("✗ {}: {}", name, result.reason())
        }
    }
}
