//! Filesystem subscription: notify events in, path-level `RawEvent`s out.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{Result, RmwatchError};
use crate::scan::{discover_files, is_transient_artifact};

/// A directory to watch, fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoot {
    pub path: PathBuf,
    pub recursive: bool,
}

impl WatchRoot {
    pub fn new(path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            path: path.into(),
            recursive,
        }
    }

    /// Canonicalize the root, failing with `WatchRootInvalid` when it does
    /// not exist or is not a directory.
    pub fn validate(self) -> Result<Self> {
        let invalid = |reason: String| RmwatchError::WatchRootInvalid {
            path: self.path.clone(),
            reason,
        };
        let canonical = self
            .path
            .canonicalize()
            .map_err(|e| invalid(e.to_string()))?;
        if !canonical.is_dir() {
            return Err(invalid("not a directory".to_string()));
        }
        Ok(Self {
            path: canonical,
            recursive: self.recursive,
        })
    }

    /// True when `path` is a file this root covers.
    pub fn contains(&self, path: &Path) -> bool {
        if self.recursive {
            path.starts_with(&self.path) && path != self.path
        } else {
            path.parent() == Some(self.path.as_path())
        }
    }
}

/// The root a covered `path` is mirrored from: the outermost root it lies
/// under, whether or not that root reaches it directly.
///
/// Nested roots and file inputs beside a directory input therefore share one
/// mirror of the outer tree instead of each re-rooting their files.
pub fn owning_root<'a>(roots: &'a [WatchRoot], path: &Path) -> Option<&'a WatchRoot> {
    if !is_covered(roots, path) {
        return None;
    }
    roots
        .iter()
        .filter(|root| path.starts_with(&root.path) && path != root.path)
        .min_by_key(|root| root.path.components().count())
}

/// True when some root covers `path`
pub fn is_covered(roots: &[WatchRoot], path: &Path) -> bool {
    roots.iter().any(|root| root.contains(path))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// One path-level change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub kind: RawEventKind,
    pub timestamp: Instant,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, kind: RawEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: Instant::now(),
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(path, RawEventKind::Created)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(path, RawEventKind::Modified)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(path, RawEventKind::Deleted)
    }
}

/// Translate one notify event into raw events.
///
/// A directory appearing under a recursive root is scanned right away, so
/// files written into it before its own watch was registered still produce
/// `Created` events. Duplicates are harmless: the debouncer coalesces them.
pub fn translate(event: &Event, roots: &[WatchRoot]) -> Vec<RawEvent> {
    let mut out = Vec::new();

    match &event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                appeared(path, RawEventKind::Created, roots, &mut out);
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => {
                for path in &event.paths {
                    out.push(RawEvent::deleted(path));
                }
            }
            RenameMode::To => {
                for path in &event.paths {
                    appeared(path, RawEventKind::Renamed, roots, &mut out);
                }
            }
            RenameMode::Both => {
                if let [from, to] = event.paths.as_slice() {
                    out.push(RawEvent::deleted(from));
                    appeared(to, RawEventKind::Renamed, roots, &mut out);
                }
            }
            _ => {
                for path in &event.paths {
                    if path.exists() {
                        appeared(path, RawEventKind::Renamed, roots, &mut out);
                    } else {
                        out.push(RawEvent::deleted(path));
                    }
                }
            }
        },
        EventKind::Modify(_) => {
            for path in event.paths.iter().filter(|p| !p.is_dir()) {
                out.push(RawEvent::modified(path));
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                out.push(RawEvent::deleted(path));
            }
        }
        _ => {}
    }

    out.retain(|e| !is_transient_artifact(&e.path));
    out
}

fn appeared(path: &Path, kind: RawEventKind, roots: &[WatchRoot], out: &mut Vec<RawEvent>) {
    if !path.is_dir() {
        out.push(RawEvent::new(path, kind));
        return;
    }
    if !roots.iter().any(|root| root.recursive && root.contains(path)) {
        return;
    }
    match discover_files(path, true) {
        Ok(files) => out.extend(files.into_iter().map(RawEvent::created)),
        Err(e) => log::warn!("watch: cannot scan new directory {}: {}", path.display(), e),
    }
}

/// Lazy, finite-or-infinite sequence of raw events.
///
/// Either backed by an OS watcher (`subscribe`) or by a fixed list of
/// synthetic events (`from_events`), which is how one-shot conversion feeds
/// the same pipeline.
pub struct WatchEventSource {
    watcher: Option<RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<RawEvent>,
}

impl WatchEventSource {
    /// Watch `roots` until `close` is called or the source is dropped.
    pub fn subscribe(roots: &[WatchRoot]) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler_roots = roots.to_vec();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for raw in translate(&event, &handler_roots) {
                    if tx.send(raw).is_err() {
                        return;
                    }
                }
            }
            Err(e) => log::warn!("watch error: {}", e),
        })?;

        for root in roots {
            let mode = if root.recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher.watch(&root.path, mode)?;
            log::debug!("watching {} ({:?})", root.path.display(), mode);
        }

        Ok(Self {
            watcher: Some(watcher),
            rx,
        })
    }

    /// A source that yields `events` and then ends.
    pub fn from_events(events: Vec<RawEvent>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            let _ = tx.send(event);
        }
        Self { watcher: None, rx }
    }

    /// A source fed by an external sender; ends when every sender is dropped.
    pub fn from_channel(rx: mpsc::UnboundedReceiver<RawEvent>) -> Self {
        Self { watcher: None, rx }
    }

    /// Next event, or `None` once the source is closed and drained.
    pub async fn next(&mut self) -> Option<RawEvent> {
        self.rx.recv().await
    }

    /// Stop the OS subscription and release its watch handles.
    pub fn close(&mut self) {
        self.watcher = None;
        self.rx.close();
    }
}
