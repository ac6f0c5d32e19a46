//! Per-path debounce: a burst of events for one path becomes one firing,
//! `delay` after the last event in the burst.
//!
//! Timers are plain deadlines kept in a table owned by the engine; the engine
//! sleeps until `next_deadline` and collects what is due with `take_due`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use super::source::{RawEvent, RawEventKind};

/// Stand-in for a deadline that does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A path waiting for its quiet period to elapse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConversion {
    pub path: PathBuf,
    pub last_event_time: Instant,
    pub deadline: Instant,
}

#[derive(Debug)]
pub struct DebounceScheduler {
    delay: Duration,
    pending: HashMap<PathBuf, PendingConversion>,
}

impl DebounceScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Feed one event.
    ///
    /// Created/modified/renamed (re)arm the path's single deadline; deleted
    /// drops it, along with anything pending beneath it when a directory goes.
    pub fn observe(&mut self, event: &RawEvent) {
        if event.kind == RawEventKind::Deleted {
            self.cancel(&event.path);
            return;
        }

        match self.pending.get_mut(&event.path) {
            Some(entry) => {
                // Events may arrive slightly out of order from the OS thread
                entry.last_event_time = entry.last_event_time.max(event.timestamp);
                entry.deadline = deadline_after(entry.last_event_time, self.delay);
            }
            None => {
                self.pending.insert(
                    event.path.clone(),
                    PendingConversion {
                        path: event.path.clone(),
                        last_event_time: event.timestamp,
                        deadline: deadline_after(event.timestamp, self.delay),
                    },
                );
            }
        }
    }

    /// Drop `path` and any pending path under it. Returns how many were dropped.
    pub fn cancel(&mut self, path: &Path) -> usize {
        let before = self.pending.len();
        self.pending.retain(|pending, _| !pending.starts_with(path));
        before - self.pending.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every path whose deadline is at or before `now`,
    /// in path order.
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<PathBuf> = self
            .pending
            .values()
            .filter(|p| p.deadline <= now)
            .map(|p| p.path.clone())
            .collect();
        due.sort();
        for path in &due {
            self.pending.remove(path);
        }
        due
    }

    pub fn get(&self, path: &Path) -> Option<&PendingConversion> {
        self.pending.get(path)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Cancel everything. Returns how many entries were pending.
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}

fn deadline_after(at: Instant, delay: Duration) -> Instant {
    at.checked_add(delay)
        .or_else(|| at.checked_add(FAR_FUTURE))
        .unwrap_or(at)
}
