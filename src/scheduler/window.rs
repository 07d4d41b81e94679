use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::github::ActivityRecord;

/// Half-open slice of the activity timeline fetched by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindow {
    pub since: DateTime<Utc>,
    pub before: DateTime<Utc>,
}

impl PollWindow {
    /// Build a window; `since` is clamped so it never lies after `before`.
    pub fn new(since: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        Self {
            since: since.min(before),
            before,
        }
    }
}

/// End of the last polled window. The only state carried between ticks
/// apart from the duplicate filter.
#[derive(Debug, Clone)]
pub struct Watermark {
    last_polled: DateTime<Utc>,
    overlap: chrono::Duration,
}

impl Watermark {
    pub fn new(start: DateTime<Utc>, overlap: Duration) -> Self {
        Self {
            last_polled: start,
            overlap: chrono::Duration::from_std(overlap).unwrap_or(chrono::Duration::zero()),
        }
    }

    pub fn last_polled(&self) -> DateTime<Utc> {
        self.last_polled
    }

    /// Window from the watermark (minus the overlap) up to `now`.
    ///
    /// A wall clock that stepped backwards yields an empty window at the
    /// watermark rather than one that runs backwards.
    pub fn window_until(&self, now: DateTime<Utc>) -> PollWindow {
        let before = now.max(self.last_polled);
        PollWindow::new(self.last_polled - self.overlap, before)
    }

    /// Move the watermark to the end of a fully attempted window.
    pub fn advance(&mut self, window: &PollWindow) {
        self.last_polled = self.last_polled.max(window.before);
    }
}

/// Records already handed to the pipeline, keyed by thread id and update
/// time, so the overlap between windows does not announce twice.
#[derive(Debug, Default)]
pub struct SeenRecords {
    seen: HashSet<(String, DateTime<Utc>)>,
}

impl SeenRecords {
    /// True the first time a given (id, updated_at) pair is offered.
    pub fn first_sighting(&mut self, record: &ActivityRecord) -> bool {
        self.seen.insert((record.id.clone(), record.updated_at))
    }

    /// Forget entries that can no longer reappear in a window starting at `since`.
    pub fn prune(&mut self, since: DateTime<Utc>) {
        self.seen.retain(|(_, updated_at)| *updated_at >= since);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}
