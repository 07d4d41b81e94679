pub mod window;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::PollSettings;
use crate::github::{ActivityFeed, ActivityRecord, FeedError, PullRequestApi};
use crate::notify::{DispatchOutcome, Dispatcher};
use crate::pr::status::{classify, ClassifyError};
use crate::pr::{self, ResolveError};
use window::{SeenRecords, Watermark};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0}")]
    FeedUnavailable(FeedError),

    #[error("Activity feed failed {attempts} times in a row, giving up: {last}")]
    FeedRetriesExhausted { attempts: u32, last: FeedError },
}

/// Why a single record produced no announcement.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

/// Counts for one completed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub fetched: usize,
    pub duplicates: usize,
    /// Issues, discussions and other non pull request activity
    pub ignored: usize,
    pub announced: usize,
    pub delivery_failed: usize,
    pub record_failed: usize,
    pub setup_failed: usize,
}

/// Fixed-interval driver of the resolve, classify, dispatch pipeline.
pub struct Scheduler {
    feed: Arc<dyn ActivityFeed>,
    api: Arc<dyn PullRequestApi>,
    dispatcher: Dispatcher,
    settings: PollSettings,
    watermark: Watermark,
    seen: SeenRecords,
    feed_failures: u32,
}

impl Scheduler {
    pub fn new(
        feed: Arc<dyn ActivityFeed>,
        api: Arc<dyn PullRequestApi>,
        dispatcher: Dispatcher,
        settings: PollSettings,
        start: DateTime<Utc>,
    ) -> Self {
        let watermark = Watermark::new(start, settings.overlap);
        Self {
            feed,
            api,
            dispatcher,
            settings,
            watermark,
            seen: SeenRecords::default(),
            feed_failures: 0,
        }
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark.last_polled()
    }

    /// Poll until cancelled or until the feed fails fatally.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), SchedulerError> {
        let mut ticker = interval_at(Instant::now() + self.settings.interval, self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.settings.interval, "listening for pull request activity");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(Utc::now(), &cancel).await?;
            if cancel.is_cancelled() {
                break;
            }
        }

        info!(watermark = %self.watermark(), "scheduler stopped");
        Ok(())
    }

    /// Run one tick ending at `now`.
    ///
    /// Returns `None` when the tick did not complete (transient feed error
    /// or cancellation); the watermark is then left where it was.
    pub async fn tick(
        &mut self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Option<TickSummary>, SchedulerError> {
        let window = self.watermark.window_until(now);
        let span = info_span!("tick", since = %window.since, before = %window.before);

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            fetched = self.feed.list_activity(&window).instrument(span.clone()) => fetched,
        };

        let records = match fetched {
            Ok(records) => {
                self.feed_failures = 0;
                records
            }
            Err(err @ FeedError::Fatal(_)) => {
                error!(parent: &span, error = %err, "activity feed failed fatally");
                return Err(SchedulerError::FeedUnavailable(err));
            }
            Err(err) => {
                self.feed_failures += 1;
                if self.feed_failures > self.settings.max_consecutive_feed_failures {
                    error!(parent: &span, attempts = self.feed_failures, error = %err, "activity feed keeps failing");
                    return Err(SchedulerError::FeedRetriesExhausted {
                        attempts: self.feed_failures,
                        last: err,
                    });
                }
                warn!(parent: &span, attempts = self.feed_failures, error = %err, "activity feed unavailable, retrying next tick");
                return Ok(None);
            }
        };

        self.seen.prune(window.since);
        let fetched = records.len();
        let fresh: Vec<ActivityRecord> = records
            .into_iter()
            .filter(|record| self.seen.first_sighting(record))
            .collect();
        let duplicates = fetched - fresh.len();
        let (fresh, ignored): (Vec<_>, Vec<_>) =
            fresh.into_iter().partition(ActivityRecord::is_pull_request);
        for record in &ignored {
            debug!(
                parent: &span,
                id = %record.id,
                kind = %record.subject.kind,
                repo = record.repository_name().unwrap_or("<unknown>"),
                "not a pull request, ignoring"
            );
        }
        let mut summary = TickSummary {
            fetched,
            duplicates,
            ignored: ignored.len(),
            ..TickSummary::default()
        };

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(parent: &span, "tick cancelled, watermark not advanced");
                return Ok(None);
            }
            results = self.process_all(&fresh, cancel).instrument(span.clone()) => results,
        };

        for result in results {
            match result {
                Ok(outcome) => {
                    debug!(
                        parent: &span,
                        repo = %outcome.payload.repository_full_name,
                        status = %outcome.payload.status,
                        links = outcome.payload.action_links.len(),
                        "record dispatched"
                    );
                    if outcome.delivery.is_ok() {
                        summary.announced += 1;
                    } else {
                        summary.delivery_failed += 1;
                    }
                    if matches!(outcome.setup, Some(Err(_))) {
                        summary.setup_failed += 1;
                    }
                }
                Err(_) => summary.record_failed += 1,
            }
        }

        self.watermark.advance(&window);
        if summary.fetched > 0 {
            info!(parent: &span, ?summary, tracked = self.seen.len(), "tick complete");
        } else {
            debug!(parent: &span, "no activity");
        }
        Ok(Some(summary))
    }

    async fn process_all(
        &self,
        records: &[ActivityRecord],
        cancel: &CancellationToken,
    ) -> Vec<Result<DispatchOutcome, RecordError>> {
        stream::iter(records)
            .map(|record| self.process_record(record, cancel))
            .buffer_unordered(self.settings.max_concurrent_records)
            .collect()
            .await
    }

    /// Resolve, classify and dispatch one record. Failures stay local to
    /// the record.
    async fn process_record(
        &self,
        record: &ActivityRecord,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, RecordError> {
        let span = info_span!("record", id = %record.id, title = %record.subject.title);
        let result = async {
            let pr = pr::resolve(record)?;
            let state = classify(self.api.as_ref(), &pr).await?;
            Ok::<_, RecordError>(self.dispatcher.dispatch(&pr, state, cancel).await)
        }
        .instrument(span.clone())
        .await;

        if let Err(e) = &result {
            let url = record.reference_urls().next().unwrap_or("<none>");
            let step = match e {
                RecordError::Resolve(_) => "resolve",
                RecordError::Classify(_) => "classify",
            };
            warn!(parent: &span, step, url, error = %e, "skipping record");
        }
        result
    }
}
