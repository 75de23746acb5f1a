//! Fixed-interval polling of the listing source.
//!
//! The poller owns the whole cycle: fetch each subject's listing, expand the
//! entries into [`NewsItem`]s, persist them, then advance the watermark.
//!
//! # Concurrency
//!
//! A timer task fires a cycle and then sleeps for the current interval. Each
//! firing runs as its own task, so a slow cycle may still be running when the
//! next firing arrives. At most one cycle is ever in flight: a firing that
//! finds the in-flight flag set is dropped without doing any work.
//!
//! # Failure containment
//!
//! | Failure | Scope | Effect |
//! |---------|-------|--------|
//! | Listing fetch | subject | subject skipped, others continue |
//! | Page extraction | item | item kept with empty `full_content` |
//! | Store write | item | item skipped, watermark still advances |
//! | Watermark write or panic | cycle | logged, next firing proceeds normally |
//!
//! # Incremental mode
//!
//! With [`PollSettings::incremental`] set, entries at or before the watermark
//! are dropped before any page is rendered. The filter only applies after a
//! clean cycle (every subject fetched, every item stored), so anything a
//! failed cycle missed is picked up again by the next one.

use crate::cursor::{Cursor, advance_watermark};
use crate::error::{CycleError, SourceError};
use crate::extract::PageExtractor;
use crate::formatter::format_news;
use crate::models::NewsItem;
use crate::sink::{NewsSink, room_key_for};
use crate::sources::ListingSource;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// What a cycle works on.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub subjects: Vec<String>,
    pub max_per_subject: usize,
    /// Drop listing entries published at or before the watermark, as long as
    /// the previous cycle was clean.
    pub incremental: bool,
    /// Room key template; `{subject}` is substituted per item.
    pub room_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    Stopping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    Skipped(SkipReason),
    Completed(CycleReport),
    Failed,
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub subjects_ok: usize,
    pub subjects_failed: usize,
    pub items: usize,
    pub with_content: usize,
    pub stored: usize,
    pub store_failures: usize,
    pub watermark: Option<DateTime<Utc>>,
}

/// Clears the in-flight flag on every exit from a firing.
struct InFlight<'a>(&'a watch::Sender<bool>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

pub struct NewsPoller {
    source: Arc<dyn ListingSource>,
    extractor: Arc<dyn PageExtractor>,
    sink: NewsSink,
    cursor: Cursor,
    settings: PollSettings,
    interval: watch::Receiver<Duration>,
    in_flight: watch::Sender<bool>,
    stopping: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Whether the last completed cycle fetched every subject and stored
    /// every item. False until the first such cycle.
    last_cycle_clean: AtomicBool,
}

impl NewsPoller {
    pub fn new(
        source: Arc<dyn ListingSource>,
        extractor: Arc<dyn PageExtractor>,
        sink: NewsSink,
        cursor: Cursor,
        settings: PollSettings,
        interval: watch::Receiver<Duration>,
    ) -> Self {
        Self {
            source,
            extractor,
            sink,
            cursor,
            settings,
            interval,
            in_flight: watch::Sender::new(false),
            stopping: watch::Sender::new(false),
            timer: Mutex::new(None),
            last_cycle_clean: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn state(&self) -> PollerState {
        if *self.in_flight.borrow() {
            PollerState::Running
        } else if self.stop_requested() {
            PollerState::Stopped
        } else {
            PollerState::Idle
        }
    }

    fn stop_requested(&self) -> bool {
        *self.stopping.borrow()
    }

    /// Start the timer loop. The first cycle fires immediately.
    pub async fn start(self: &Arc<Self>) {
        if self.stop_requested() {
            warn!("Poller has been stopped; ignoring start");
            return;
        }
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            warn!("Poller already started");
            return;
        }

        info!(
            subjects = ?self.settings.subjects,
            interval = ?*self.interval.borrow(),
            "Starting news poller"
        );
        let poller = Arc::clone(self);
        *timer = Some(tokio::spawn(async move { poller.timer_loop().await }));
    }

    async fn timer_loop(self: Arc<Self>) {
        let mut stop_rx = self.stopping.subscribe();
        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }

            let firing = Arc::clone(&self);
            tokio::spawn(async move {
                firing.fire().await;
            });

            let wait = *self.interval.borrow();
            debug!(?wait, "Next poll scheduled");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop_rx.changed() => {}
            }
        }
        debug!("Timer loop exited");
    }

    /// Stop firing, wait for the in-flight cycle, release rendering resources.
    /// Later calls are no-ops.
    pub async fn stop(&self) {
        if self.stopping.send_replace(true) {
            debug!("Poller already stopped");
            return;
        }
        info!("Stopping news poller");

        if let Some(handle) = self.timer.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Timer task ended abnormally");
            }
        }

        let mut in_flight = self.in_flight.subscribe();
        let settled = in_flight.wait_for(|running| !*running).await.is_ok();
        if !settled {
            warn!("In-flight flag closed while waiting for cycle to finish");
        }

        self.extractor.cleanup().await;
        info!("News poller stopped");
    }

    /// One timer tick. Runs a cycle unless one is already in flight or the
    /// poller is stopping.
    pub async fn fire(&self) -> FireOutcome {
        let acquired = self.in_flight.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if !acquired {
            debug!("Previous cycle still running; skipping this firing");
            return FireOutcome::Skipped(SkipReason::AlreadyRunning);
        }
        let _in_flight = InFlight(&self.in_flight);

        if self.stop_requested() {
            debug!("Poller stopping; skipping this firing");
            return FireOutcome::Skipped(SkipReason::Stopping);
        }

        match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(Ok(report)) => {
                info!(
                    subjects_ok = report.subjects_ok,
                    subjects_failed = report.subjects_failed,
                    items = report.items,
                    with_content = report.with_content,
                    stored = report.stored,
                    store_failures = report.store_failures,
                    watermark = ?report.watermark,
                    "Poll cycle complete"
                );
                FireOutcome::Completed(report)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Poll cycle failed");
                FireOutcome::Failed
            }
            Err(payload) => {
                let e = CycleError::Panicked(panic_message(&*payload));
                error!(error = %e, "Poll cycle failed");
                FireOutcome::Failed
            }
        }
    }

    /// Fetch, format and persist every subject, then advance the watermark.
    #[instrument(level = "info", skip_all)]
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let prior = match self.cursor.load().await {
            Ok(watermark) => watermark,
            Err(e) => {
                warn!(error = %e, "Failed to load watermark; treating as unset");
                None
            }
        };

        let skip_until = match prior {
            Some(_) if self.settings.incremental => {
                if self.last_cycle_clean.load(Ordering::SeqCst) {
                    prior
                } else {
                    debug!("Previous cycle was incomplete; re-processing the full listing");
                    None
                }
            }
            _ => None,
        };

        let mut report = CycleReport::default();
        let mut batch: Vec<NewsItem> = Vec::new();

        for subject in &self.settings.subjects {
            if self.stop_requested() {
                info!("Stop requested; skipping remaining subjects");
                break;
            }
            match self.collect_subject(subject, skip_until).await {
                Ok(items) => {
                    report.subjects_ok += 1;
                    batch.extend(items);
                }
                Err(e) => {
                    report.subjects_failed += 1;
                    warn!(
                        %subject,
                        source = self.source.name(),
                        error = %e,
                        "Failed to fetch listing; skipping subject"
                    );
                }
            }
        }

        report.items = batch.len();
        report.with_content = batch.iter().filter(|n| n.has_full_content()).count();

        for item in &batch {
            let room_key = room_key_for(&self.settings.room_key, &item.subject);
            match self.sink.persist(item, &room_key).await {
                Ok(_) => report.stored += 1,
                Err(e) => {
                    report.store_failures += 1;
                    warn!(url = %item.url, error = %e, "Failed to store news item");
                }
            }
        }

        let clean =
            report.subjects_ok == self.settings.subjects.len() && report.store_failures == 0;
        self.last_cycle_clean.store(clean, Ordering::SeqCst);

        report.watermark = advance_watermark(prior, &batch);
        if !batch.is_empty() {
            if let Some(watermark) = report.watermark {
                self.cursor.store(watermark).await?;
            }
        }

        Ok(report)
    }

    #[instrument(level = "info", skip(self, skip_until))]
    async fn collect_subject(
        &self,
        subject: &str,
        skip_until: Option<DateTime<Utc>>,
    ) -> Result<Vec<NewsItem>, SourceError> {
        let listing = self.source.fetch(subject).await?;
        let Some(mut results) = listing.results.filter(|r| !r.is_empty()) else {
            warn!("Listing returned no results");
            return Ok(Vec::new());
        };

        if let Some(watermark) = skip_until {
            let listed = results.len();
            results.retain(|raw| raw.published_at > watermark);
            debug!(
                listed,
                already_seen = listed - results.len(),
                "Dropped entries at or before watermark"
            );
        }

        Ok(format_news(
            &results,
            subject,
            self.settings.max_per_subject,
            self.extractor.as_ref(),
        )
        .await)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
