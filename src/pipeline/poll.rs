// src/pipeline/poll.rs

//! Poll orchestrator.
//!
//! Runs scan → enrich → gate → deliver for every tracker. A failing tracker
//! is logged and skipped; it never stops the rest of the pass.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::models::{PollConfig, Tracker};
use crate::pipeline::delivery::{DeliveryEngine, DeliveryReport};
use crate::pipeline::gate::{self, GateTally};
use crate::services::EventSource;
use crate::storage::TrackerStore;

/// Source of the current instant.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Outcome of one tracker within a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerReport {
    /// Distinct ids found on the listing page
    pub scanned: usize,
    /// Event objects returned by the lookup
    pub fetched: usize,
    pub gate: GateTally,
    pub delivered: usize,
    /// Admitted events that could not be delivered this pass
    pub pending: usize,
}

/// Summary of a whole pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub trackers: usize,
    pub failed_trackers: usize,
    pub delivered: usize,
    pub pending: usize,
    /// Per-tracker result, error text for trackers skipped this pass
    pub outcomes: Vec<(Tracker, std::result::Result<TrackerReport, String>)>,
}

/// Drives poll passes over all registered trackers.
pub struct Poller {
    store: Arc<dyn TrackerStore>,
    source: Arc<dyn EventSource>,
    delivery: DeliveryEngine,
    config: PollConfig,
    clock: Clock,
    pass_lock: Mutex<()>,
}

impl Poller {
    pub fn new(
        store: Arc<dyn TrackerStore>,
        source: Arc<dyn EventSource>,
        delivery: DeliveryEngine,
        config: PollConfig,
    ) -> Self {
        Self {
            store,
            source,
            delivery,
            config,
            clock: Arc::new(Utc::now),
            pass_lock: Mutex::new(()),
        }
    }

    /// Replace the clock used for the temporal filter.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn TrackerStore> {
        &self.store
    }

    /// Run one pass over every tracker.
    ///
    /// Returns `None` without doing anything when another pass (or an
    /// immediate single-tracker poll) is still running.
    pub async fn run_pass(&self) -> Option<PassReport> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            log::warn!("Previous pass still running; skipping this tick");
            return None;
        };

        let trackers = match self.store.list_trackers() {
            Ok(trackers) => trackers,
            Err(e) => {
                log::error!("Cannot list trackers: {}", e);
                return Some(PassReport::default());
            }
        };

        log::info!("Starting pass over {} tracker(s)", trackers.len());
        let mut report = PassReport {
            trackers: trackers.len(),
            ..PassReport::default()
        };

        // Trackers sharing a destination stay sequential so their dedup checks
        // observe each other's marks.
        let mut by_destination: BTreeMap<String, Vec<Tracker>> = BTreeMap::new();
        for tracker in trackers {
            by_destination
                .entry(tracker.destination.clone())
                .or_default()
                .push(tracker);
        }

        let concurrency = self.config.max_concurrent_trackers.max(1);
        let mut groups = stream::iter(by_destination.into_values())
            .map(|group| self.poll_group(group))
            .buffer_unordered(concurrency);

        while let Some(results) = groups.next().await {
            for (tracker, result) in results {
                match result {
                    Ok(tracker_report) => {
                        report.delivered += tracker_report.delivered;
                        report.pending += tracker_report.pending;
                        report.outcomes.push((tracker, Ok(tracker_report)));
                    }
                    Err(e) => {
                        report.failed_trackers += 1;
                        log::warn!(
                            "Tracker {} -> {} skipped this pass: {}",
                            tracker.source_url,
                            tracker.destination,
                            e
                        );
                        report.outcomes.push((tracker, Err(e.to_string())));
                    }
                }
            }
        }

        log::info!(
            "Pass complete: {} tracker(s), {} failed, {} delivered, {} pending",
            report.trackers,
            report.failed_trackers,
            report.delivered,
            report.pending
        );
        Some(report)
    }

    async fn poll_group(&self, group: Vec<Tracker>) -> Vec<(Tracker, Result<TrackerReport>)> {
        let mut results = Vec::with_capacity(group.len());
        for tracker in group {
            let result = self.poll_tracker_unguarded(&tracker).await;
            results.push((tracker, result));
        }
        results
    }

    /// Poll a single tracker right away, waiting for any running pass first.
    pub async fn poll_tracker(&self, tracker: &Tracker) -> Result<TrackerReport> {
        let _guard = self.pass_lock.lock().await;
        self.poll_tracker_unguarded(tracker).await
    }

    async fn poll_tracker_unguarded(&self, tracker: &Tracker) -> Result<TrackerReport> {
        let mut report = TrackerReport::default();

        let ids = self.source.scan(&tracker.source_url).await?;
        report.scanned = ids.len();
        if ids.is_empty() {
            log::info!("No events listed on {}", tracker.source_url);
            return Ok(report);
        }

        let events = self.source.enrich(&ids).await?;
        report.fetched = events.len();

        let now = (self.clock)();
        let admitted = gate::admit(&events, &tracker.destination, self.store.as_ref(), now)?;
        report.gate = admitted.tally;

        for event in &admitted.admitted {
            let outcome = self
                .delivery
                .deliver(event, &tracker.destination, self.store.as_ref())
                .await?;
            match outcome {
                DeliveryReport::Delivered { .. } => report.delivered += 1,
                _ => report.pending += 1,
            }
        }

        log::info!(
            "{} -> {}: {} listed, {} fetched, {} new, {} past, {} seen, {} malformed, {} delivered",
            tracker.source_url,
            tracker.destination,
            report.scanned,
            report.fetched,
            report.gate.admitted,
            report.gate.past,
            report.gate.already_processed,
            report.gate.malformed,
            report.delivered
        );
        Ok(report)
    }

    /// Run passes every `interval` until `shutdown` resolves.
    ///
    /// The first pass starts immediately. Each tick spawns its own pass, so the
    /// schedule does not drift with pass duration; overlapping ticks are
    /// skipped by the pass guard. On shutdown, a pass already in flight is
    /// allowed to finish before this returns.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        log::info!("Polling every {}s", self.config.interval().as_secs());

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown requested, waiting for the running pass");
                    break;
                }
                _ = ticker.tick() => {
                    let poller = Arc::clone(&self);
                    tokio::spawn(async move {
                        poller.run_pass().await;
                    });
                }
            }
        }

        let _guard = self.pass_lock.lock().await;
        log::info!("Poll loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::{Value, json};
    use tokio::sync::Notify;

    use crate::error::AppError;
    use crate::models::{DeliveryConfig, NotificationPayload};
    use crate::pipeline::delivery::RetryPolicy;
    use crate::storage::SqliteStore;
    use crate::transport::{SendOutcome, Transport};

    const URL_U: &str = "https://www.eventbrite.ca/d/ca--los-angeles/all-events/";
    const URL_BROKEN: &str = "https://www.eventbrite.ca/d/broken/";

    /// Serves canned listings and lookups; fails for unknown URLs.
    #[derive(Default)]
    struct FakeSource {
        listings: HashMap<String, Vec<&'static str>>,
        events: HashMap<String, Value>,
        enrich_calls: StdMutex<Vec<BTreeSet<String>>>,
        hold: Option<(Arc<Notify>, Arc<Notify>)>,
        /// Appended to every lookup response
        extra: Vec<Value>,
    }

    #[async_trait]
    impl EventSource for FakeSource {
        async fn scan(&self, listing_url: &str) -> Result<BTreeSet<String>> {
            if let Some((entered, release)) = &self.hold {
                entered.notify_one();
                release.notified().await;
            }
            self.listings
                .get(listing_url)
                .map(|ids| ids.iter().map(|id| id.to_string()).collect())
                .ok_or_else(|| AppError::Status {
                    url: listing_url.to_string(),
                    status: 503,
                })
        }

        async fn enrich(&self, ids: &BTreeSet<String>) -> Result<Vec<Value>> {
            self.enrich_calls.lock().unwrap().push(ids.clone());
            let mut found: Vec<Value> =
                ids.iter().filter_map(|id| self.events.get(id).cloned()).collect();
            found.extend(self.extra.iter().cloned());
            Ok(found)
        }
    }

    /// Records every send and always accepts.
    #[derive(Default)]
    struct RecordingTransport {
        sent: StdMutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, destination: &str, payload: &NotificationPayload) -> SendOutcome {
            self.sent
                .lock()
                .unwrap()
                .push((destination.to_string(), payload.embeds[0].url.clone()));
            SendOutcome::Delivered
        }
    }

    fn raw_event(id: &str, date: &str) -> Value {
        json!({
            "id": id,
            "name": format!("Event {id}"),
            "summary": "summary",
            "url": format!("https://www.eventbrite.ca/e/{id}"),
            "timezone": "America/Los_Angeles",
            "start_date": date,
            "start_time": "19:00",
            "end_date": date,
            "end_time": "22:00"
        })
    }

    fn fixed_clock() -> Clock {
        Arc::new(|| Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap())
    }

    fn source_with_a_and_b() -> FakeSource {
        FakeSource {
            listings: HashMap::from([(URL_U.to_string(), vec!["A", "B", "A"])]),
            events: HashMap::from([
                ("A".to_string(), raw_event("A", "2026-11-01")),
                ("B".to_string(), raw_event("B", "2026-10-01")),
            ]),
            ..FakeSource::default()
        }
    }

    fn poller(
        store: Arc<SqliteStore>,
        source: Arc<FakeSource>,
        transport: Arc<RecordingTransport>,
    ) -> Poller {
        let delivery = DeliveryEngine::new(transport, &DeliveryConfig::default()).with_policy(
            RetryPolicy {
                max_attempts: 5,
                initial_backoff: Duration::from_millis(10),
            },
        );
        Poller::new(store, source, delivery, PollConfig::default()).with_clock(fixed_clock())
    }

    #[tokio::test]
    async fn test_end_to_end_delivers_future_event_once() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_tracker(URL_U, "D").unwrap();
        let source = Arc::new(source_with_a_and_b());
        let transport = Arc::new(RecordingTransport::default());
        let poller = poller(Arc::clone(&store), Arc::clone(&source), Arc::clone(&transport));

        let first = poller.run_pass().await.unwrap();
        assert_eq!(first.delivered, 1);
        assert_eq!(
            transport.sent(),
            vec![("D".to_string(), "https://www.eventbrite.ca/e/A".to_string())]
        );
        assert!(store.is_processed("A", "D").unwrap());
        assert!(!store.is_processed("B", "D").unwrap());

        let second = poller.run_pass().await.unwrap();
        assert_eq!(second.delivered, 0);
        assert_eq!(transport.sent().len(), 1);

        // Both passes looked up both ids in one call each
        let calls = source.enrich_calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].len(), 2);
    }

    #[tokio::test]
    async fn test_failing_tracker_does_not_stop_pass() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_tracker(URL_BROKEN, "D").unwrap();
        store.add_tracker(URL_U, "E").unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let poller = poller(
            Arc::clone(&store),
            Arc::new(source_with_a_and_b()),
            Arc::clone(&transport),
        );

        let report = poller.run_pass().await.unwrap();
        assert_eq!(report.trackers, 2);
        assert_eq!(report.failed_trackers, 1);
        assert_eq!(report.delivered, 1);
        assert!(store.is_processed("A", "E").unwrap());
        let broken = report
            .outcomes
            .iter()
            .find(|(t, _)| t.source_url == URL_BROKEN)
            .unwrap();
        assert!(broken.1.as_ref().unwrap_err().contains("503"));
    }

    #[tokio::test]
    async fn test_empty_listing_skips_lookup() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let source = Arc::new(FakeSource {
            listings: HashMap::from([(URL_U.to_string(), Vec::new())]),
            ..FakeSource::default()
        });
        let poller = poller(
            Arc::clone(&store),
            Arc::clone(&source),
            Arc::new(RecordingTransport::default()),
        );

        let report = poller.poll_tracker(&Tracker::new(URL_U, "D")).await.unwrap();
        assert_eq!(report, TrackerReport::default());
        assert!(source.enrich_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_event_on_two_listings_announced_once_per_destination() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let other = "https://www.eventbrite.ca/d/ca--los-angeles/music/";
        store.add_tracker(URL_U, "D").unwrap();
        store.add_tracker(other, "D").unwrap();
        let mut source = source_with_a_and_b();
        source.listings.insert(other.to_string(), vec!["A"]);
        let transport = Arc::new(RecordingTransport::default());
        let poller = poller(Arc::clone(&store), Arc::new(source), Arc::clone(&transport));

        let report = poller.run_pass().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_event_in_lookup_announced_once() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_tracker(URL_U, "D").unwrap();
        let mut source = source_with_a_and_b();
        source.extra = vec![raw_event("A", "2026-11-01")];
        let transport = Arc::new(RecordingTransport::default());
        let poller = poller(Arc::clone(&store), Arc::new(source), Arc::clone(&transport));

        let report = poller.run_pass().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(transport.sent().len(), 1);
        assert!(store.is_processed("A", "D").unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_pass() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_tracker(URL_U, "D").unwrap();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut source = source_with_a_and_b();
        source.hold = Some((Arc::clone(&entered), Arc::clone(&release)));
        let transport = Arc::new(RecordingTransport::default());
        let poller = Arc::new(poller(
            Arc::clone(&store),
            Arc::new(source),
            Arc::clone(&transport),
        ));

        // Shutdown fires as soon as the first pass is mid-scan
        let shutdown = {
            let entered = Arc::clone(&entered);
            async move { entered.notified().await }
        };
        let running = tokio::spawn(Arc::clone(&poller).run(shutdown));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!running.is_finished());

        release.notify_one();
        running.await.unwrap();
        assert_eq!(transport.sent().len(), 1);
        assert!(store.is_processed("A", "D").unwrap());
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_tracker(URL_U, "D").unwrap();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut source = source_with_a_and_b();
        source.hold = Some((Arc::clone(&entered), Arc::clone(&release)));
        let poller = Arc::new(poller(
            store,
            Arc::new(source),
            Arc::new(RecordingTransport::default()),
        ));

        let running = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.run_pass().await }
        });
        entered.notified().await;

        assert!(poller.run_pass().await.is_none());

        release.notify_one();
        let report = running.await.unwrap().unwrap();
        assert_eq!(report.delivered, 1);
    }
}
