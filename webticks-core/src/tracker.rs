//! Event tracker: recording API, batching and the flush cycle
//!
//! A [`Tracker`] owns the event queue. Recording appends to it and never
//! suspends. A flush swaps the queue out, releases the lock, transmits the
//! batch through the adapter, then either discards the batch or requeues it
//! in front of anything recorded in the meantime:
//!
//! ```text
//!            queue empty
//!   Idle ◄──────────────── flush()
//!                            │ queue non-empty
//!                            ▼
//!                        Draining ── live queue reset
//!                            │
//!                            ▼
//!                       Awaiting-Ack
//!                     2xx /       \ other status / transport error
//!                        ▼         ▼
//!                  Committed     Requeued
//! ```
//!
//! Flushes are triggered by the periodic timer while automatic tracking is
//! active, by the adapter's page-termination signal, or manually. At most
//! one flush is past the drain step at a time.
//!
//! `Tracker` is a cheap handle: clones share the same queue and lifecycle.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::adapter::host::BrowserHost;
use crate::adapter::{BrowserAdapter, PlatformAdapter, ServerAdapter, TrackingSink};
use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::identity::{IdGenerator, UuidGenerator};
use crate::queue::EventQueue;
use crate::transport::HttpTransport;
use crate::types::{BatchPayload, Event, EventKind, ServerRequest};

/// Result of one [`Tracker::flush`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Queue was empty, nothing was sent
    Idle,
    /// Batch acknowledged and discarded
    Committed { sent: usize },
    /// Batch not acknowledged and put back in the queue
    Requeued { pending: usize, dropped: usize },
}

impl FlushOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, FlushOutcome::Committed { .. })
    }

    pub fn is_requeued(&self) -> bool {
        matches!(self, FlushOutcome::Requeued { .. })
    }
}

/// Delivery counters since the tracker was created
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    /// Events in acknowledged batches
    pub events_sent: usize,
    /// Flushes that transmitted a batch
    pub flushes: usize,
    /// Flushes whose batch was requeued
    pub failed_flushes: usize,
    /// Events dropped by the queue bound
    pub events_dropped: usize,
}

struct TrackerState {
    queue: EventQueue,
    /// Location seen by the last page change check
    last_path: Option<String>,
    last_timestamp: Option<DateTime<Utc>>,
    stats: TrackerStats,
}

/// Handle on the running flush timer
struct AutoTracking {
    shutdown: watch::Sender<bool>,
}

struct Shared {
    config: TrackerConfig,
    adapter: Arc<dyn PlatformAdapter>,
    ids: Arc<dyn IdGenerator>,
    user_id: String,
    session_id: String,
    state: Mutex<TrackerState>,
    /// Held by a flush from drain until its outcome is applied
    flushing: tokio::sync::Mutex<()>,
    auto: Mutex<Option<AutoTracking>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if self.auto.get_mut().take().is_some() {
            self.adapter.teardown_auto_tracking();
        }
    }
}

/// Records events and delivers them in batches.
#[derive(Clone)]
pub struct Tracker {
    shared: Arc<Shared>,
}

impl Tracker {
    /// Create a tracker over an adapter.
    ///
    /// Fails only when the configuration does not validate.
    pub fn new(config: TrackerConfig, adapter: Arc<dyn PlatformAdapter>) -> Result<Self> {
        Self::with_id_generator(config, adapter, Arc::new(UuidGenerator))
    }

    /// Create a tracker whose session and request ids come from `ids`
    pub fn with_id_generator(
        config: TrackerConfig,
        adapter: Arc<dyn PlatformAdapter>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        config.validate()?;

        let user_id = adapter.user_id();
        let session_id = ids.generate();
        info!(
            platform = %adapter.platform(),
            destination = %config.destination_url,
            session_id = %session_id,
            "Tracker created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TrackerState {
                    queue: EventQueue::new(config.max_queue_size),
                    last_path: None,
                    last_timestamp: None,
                    stats: TrackerStats::default(),
                }),
                flushing: tokio::sync::Mutex::new(()),
                auto: Mutex::new(None),
                config,
                adapter,
                ids,
                user_id,
                session_id,
            }),
        })
    }

    /// Tracker for a server process, delivering over HTTP
    pub fn for_server(config: TrackerConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::new(config, Arc::new(ServerAdapter::new(transport)))
    }

    /// Tracker for a browser page, delivering over HTTP
    pub fn for_browser(config: TrackerConfig, host: Arc<dyn BrowserHost>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::new(config, Arc::new(BrowserAdapter::new(host, transport)))
    }

    // ============================================
    // Recording
    // ============================================

    /// Queue a page view for `path`.
    pub fn record_page_view(&self, path: impl Into<String>) -> Event {
        let kind = EventKind::PageView { path: path.into() };
        self.enqueue(&mut self.shared.state.lock(), kind)
    }

    /// Queue a custom event.
    ///
    /// `details` is normally a JSON object. `null` becomes an empty object and
    /// any other value is stored under a `value` key.
    pub fn record_custom_event(&self, name: impl Into<String>, details: Value) -> Event {
        let name = name.into();
        let details = match details {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                warn!(event = %name, "Custom event details are not an object, wrapping under \"value\"");
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        let kind = EventKind::Custom {
            name,
            details,
            path: self.shared.adapter.current_path(),
        };
        self.enqueue(&mut self.shared.state.lock(), kind)
    }

    /// Queue an inbound request reported by the host framework.
    pub fn record_server_request(&self, request: ServerRequest) -> Event {
        self.enqueue(&mut self.shared.state.lock(), request.into())
    }

    /// Record a page view if the adapter's location differs from the last
    /// one observed. Returns true when a page view was queued.
    pub fn check_page_change(&self) -> bool {
        let Some(current) = self.shared.adapter.current_path() else {
            return false;
        };

        let mut state = self.shared.state.lock();
        if state.last_path.as_deref() == Some(current.as_str()) {
            return false;
        }

        debug!(
            from = state.last_path.as_deref().unwrap_or(""),
            to = %current,
            "Page change detected"
        );
        state.last_path = Some(current.clone());
        self.enqueue(&mut state, EventKind::PageView { path: current });
        true
    }

    fn enqueue(&self, state: &mut TrackerState, kind: EventKind) -> Event {
        let mut timestamp = Utc::now();
        if let Some(last) = state.last_timestamp {
            if timestamp < last {
                timestamp = last;
            }
        }
        state.last_timestamp = Some(timestamp);

        let event = Event::new(self.shared.ids.generate(), kind, timestamp);
        let dropped = state.queue.push(event.clone());
        if dropped > 0 {
            state.stats.events_dropped += dropped;
            warn!(
                dropped,
                capacity = state.queue.capacity(),
                "Event queue full, dropped oldest events"
            );
        }

        if self.shared.config.debug {
            info!(
                event_type = %event.event_type(),
                request_id = %event.request_id(),
                queued = state.queue.len(),
                "Event queued"
            );
        } else {
            trace!(
                event_type = %event.event_type(),
                request_id = %event.request_id(),
                queued = state.queue.len(),
                "Event queued"
            );
        }

        event
    }

    // ============================================
    // Delivery
    // ============================================

    /// Drain the queue and transmit it as one batch.
    ///
    /// Never fails: a rejected or failed transmission puts the batch back in
    /// front of the queue. Overlapping calls run one after another, so a
    /// requeued batch always lands ahead of events recorded after it.
    pub async fn flush(&self) -> FlushOutcome {
        let _flushing = self.shared.flushing.lock().await;

        let events = {
            let mut state = self.shared.state.lock();
            if state.queue.is_empty() {
                return FlushOutcome::Idle;
            }
            state.queue.drain()
        };

        let batch = BatchPayload {
            user_id: self.shared.user_id.clone(),
            session_id: self.shared.session_id.clone(),
            events,
            sent_at: Utc::now(),
        };
        let sent = batch.len();

        let result = self
            .shared
            .adapter
            .send_batch(&self.shared.config.destination_url, &batch)
            .await;

        match result {
            Ok(delivery) if delivery.is_acknowledged() => {
                let mut state = self.shared.state.lock();
                state.stats.flushes += 1;
                state.stats.events_sent += sent;
                debug!(sent, status = delivery.status(), "Batch delivered");
                FlushOutcome::Committed { sent }
            }
            other => {
                match &other {
                    Ok(delivery) => warn!(
                        status = delivery.status(),
                        events = sent,
                        "Batch not acknowledged, requeuing"
                    ),
                    Err(e) => warn!(error = %e, events = sent, "Failed to send batch, requeuing"),
                }

                let mut state = self.shared.state.lock();
                let dropped = state.queue.requeue(batch.events);
                state.stats.flushes += 1;
                state.stats.failed_flushes += 1;
                state.stats.events_dropped += dropped;
                if dropped > 0 {
                    warn!(
                        dropped,
                        capacity = state.queue.capacity(),
                        "Event queue full after requeue, dropped oldest events"
                    );
                }
                FlushOutcome::Requeued {
                    pending: state.queue.len(),
                    dropped,
                }
            }
        }
    }

    // ============================================
    // Lifecycle
    // ============================================

    /// Install the adapter's automatic tracking and start the flush timer.
    ///
    /// Returns false without changing anything when tracking is already
    /// active, when no Tokio runtime is running, or when the adapter could
    /// not install its listeners.
    pub fn start_automatic_tracking(&self) -> bool {
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                let err = Error::Environment(format!("no Tokio runtime: {}", e));
                warn!(error = %err, "Automatic tracking disabled");
                return false;
            }
        };

        let mut auto = self.shared.auto.lock();
        if auto.is_some() {
            warn!("Automatic tracking already active");
            return false;
        }

        let sink = Arc::new(TrackerLink {
            shared: Arc::downgrade(&self.shared),
            runtime: runtime.clone(),
        });
        if let Err(e) = self.shared.adapter.setup_auto_tracking(sink) {
            warn!(error = %e, "Adapter could not set up automatic tracking");
            return false;
        }

        if let Some(current) = self.shared.adapter.current_path() {
            let mut state = self.shared.state.lock();
            state.last_path = Some(current.clone());
            self.enqueue(&mut state, EventKind::PageView { path: current });
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        runtime.spawn(flush_loop(
            Arc::downgrade(&self.shared),
            self.shared.config.flush_interval(),
            shutdown_rx,
        ));
        *auto = Some(AutoTracking { shutdown });

        info!(
            interval_ms = self.shared.config.flush_interval_ms,
            "Automatic tracking started"
        );
        true
    }

    /// Stop the flush timer and remove the adapter's listeners.
    ///
    /// Queued events stay queued. A flush already in flight still completes
    /// and applies its outcome.
    pub fn destroy(&self) {
        let Some(auto) = self.shared.auto.lock().take() else {
            debug!("Tracker destroyed with automatic tracking inactive");
            return;
        };

        // The receiver is gone if the timer task already exited.
        let _ = auto.shutdown.send(true);
        self.shared.adapter.teardown_auto_tracking();
        info!(queued = self.queue_len(), "Automatic tracking stopped");
    }

    // ============================================
    // Accessors
    // ============================================

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Snapshot of the queued events, oldest first
    pub fn queued_events(&self) -> Vec<Event> {
        self.shared.state.lock().queue.iter().cloned().collect()
    }

    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.shared.config
    }

    /// Whether automatic tracking is active
    pub fn is_tracking(&self) -> bool {
        self.shared.auto.lock().is_some()
    }

    pub fn stats(&self) -> TrackerStats {
        self.shared.state.lock().stats
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("platform", &self.shared.adapter.platform())
            .field("session_id", &self.shared.session_id)
            .field("queued", &self.queue_len())
            .field("tracking", &self.is_tracking())
            .finish()
    }
}

/// Periodic flush task. Shutdown is only observed between flushes.
async fn flush_loop(
    shared: Weak<Shared>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let outcome = Tracker { shared }.flush().await;
                trace!(?outcome, "Timer flush finished");
            }
            // Either a shutdown signal or the sender was dropped
            _ = shutdown.changed() => break,
        }
    }
    debug!("Flush timer stopped");
}

/// [`TrackingSink`] handed to the adapter. Holds the tracker weakly so
/// installed listeners never keep it alive.
struct TrackerLink {
    shared: Weak<Shared>,
    runtime: Handle,
}

impl TrackerLink {
    fn tracker(&self) -> Option<Tracker> {
        self.shared.upgrade().map(|shared| Tracker { shared })
    }
}

impl TrackingSink for TrackerLink {
    fn location_changed(&self) {
        if let Some(tracker) = self.tracker() {
            tracker.check_page_change();
        }
    }

    fn visibility_changed(&self, visible: bool) {
        if let Some(tracker) = self.tracker() {
            tracker.record_custom_event("visibility_change", serde_json::json!({ "visible": visible }));
        }
    }

    fn page_terminating(&self) {
        let Some(tracker) = self.tracker() else {
            return;
        };
        debug!("Page terminating, attempting final flush");
        self.runtime.spawn(async move {
            tracker.flush().await;
        });
    }
}
