//! Integration tests for the tracker lifecycle
//!
//! These tests drive a [`Tracker`] through real adapters (a server adapter
//! and a browser adapter over [`HeadlessBrowser`]) with a scripted transport,
//! covering the flush timer, requeue ordering and navigation tracking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;
use webticks_core::adapter::host::{BrowserHost, HeadlessBrowser, HistoryMethod, HostEventKind};
use webticks_core::identity::KeyValueStore;
use webticks_core::transport::{Delivery, Transport};
use webticks_core::{
    BatchPayload, BrowserAdapter, Event, EventKind, EventType, FlushOutcome, Result, ServerAdapter,
    ServerRequest, Tracker, TrackerConfig,
};

/// Transport whose outcome can be flipped between flushes
struct ScriptedTransport {
    succeed: AtomicBool,
    delay: Option<Duration>,
    sent: Mutex<Vec<(String, BatchPayload)>>,
}

impl ScriptedTransport {
    fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            succeed: AtomicBool::new(succeed),
            delay: None,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            succeed: AtomicBool::new(true),
            delay: Some(delay),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    fn batches(&self) -> Vec<BatchPayload> {
        self.sent.lock().iter().map(|(_, b)| b.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, url: &str, batch: &BatchPayload) -> Result<Delivery> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().push((url.to_string(), batch.clone()));
        if self.succeed.load(Ordering::SeqCst) {
            Ok(Delivery::from_status(200))
        } else {
            Ok(Delivery::from_status(503))
        }
    }
}

fn config(flush_interval_ms: u64) -> TrackerConfig {
    TrackerConfig {
        flush_interval_ms,
        ..TrackerConfig::with_destination("https://collect.example.com/api/track")
    }
}

fn server_tracker(transport: Arc<ScriptedTransport>, flush_interval_ms: u64) -> Tracker {
    webticks_core::logging::init_test();
    Tracker::new(
        config(flush_interval_ms),
        Arc::new(ServerAdapter::new(transport)),
    )
    .expect("valid config")
}

fn browser_tracker(
    host: Arc<HeadlessBrowser>,
    transport: Arc<ScriptedTransport>,
) -> Tracker {
    webticks_core::logging::init_test();
    let config = TrackerConfig {
        flush_interval_ms: 1000,
        ..TrackerConfig::default()
    };
    Tracker::new(config, Arc::new(BrowserAdapter::new(host, transport))).expect("valid config")
}

fn custom_names(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e.kind() {
            EventKind::Custom { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

fn page_views(tracker: &Tracker) -> Vec<String> {
    tracker
        .queued_events()
        .iter()
        .filter(|e| e.event_type() == EventType::PageView)
        .filter_map(|e| e.path().map(str::to_string))
        .collect()
}

// ============================================
// Flush Cycle
// ============================================

#[tokio::test(start_paused = true)]
async fn test_timer_requeues_then_delivers() {
    let transport = ScriptedTransport::new(false);
    let tracker = server_tracker(transport.clone(), 1000);
    assert!(tracker.start_automatic_tracking());

    let event = tracker.record_custom_event("click", json!({"n": 1}));
    assert_eq!(tracker.queue_len(), 1);
    assert_eq!(event.event_type(), EventType::Custom);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(transport.batches().len(), 1);
    assert_eq!(tracker.queue_len(), 1);

    transport.set_succeed(true);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(tracker.queue_len(), 0);

    let batches = transport.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].events[0].request_id(), event.request_id());

    tracker.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_destroy_stops_timer() {
    let transport = ScriptedTransport::new(true);
    let tracker = server_tracker(transport.clone(), 1000);
    tracker.start_automatic_tracking();
    tracker.destroy();

    tracker.record_custom_event("late", json!({}));
    tokio::time::sleep(Duration::from_millis(5000)).await;

    assert!(transport.batches().is_empty());
    assert_eq!(tracker.queue_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_flush_survives_destroy() {
    let transport = ScriptedTransport::with_delay(Duration::from_millis(500));
    let tracker = server_tracker(transport.clone(), 60_000);
    tracker.start_automatic_tracking();
    tracker.record_custom_event("first", json!({}));

    let flushing = tracker.clone();
    let handle = tokio::spawn(async move { flushing.flush().await });
    while tracker.queue_len() != 0 {
        tokio::task::yield_now().await;
    }

    tracker.destroy();
    // Recorded while the batch is awaiting acknowledgement
    tracker.record_custom_event("second", json!({}));

    let outcome = handle.await.unwrap();
    assert_eq!(outcome, FlushOutcome::Committed { sent: 1 });
    assert_eq!(tracker.queue_len(), 1);
    assert_eq!(transport.batches()[0].events.len(), 1);
}

#[tokio::test]
async fn test_requeued_batch_precedes_newer_events() {
    let transport = ScriptedTransport::new(false);
    let tracker = server_tracker(transport.clone(), 10_000);

    tracker.record_custom_event("a", json!({}));
    tracker.record_custom_event("b", json!({}));
    assert!(tracker.flush().await.is_requeued());

    tracker.record_custom_event("c", json!({}));
    transport.set_succeed(true);
    assert_eq!(tracker.flush().await, FlushOutcome::Committed { sent: 3 });

    assert_eq!(custom_names(&transport.batches()[1].events), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_failed_flushes_keep_order() {
    let transport = ScriptedTransport::with_delay(Duration::from_millis(100));
    transport.set_succeed(false);
    let tracker = server_tracker(transport.clone(), 60_000);

    tracker.record_custom_event("a", json!({}));
    let first = tokio::spawn({
        let tracker = tracker.clone();
        async move { tracker.flush().await }
    });
    while tracker.queue_len() != 0 {
        tokio::task::yield_now().await;
    }

    // Recorded while the first batch is awaiting a response
    tracker.record_custom_event("b", json!({}));
    let second = tokio::spawn({
        let tracker = tracker.clone();
        async move { tracker.flush().await }
    });

    assert!(first.await.unwrap().is_requeued());
    assert!(second.await.unwrap().is_requeued());

    let queued = tracker.queued_events();
    assert_eq!(custom_names(&queued), vec!["a", "b"]);
    assert!(queued.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));

    // The second flush waited for the first and resent both in order
    let batches = transport.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(custom_names(&batches[0].events), vec!["a"]);
    assert_eq!(custom_names(&batches[1].events), vec!["a", "b"]);
    assert_eq!(tracker.stats().failed_flushes, 2);
}

#[tokio::test]
async fn test_empty_flush_does_no_io() {
    let transport = ScriptedTransport::new(true);
    let tracker = server_tracker(transport.clone(), 10_000);

    assert_eq!(tracker.flush().await, FlushOutcome::Idle);
    assert_eq!(tracker.flush().await, FlushOutcome::Idle);
    assert!(transport.batches().is_empty());
}

#[tokio::test]
async fn test_batch_payload_identity() {
    let transport = ScriptedTransport::new(true);
    let tracker = server_tracker(transport.clone(), 10_000);
    tracker.record_custom_event("a", json!({}));
    tracker.flush().await;

    let sent = transport.sent.lock();
    let (url, batch) = &sent[0];
    assert_eq!(url, "https://collect.example.com/api/track");
    assert_eq!(batch.user_id, tracker.user_id());
    assert_eq!(batch.session_id, tracker.session_id());
    assert_ne!(batch.user_id, batch.session_id);
}

#[tokio::test]
async fn test_unreachable_collector_requeues() {
    webticks_core::logging::init_test();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let destination = format!("http://{}/api/track", listener.local_addr().unwrap());
    drop(listener);

    let tracker =
        Tracker::for_server(TrackerConfig::with_destination(destination)).expect("valid config");
    tracker.record_custom_event("a", json!({}));

    assert_eq!(
        tracker.flush().await,
        FlushOutcome::Requeued {
            pending: 1,
            dropped: 0
        }
    );
    assert_eq!(tracker.stats().failed_flushes, 1);
}

// ============================================
// Server Adapter
// ============================================

#[tokio::test]
async fn test_server_request_is_recorded() {
    let transport = ScriptedTransport::new(true);
    let tracker = server_tracker(transport, 10_000);

    // No location on a server, so no initial page view
    assert!(tracker.start_automatic_tracking());
    assert_eq!(tracker.queue_len(), 0);

    let event = tracker.record_server_request(ServerRequest::new("GET", "/x"));
    assert_eq!(event.event_type(), EventType::ServerRequest);
    assert_eq!(event.path(), Some("/x"));

    let custom = tracker.record_custom_event("cache_miss", json!({}));
    assert_eq!(custom.path(), None);
    tracker.destroy();
}

// ============================================
// Browser Adapter
// ============================================

#[tokio::test]
async fn test_identical_navigations_record_one_page_view() {
    let host = Arc::new(HeadlessBrowser::new("https://example.com/").unwrap());
    let tracker = browser_tracker(host.clone(), ScriptedTransport::new(true));
    tracker.start_automatic_tracking();

    host.push_state(json!(null), Some("/pricing")).unwrap();
    host.push_state(json!(null), Some("/pricing")).unwrap();
    host.replace_state(json!(null), None).unwrap();

    assert_eq!(
        page_views(&tracker),
        vec!["https://example.com/", "https://example.com/pricing"]
    );
    tracker.destroy();
}

#[tokio::test]
async fn test_navigation_api_host() {
    let host = Arc::new(
        HeadlessBrowser::builder("https://example.com/")
            .navigation_api(true)
            .build()
            .unwrap(),
    );
    let tracker = browser_tracker(host.clone(), ScriptedTransport::new(true));
    tracker.start_automatic_tracking();

    host.push_state(json!(null), Some("/a")).unwrap();
    host.push_state(json!(null), Some("/b")).unwrap();
    assert!(host.back());

    assert_eq!(
        page_views(&tracker),
        vec![
            "https://example.com/",
            "https://example.com/a",
            "https://example.com/b",
            "https://example.com/a",
        ]
    );

    tracker.destroy();
    assert_eq!(host.listener_count(HostEventKind::NavigateSuccess), 0);
}

#[tokio::test]
async fn test_start_twice_changes_nothing() {
    let host = Arc::new(HeadlessBrowser::new("https://example.com/").unwrap());
    let tracker = browser_tracker(host.clone(), ScriptedTransport::new(true));

    assert!(tracker.start_automatic_tracking());
    let queued = tracker.queue_len();
    let listeners = host.listener_count(HostEventKind::PopState);

    assert!(!tracker.start_automatic_tracking());
    assert_eq!(tracker.queue_len(), queued);
    assert_eq!(host.listener_count(HostEventKind::PopState), listeners);

    tracker.destroy();
}

#[tokio::test]
async fn test_destroy_restores_history() {
    let host = Arc::new(HeadlessBrowser::new("https://example.com/").unwrap());
    let original = host.history_entry(HistoryMethod::PushState);
    let tracker = browser_tracker(host.clone(), ScriptedTransport::new(true));

    tracker.start_automatic_tracking();
    tracker.destroy();

    assert!(Arc::ptr_eq(
        &original,
        &host.history_entry(HistoryMethod::PushState)
    ));
    host.push_state(json!(null), Some("/after")).unwrap();
    assert_eq!(page_views(&tracker), vec!["https://example.com/"]);
}

#[tokio::test(start_paused = true)]
async fn test_visibility_and_page_hide() {
    let host = Arc::new(HeadlessBrowser::new("https://example.com/app").unwrap());
    let transport = ScriptedTransport::new(true);
    let tracker = browser_tracker(host.clone(), transport.clone());
    tracker.start_automatic_tracking();

    host.set_hidden(true);
    let last = tracker.queued_events().pop().unwrap();
    match last.kind() {
        EventKind::Custom { name, details, path } => {
            assert_eq!(name, "visibility_change");
            assert_eq!(details["visible"], false);
            assert_eq!(path.as_deref(), Some("https://example.com/app"));
        }
        other => panic!("unexpected kind: {:?}", other),
    }

    // Page hide spawns a best-effort flush
    host.hide_page();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(tracker.queue_len(), 0);
    let sent = transport.sent.lock();
    assert_eq!(sent.len(), 1);
    // Relative destination resolved against the page
    assert_eq!(sent[0].0, "https://example.com/api/track");
    assert_eq!(sent[0].1.events.len(), 2);
    drop(sent);

    tracker.destroy();
}

#[test]
fn test_browser_user_id_is_durable() {
    let host = Arc::new(HeadlessBrowser::new("https://example.com/").unwrap());
    let first = browser_tracker(host.clone(), ScriptedTransport::new(true));
    let second = browser_tracker(host.clone(), ScriptedTransport::new(true));

    assert_eq!(first.user_id(), second.user_id());
    assert_ne!(first.session_id(), second.session_id());
    assert_eq!(
        host.storage().get_item("webticks_uid").as_deref(),
        Some(first.user_id())
    );
}

// ============================================
// Conservation
// ============================================

#[derive(Debug, Clone)]
enum Op {
    Record,
    Flush { succeed: bool },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Record),
        1 => any::<bool>().prop_map(|succeed| Op::Flush { succeed }),
    ]
}

proptest! {
    #[test]
    fn prop_committed_plus_queued_equals_recorded(ops in prop::collection::vec(op(), 0..60)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let transport = ScriptedTransport::new(true);
        let tracker = server_tracker(transport.clone(), 10_000);

        let mut recorded = Vec::new();
        let mut committed = Vec::new();
        for op in ops {
            match op {
                Op::Record => {
                    let event = tracker.record_custom_event("tick", json!({}));
                    recorded.push(event.request_id().to_string());
                }
                Op::Flush { succeed } => {
                    transport.set_succeed(succeed);
                    if runtime.block_on(tracker.flush()).is_committed() {
                        let batch = transport.batches().pop().unwrap();
                        committed.extend(batch.events.iter().map(|e| e.request_id().to_string()));
                    }
                }
            }
        }

        let mut accounted = committed;
        accounted.extend(tracker.queued_events().iter().map(|e| e.request_id().to_string()));

        // Every committed batch emptied the queue, so committed events form a
        // prefix of the recording order and the queue holds the rest.
        prop_assert_eq!(accounted, recorded);
    }
}
