//! Reconnection manager tests against a scripted in-memory transport.
//!
//! All tests run on a paused tokio clock, so the backoff schedule is checked
//! deterministically: advancing to just before a deadline must not produce a
//! connection attempt, advancing past it must produce exactly one.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use url::Url;

use gather_client::cache::{CacheKey, CacheRouter, Notice, StaleTracker};
use gather_client::manager::{self, ConnectionState};
use gather_client::transport::{Connector, Transport, TransportError, TransportEvent};
use gather_wire::ClientFrame;

/// What the next `connect` call should do.
enum Script {
    Refuse,
    Accept,
}

/// The far end of an accepted fake transport.
struct FakeRemote {
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    sent_rx: mpsc::UnboundedReceiver<String>,
    closed: Arc<Mutex<Option<u16>>>,
}

impl FakeRemote {
    fn push(&self, event: TransportEvent) {
        let _ = self.event_tx.send(event);
    }

    fn close_code(&self) -> Option<u16> {
        *self.closed.lock().unwrap()
    }
}

#[derive(Default)]
struct FakeState {
    script: Mutex<VecDeque<Script>>,
    connects: Mutex<usize>,
    remote: Mutex<Option<FakeRemote>>,
}

#[derive(Clone, Default)]
struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    fn script(&self, steps: impl IntoIterator<Item = Script>) {
        self.state.script.lock().unwrap().extend(steps);
    }

    fn connect_count(&self) -> usize {
        *self.state.connects.lock().unwrap()
    }

    fn take_remote(&self) -> FakeRemote {
        self.state
            .remote
            .lock()
            .unwrap()
            .take()
            .expect("no accepted transport")
    }
}

struct FakeTransport {
    event_rx: mpsc::UnboundedReceiver<TransportEvent>,
    sent_tx: mpsc::UnboundedSender<String>,
    closed: Arc<Mutex<Option<u16>>>,
}

impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&mut self, _url: &Url) -> Result<FakeTransport, TransportError> {
        *self.state.connects.lock().unwrap() += 1;
        let step = self
            .state
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Refuse);

        match step {
            Script::Refuse => Err(TransportError::Refused("scripted refusal".into())),
            Script::Accept => {
                let (event_tx, event_rx) = mpsc::unbounded_channel();
                let (sent_tx, sent_rx) = mpsc::unbounded_channel();
                let closed = Arc::new(Mutex::new(None));
                *self.state.remote.lock().unwrap() = Some(FakeRemote {
                    event_tx,
                    sent_rx,
                    closed: closed.clone(),
                });
                Ok(FakeTransport {
                    event_rx,
                    sent_tx,
                    closed,
                })
            }
        }
    }
}

impl Transport for FakeTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let _ = self.sent_tx.send(text);
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.event_rx.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed { code: 1006 },
        }
    }

    async fn close(&mut self, code: u16) {
        *self.closed.lock().unwrap() = Some(code);
    }
}

fn test_url() -> Url {
    Url::parse("ws://localhost:1/ws").unwrap()
}

/// Let spawned tasks run and the paused clock tick forward a hair.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Advance the paused clock in 50ms steps until the connector has made
/// `target` attempts, returning how far we advanced. Panics past `cap_ms`.
async fn advance_until_connects(connector: &FakeConnector, target: usize, cap_ms: u64) -> u64 {
    let mut elapsed = 0u64;
    while connector.connect_count() < target {
        assert!(elapsed < cap_ms, "no connect attempt within {cap_ms}ms");
        advance(50).await;
        elapsed += 50;
    }
    elapsed
}

struct Harness {
    connector: FakeConnector,
    identity_tx: watch::Sender<Option<String>>,
    handle: manager::ClientHandle,
    tracker: Arc<StaleTracker>,
    notices: mpsc::UnboundedReceiver<Notice>,
}

fn start(script: Vec<Script>) -> Harness {
    let connector = FakeConnector::default();
    connector.script(script);

    let tracker = Arc::new(StaleTracker::new());
    let (router, notices) = CacheRouter::new(tracker.clone());
    let (identity_tx, identity_rx) = watch::channel(Some("u-1".to_string()));

    let handle = manager::spawn(connector.clone(), test_url(), identity_rx, router);

    Harness {
        connector,
        identity_tx,
        handle,
        tracker,
        notices,
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_schedule_doubles_caps_and_gives_up() {
    let h = start(vec![Script::Accept]);
    settle().await;
    assert_eq!(h.connector.connect_count(), 1);
    assert!(h.handle.is_connected());

    // Abnormal close while logged in: the reconnection policy kicks in
    let remote = h.connector.take_remote();
    remote.push(TransportEvent::Closed { code: 1006 });
    settle().await;
    assert_eq!(h.handle.state(), ConnectionState::Reconnecting);

    // 1s, 2s, 4s, 8s, 10s (capped); each fires exactly one attempt
    for (i, delay_ms) in [1_000u64, 2_000, 4_000, 8_000, 10_000].iter().enumerate() {
        let target = h.connector.connect_count() + 1;
        let waited = advance_until_connects(&h.connector, target, 30_000).await;
        assert!(
            waited >= delay_ms - 100 && waited <= delay_ms + 100,
            "retry {} fired after {}ms, expected ~{}ms",
            i + 1,
            waited,
            delay_ms
        );
    }

    // Budget spent: disconnected for good until identity moves
    advance(60_000).await;
    assert_eq!(h.connector.connect_count(), 6);
    assert!(!h.handle.is_connected());
    assert_eq!(h.handle.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn attempt_counter_resets_on_successful_open() {
    // Two refusals, then an accept: delays 1s and 2s before the open
    let h = start(vec![Script::Refuse, Script::Refuse, Script::Accept, Script::Accept]);
    settle().await;
    assert_eq!(h.connector.connect_count(), 1);

    advance(1_100).await;
    assert_eq!(h.connector.connect_count(), 2);
    advance(2_100).await;
    assert_eq!(h.connector.connect_count(), 3);
    assert!(h.handle.is_connected());

    // After a successful open the next failure starts the ladder over at 1s
    let remote = h.connector.take_remote();
    remote.push(TransportEvent::Closed { code: 1006 });
    settle().await;

    advance(900).await;
    assert_eq!(h.connector.connect_count(), 3, "reset retry fired early");
    advance(200).await;
    assert_eq!(h.connector.connect_count(), 4);
    assert!(h.handle.is_connected());
}

#[tokio::test(start_paused = true)]
async fn close_during_pending_timer_yields_single_transport() {
    let h = start(vec![Script::Accept, Script::Accept]);
    settle().await;

    let remote = h.connector.take_remote();
    remote.push(TransportEvent::Closed { code: 1006 });
    // A second close event from the dead transport must not double-schedule
    remote.push(TransportEvent::Closed { code: 1006 });
    settle().await;

    advance(500).await;
    assert_eq!(h.connector.connect_count(), 1, "reconnected before the timer");
    advance(600).await;
    assert_eq!(h.connector.connect_count(), 2, "expected exactly one reconnect");
    assert!(h.handle.is_connected());

    // And nothing else is outstanding
    advance(30_000).await;
    assert_eq!(h.connector.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn logout_clears_pending_reconnect_timer() {
    let h = start(vec![Script::Accept]);
    settle().await;

    let remote = h.connector.take_remote();
    remote.push(TransportEvent::Closed { code: 1006 });
    settle().await;
    assert_eq!(h.handle.state(), ConnectionState::Reconnecting);

    // Logout while the backoff timer is pending
    h.identity_tx.send(None).unwrap();
    settle().await;
    assert_eq!(h.handle.state(), ConnectionState::Idle);

    // Well past every would-be backoff deadline: no attempt fires
    advance(120_000).await;
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn logout_closes_open_transport_normally() {
    let h = start(vec![Script::Accept]);
    settle().await;
    assert!(h.handle.is_connected());

    let remote = h.connector.take_remote();
    h.identity_tx.send(None).unwrap();
    settle().await;

    assert_eq!(remote.close_code(), Some(1000));
    assert!(!h.handle.is_connected());
    advance(60_000).await;
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn normal_close_suppresses_reconnect_until_relogin() {
    let h = start(vec![Script::Accept, Script::Accept]);
    settle().await;

    // Server-initiated graceful shutdown
    let remote = h.connector.take_remote();
    remote.push(TransportEvent::Closed { code: 1000 });
    settle().await;
    assert!(!h.handle.is_connected());

    advance(60_000).await;
    assert_eq!(h.connector.connect_count(), 1, "reconnected after normal close");

    // An identity transition restarts the cycle
    h.identity_tx.send(Some("u-1".to_string())).unwrap();
    settle().await;
    assert_eq!(h.connector.connect_count(), 2);
    assert!(h.handle.is_connected());
}

#[tokio::test(start_paused = true)]
async fn send_is_dropped_unless_open() {
    let h = start(vec![Script::Accept]);

    // Not yet connected: silently dropped
    h.handle.send(ClientFrame::MarkRead {
        conversation_id: "c-1".into(),
    });

    settle().await;
    assert!(h.handle.is_connected());
    let mut remote = h.connector.take_remote();

    h.handle.send(ClientFrame::MarkRead {
        conversation_id: "c-2".into(),
    });
    settle().await;

    let sent = remote.sent_rx.try_recv().expect("frame should reach transport");
    assert!(sent.contains(r#""type":"mark_read""#));
    assert!(sent.contains("c-2"));
    // The pre-open send never made it anywhere
    assert!(remote.sent_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn inbound_frames_drive_the_cache_router() {
    let mut h = start(vec![Script::Accept]);
    settle().await;
    let remote = h.connector.take_remote();

    remote.push(TransportEvent::Frame(
        r#"{"type":"new_message","message":{"id":"m-1","conversation_id":"c-1","sender_id":"u-2","body":"hi","sent_at":"2026-01-01T00:00:00Z"},"conversation_id":"c-1"}"#.into(),
    ));
    remote.push(TransportEvent::Frame(
        r#"{"type":"error","message":"bad day"}"#.into(),
    ));
    // Unknown types fall on the floor without breaking the session
    remote.push(TransportEvent::Frame(r#"{"type":"live_poll"}"#.into()));
    settle().await;

    assert!(h.tracker.is_stale(&CacheKey::ConversationList));
    assert!(h
        .tracker
        .is_stale(&CacheKey::ConversationMessages("c-1".into())));
    assert_eq!(
        h.notices.try_recv().unwrap(),
        Notice::ServerError {
            message: "bad day".into()
        }
    );
    assert!(h.handle.is_connected());
}
