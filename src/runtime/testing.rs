//! Mock implementations for testing
//!
//! These mocks enable integration testing of the session runtime without
//! real I/O: storage lives in a map and every dial hands the test the far end
//! of an in-memory channel.

use super::traits::*;
use super::{ClientEvent, SessionHandle, SessionRuntime};
use crate::db::Message;
use crate::emotion::EmotionAggregator;
use crate::state_machine::{Event, SessionContext};
use crate::store::ConversationStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// Mock Storage
// ============================================================================

/// In-memory `LocalStorage`
#[derive(Default)]
pub struct InMemoryStorage {
    entries: Mutex<HashMap<(String, String), String>>,
}

#[allow(dead_code)]
impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw document
    pub fn insert(&self, namespace: &str, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert((namespace.to_string(), key.to_string()), value.to_string());
    }

    /// Raw document, if present
    pub fn get(&self, namespace: &str, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }
}

impl LocalStorage for InMemoryStorage {
    fn load(&self, namespace: &str, key: &str) -> Result<Option<String>, String> {
        Ok(self.get(namespace, key))
    }

    fn save(&self, namespace: &str, key: &str, value: &str) -> Result<(), String> {
        self.insert(namespace, key, value);
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), String> {
        self.entries
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

/// Storage where every operation fails
pub struct FailingStorage;

impl LocalStorage for FailingStorage {
    fn load(&self, _namespace: &str, _key: &str) -> Result<Option<String>, String> {
        Err("disk on fire".to_string())
    }

    fn save(&self, _namespace: &str, _key: &str, _value: &str) -> Result<(), String> {
        Err("disk on fire".to_string())
    }

    fn remove(&self, _namespace: &str, _key: &str) -> Result<(), String> {
        Err("disk on fire".to_string())
    }
}

// ============================================================================
// Mock Transport
// ============================================================================

/// The remote end of one mock connection
pub struct MockPeer {
    /// Frames the client wrote
    sent: mpsc::Receiver<String>,
    /// Events to deliver to the client
    inbound: mpsc::Sender<ChannelEvent>,
}

#[allow(dead_code)]
impl MockPeer {
    /// Next frame the client wrote, parsed
    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(30), self.sent.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("client closed the channel");
        serde_json::from_str(&text).expect("client wrote invalid JSON")
    }

    /// Whether the client writes anything within `wait`
    pub async fn is_silent_for(&mut self, wait: Duration) -> bool {
        matches!(tokio::time::timeout(wait, self.sent.recv()).await, Err(_) | Ok(None))
    }

    /// Deliver a frame as `{"type": T, "data": ...}`
    pub async fn push(&self, frame_type: &str, data: Value) {
        let frame = serde_json::json!({ "type": frame_type, "data": data });
        self.push_raw(&frame.to_string()).await;
    }

    pub async fn push_raw(&self, text: &str) {
        let _ = self.inbound.send(ChannelEvent::Frame(text.to_string())).await;
    }

    pub async fn fail(&self, reason: &str) {
        let _ = self.inbound.send(ChannelEvent::Error(reason.to_string())).await;
    }

    pub async fn close(&self) {
        let _ = self.inbound.send(ChannelEvent::Closed).await;
    }
}

/// Scripted dial outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    Accept,
    Refuse,
}

/// Mock transport that hands each accepted connection to the test
pub struct MockTransport {
    /// Outcomes for upcoming dials; accepts when empty
    script: Mutex<VecDeque<DialOutcome>>,
    peers: mpsc::UnboundedSender<MockPeer>,
    dials: AtomicUsize,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let transport = Self {
            script: Mutex::new(VecDeque::new()),
            peers,
            dials: AtomicUsize::new(0),
        };
        (transport, peer_rx)
    }

    pub fn queue(&self, outcome: DialOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Number of dials attempted so far
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _conversation_id: &str) -> Result<Duplex, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DialOutcome::Accept);

        if outcome == DialOutcome::Refuse {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        let _ = self.peers.send(MockPeer {
            sent: out_rx,
            inbound: in_tx,
        });
        Ok(Duplex {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// ============================================================================
// Test Session Builder
// ============================================================================

/// A running session wired to mocks
pub struct TestSession {
    pub handle: SessionHandle,
    pub events: broadcast::Receiver<ClientEvent>,
    pub peers: mpsc::UnboundedReceiver<MockPeer>,
    pub transport: Arc<MockTransport>,
    pub storage: Arc<InMemoryStorage>,
    pub store: Arc<Mutex<ConversationStore>>,
    pub emotion: Arc<Mutex<EmotionAggregator>>,
}

/// Builder for `TestSession`
pub struct TestSessionBuilder {
    context: SessionContext,
    messages: Vec<Message>,
    script: Vec<DialOutcome>,
}

#[allow(dead_code)]
impl TestSessionBuilder {
    pub fn new() -> Self {
        Self {
            context: SessionContext::new("conv-1", "user")
                .with_session_config(serde_json::json!({"character_name": "Rin"})),
            messages: Vec::new(),
            script: Vec::new(),
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_debug_mode(mut self, enabled: bool) -> Self {
        self.context = self.context.with_debug_mode(enabled);
        self
    }

    pub fn with_dial(mut self, outcome: DialOutcome) -> Self {
        self.script.push(outcome);
        self
    }

    pub fn start(self) -> TestSession {
        let storage = Arc::new(InMemoryStorage::new());
        let conversation_id = self.context.conversation_id.clone();

        let mut store = ConversationStore::new(conversation_id.clone(), storage.clone());
        store.merge(&conversation_id, self.messages);
        let store = Arc::new(Mutex::new(store));
        let emotion = Arc::new(Mutex::new(EmotionAggregator::new(
            conversation_id,
            storage.clone(),
        )));

        let (transport, peers) = MockTransport::new();
        for outcome in self.script {
            transport.queue(outcome);
        }
        let transport = Arc::new(transport);

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, events) = broadcast::channel(256);

        let runtime = SessionRuntime::new(
            self.context,
            transport.clone(),
            store.clone(),
            emotion.clone(),
            event_rx,
            event_tx.clone(),
            broadcast_tx,
        );
        tokio::spawn(runtime.run());

        TestSession {
            handle: SessionHandle::new(event_tx),
            events,
            peers,
            transport,
            storage,
            store,
            emotion,
        }
    }
}

impl Default for TestSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl TestSession {
    pub fn builder() -> TestSessionBuilder {
        TestSessionBuilder::new()
    }

    /// Connect and complete the handshake, returning the peer with the
    /// `sync` and `init` frames already consumed
    pub async fn open(&mut self) -> MockPeer {
        self.handle.send(Event::Connect).await;
        let mut peer = self.next_peer().await;
        let sync = peer.next_frame().await;
        assert_eq!(sync["type"], "sync");
        let init = peer.next_frame().await;
        assert_eq!(init["type"], "init");
        peer
    }

    pub async fn next_peer(&mut self) -> MockPeer {
        tokio::time::timeout(Duration::from_secs(60), self.peers.recv())
            .await
            .expect("timed out waiting for a dial")
            .expect("transport dropped")
    }

    /// Whether a new connection is accepted within `wait`
    pub async fn dials_within(&mut self, wait: Duration) -> bool {
        matches!(tokio::time::timeout(wait, self.peers.recv()).await, Ok(Some(_)))
    }

    /// First event matching `pred`, skipping others
    pub async fn wait_for(&mut self, pred: impl Fn(&ClientEvent) -> bool) -> ClientEvent {
        let deadline = Duration::from_secs(30);
        tokio::time::timeout(deadline, async {
            loop {
                match self.events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Every event up to and including the first one matching `pred`
    pub async fn collect_until(&mut self, pred: impl Fn(&ClientEvent) -> bool) -> Vec<ClientEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.wait_for(|_| true).await;
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.store.lock().unwrap().snapshot()
    }
}

// ============================================================================
// Runtime integration tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::recall_notice;
    use crate::state_machine::ConnectionStatus;
    use serde_json::json;

    fn msg(id: &str, ts: f64) -> Message {
        Message::text("conv-1", "rin", format!("content {id}"))
            .with_id(id)
            .with_timestamp(ts)
    }

    fn is_status(status: ConnectionStatus) -> impl Fn(&ClientEvent) -> bool {
        move |e| matches!(e, ClientEvent::ConnectionChanged { status: s } if *s == status)
    }

    fn is_messages_changed(e: &ClientEvent) -> bool {
        matches!(e, ClientEvent::MessagesChanged { .. })
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_sends_sync_with_cursor_then_init() {
        let mut session = TestSession::builder()
            .with_messages(vec![msg("m1", 42.5)])
            .start();

        session.handle.send(Event::Connect).await;
        let mut peer = session.next_peer().await;

        assert_eq!(
            peer.next_frame().await,
            json!({"type": "sync", "after_timestamp": 42.5})
        );
        assert_eq!(
            peer.next_frame().await,
            json!({"type": "init", "config": {"character_name": "Rin"}})
        );
        session.wait_for(is_status(ConnectionStatus::Open)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_merges_into_store() {
        let mut session = TestSession::builder().start();
        let peer = session.open().await;

        peer.push(
            "history",
            json!({"messages": [
                {"id": "m2", "type": "text", "content": "b", "timestamp": 2.0, "sender_id": "rin"},
                {"id": "m1", "type": "text", "content": "a", "timestamp": 1.0, "sender_id": "rin"}
            ]}),
        )
        .await;

        let ClientEvent::MessagesChanged { messages } = session.wait_for(is_messages_changed).await
        else {
            unreachable!()
        };
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!((session.store.lock().unwrap().sync_cursor() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_send_then_echo_keeps_one_copy() {
        let mut session = TestSession::builder().start();
        let mut peer = session.open().await;

        session
            .handle
            .send(Event::SendText {
                text: "  hello  ".to_string(),
            })
            .await;

        let frame = peer.next_frame().await;
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["content"], "hello");
        let id = frame["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("msg-"));

        let local_ts = session.snapshot()[0].timestamp.unwrap();
        peer.push(
            "history",
            json!({"messages": [
                {"id": id, "type": "text", "content": "hello", "sender_id": "user",
                 "timestamp": local_ts + 0.25}
            ]}),
        )
        .await;
        session.wait_for(is_messages_changed).await;
        session.wait_for(is_messages_changed).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_reconnect_after_delay() {
        let mut session = TestSession::builder().start();
        let peer = session.open().await;

        peer.close().await;
        session.wait_for(is_status(ConnectionStatus::Reconnecting)).await;

        // Not before the delay
        assert!(!session.dials_within(Duration::from_millis(2_900)).await);

        let mut second = session.next_peer().await;
        assert_eq!(second.next_frame().await["type"], "sync");
        assert_eq!(second.next_frame().await["type"], "init");
        assert_eq!(session.transport.dial_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_then_close_reconnects_once() {
        let mut session = TestSession::builder().start();
        let peer = session.open().await;

        peer.fail("connection reset").await;
        peer.close().await;

        let _second = session.next_peer().await;
        // The new connection stays up; no further dials
        assert!(!session.dials_within(Duration::from_secs(30)).await);
        assert_eq!(session.transport.dial_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_prevents_reconnect() {
        let mut session = TestSession::builder().start();
        let peer = session.open().await;

        peer.close().await;
        session.wait_for(is_status(ConnectionStatus::Reconnecting)).await;
        session.handle.send(Event::Teardown).await;
        session.wait_for(is_status(ConnectionStatus::Closed)).await;

        assert!(!session.dials_within(Duration::from_secs(30)).await);
        assert_eq!(session.transport.dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_dial_retries() {
        let mut session = TestSession::builder()
            .with_dial(DialOutcome::Refuse)
            .start();

        session.handle.send(Event::Connect).await;
        session.wait_for(is_status(ConnectionStatus::Reconnecting)).await;

        let mut peer = session.next_peer().await;
        assert_eq!(peer.next_frame().await["type"], "sync");
        assert_eq!(session.transport.dial_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_while_reconnecting_are_dropped() {
        let mut session = TestSession::builder().start();
        let peer = session.open().await;

        peer.close().await;
        session.wait_for(is_status(ConnectionStatus::Reconnecting)).await;
        session
            .handle
            .send(Event::SendText {
                text: "lost".to_string(),
            })
            .await;
        session.handle.send(Event::RequestClear).await;

        let mut second = session.next_peer().await;
        assert_eq!(second.next_frame().await["type"], "sync");
        assert_eq!(second.next_frame().await["type"], "init");
        assert!(second.is_silent_for(Duration::from_secs(10)).await);
        assert!(session.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_peer_does_not_block_event_loop() {
        let mut session = TestSession::builder().start();
        let mut peer = session.open().await;

        // The peer reads nothing while far more frames are written than the
        // outbound queues hold
        let burst = 300;
        tokio::time::timeout(Duration::from_secs(30), async {
            for i in 0..burst {
                session
                    .handle
                    .send(Event::SendText {
                        text: format!("line {i}"),
                    })
                    .await;
            }
        })
        .await
        .expect("event loop stalled on a full outbound queue");

        session
            .wait_for(|e| matches!(e, ClientEvent::MessagesChanged { messages } if messages.len() == burst))
            .await;
        assert_eq!(peer.next_frame().await["type"], "message");
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frames_do_not_close_channel() {
        let mut session = TestSession::builder().start();
        let peer = session.open().await;

        peer.push_raw("{{{ not json").await;
        peer.push("toast", json!({"text": "hi"})).await;
        peer.push("message", json!({"id": "m1", "type": "text", "content": "still here", "timestamp": 1.0}))
            .await;

        session.wait_for(is_messages_changed).await;
        assert_eq!(session.snapshot().len(), 1);
        assert_eq!(session.transport.dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_frame_empties_store_and_theme() {
        let mut session = TestSession::builder()
            .with_messages(vec![msg("m1", 1.0)])
            .start();
        let peer = session.open().await;

        peer.push(
            "message",
            json!({"id": "m2", "type": "text", "sender_id": "rin", "content": "yay", "timestamp": 2.0,
                   "metadata": {"emotion_map": {"happy": "high"}}}),
        )
        .await;
        session
            .wait_for(|e| matches!(e, ClientEvent::ThemeChanged { theme: Some(_) }))
            .await;

        peer.push("clear", json!({})).await;
        session
            .wait_for(|e| matches!(e, ClientEvent::ThemeChanged { theme: None }))
            .await;

        assert!(session.snapshot().is_empty());
        assert!(session.emotion.lock().unwrap().current().is_none());
        assert!(session.store.lock().unwrap().sync_cursor().abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_messages_do_not_set_theme() {
        let mut session = TestSession::builder().start();
        let peer = session.open().await;

        peer.push(
            "message",
            json!({"id": "m1", "type": "text", "sender_id": "user", "content": "hi", "timestamp": 1.0,
                   "metadata": {"emotion_map": {"sad": "high"}}}),
        )
        .await;
        session.wait_for(is_messages_changed).await;
        assert!(session.emotion.lock().unwrap().current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recall_frame_retracts_and_notices() {
        let mut session = TestSession::builder()
            .with_messages(vec![msg("m1", 1.0)])
            .start();
        let peer = session.open().await;

        peer.push(
            "message",
            json!({"id": "r1", "type": "recall_event", "sender_id": "rin", "timestamp": 2.0,
                   "metadata": {"target_message_id": "m1"}}),
        )
        .await;

        let retracted = session
            .wait_for(|e| matches!(e, ClientEvent::MessageRetracted { .. }))
            .await;
        assert_eq!(
            retracted,
            ClientEvent::MessageRetracted {
                message_id: "m1".to_string()
            }
        );
        let notice = session
            .wait_for(|e| matches!(e, ClientEvent::Notice { .. }))
            .await;
        assert_eq!(
            notice,
            ClientEvent::Notice {
                text: recall_notice("Rin")
            }
        );
        assert!(session.store.lock().unwrap().get("m1").unwrap().is_recalled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_events_only_on_change() {
        let mut session = TestSession::builder().start();
        let peer = session.open().await;

        for is_typing in [true, true, false, false] {
            peer.push("typing", json!({"user_id": "rin", "is_typing": is_typing}))
                .await;
        }
        // Fence: frames are processed in order
        peer.push("message", json!({"id": "m1", "type": "text", "timestamp": 1.0}))
            .await;

        let typing: Vec<bool> = session
            .collect_until(is_messages_changed)
            .await
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::TypingChanged { is_typing, .. } => Some(is_typing),
                _ => None,
            })
            .collect();
        assert_eq!(typing, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_mode_round_trip() {
        let mut session = TestSession::builder().start();
        let mut peer = session.open().await;

        peer.push("debug_log", json!({"message": "hidden"})).await;
        peer.push("message", json!({"id": "m1", "type": "text", "timestamp": 1.0}))
            .await;
        let seen = session.collect_until(is_messages_changed).await;
        assert!(!seen.iter().any(|e| matches!(e, ClientEvent::DebugLog { .. })));

        session.handle.send(Event::SetDebugMode { enabled: true }).await;
        assert_eq!(
            peer.next_frame().await,
            json!({"type": "debug_mode", "enabled": true})
        );

        peer.push("debug_log", json!({"message": "shown"})).await;
        let ClientEvent::DebugLog { entry } = session
            .wait_for(|e| matches!(e, ClientEvent::DebugLog { .. }))
            .await
        else {
            unreachable!()
        };
        assert_eq!(entry, json!({"message": "shown"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_mode_reasserted_on_reconnect() {
        let mut session = TestSession::builder().with_debug_mode(true).start();
        session.handle.send(Event::Connect).await;
        let mut peer = session.next_peer().await;

        assert_eq!(peer.next_frame().await["type"], "sync");
        assert_eq!(peer.next_frame().await["type"], "init");
        assert_eq!(
            peer.next_frame().await,
            json!({"type": "debug_mode", "enabled": true})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_resyncs_and_flushes() {
        let mut session = TestSession::builder().start();
        let mut peer = session.open().await;

        peer.push("message", json!({"id": "m1", "type": "text", "timestamp": 9.0}))
            .await;
        session.wait_for(is_messages_changed).await;

        session
            .handle
            .send(Event::VisibilityChanged { visible: true })
            .await;
        assert_eq!(
            peer.next_frame().await,
            json!({"type": "sync", "after_timestamp": 9.0})
        );

        session
            .handle
            .send(Event::VisibilityChanged { visible: false })
            .await;
        assert!(peer.is_silent_for(Duration::from_secs(1)).await);
        assert!(session
            .storage
            .get(crate::store::MESSAGES_NAMESPACE, "conv-1")
            .is_some());
    }
}
