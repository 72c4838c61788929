//! Chat client: one conversation, all components wired together
//!
//! `ChatClient` is the entry point for view code. It owns the conversation
//! store, the emotion aggregator and the playback scheduler, starts sync
//! sessions on demand, and publishes everything that changes as
//! `ClientEvent`s.

use crate::config::ClientConfig;
use crate::db::Message;
use crate::emotion::{compute_theme, ColorSet, EmotionAggregator, EmotionMap, EmotionTheme};
use crate::playback::{ActionPlan, PlaybackConfig, PlaybackError, PlaybackReport, PlaybackScheduler, PlaybackView};
use crate::runtime::{lock, ClientEvent, LocalStorage, SessionHandle, SessionRuntime, Transport};
use crate::state_machine::{Event, SessionContext};
use crate::store::{ConversationStore, MergeOutcome};
use futures::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Namespace for client-level settings
pub const CLIENT_NAMESPACE: &str = "client";
const CONVERSATION_ID_KEY: &str = "conversation_id";

const EVENT_BUFFER: usize = 256;
const SESSION_QUEUE: usize = 32;

/// Stable id of this device's conversation, created on first use.
///
/// Storage failures never prevent startup: a fresh id is returned and the
/// failure logged.
pub fn load_or_create_conversation_id(storage: &dyn LocalStorage) -> String {
    match storage.load(CLIENT_NAMESPACE, CONVERSATION_ID_KEY) {
        Ok(Some(id)) if !id.trim().is_empty() => return id,
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to read conversation id"),
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = storage.save(CLIENT_NAMESPACE, CONVERSATION_ID_KEY, &id) {
        tracing::warn!(conv_id = %id, error = %e, "Failed to persist conversation id");
    } else {
        tracing::info!(conv_id = %id, "Created conversation id");
    }
    id
}

/// Playback output routed into the store and the event stream
struct EventView {
    actor_id: String,
    store: Arc<Mutex<ConversationStore>>,
    events: broadcast::Sender<ClientEvent>,
}

impl EventView {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

impl PlaybackView for EventView {
    fn set_typing(&self, on: bool) {
        self.emit(ClientEvent::TypingChanged {
            user_id: self.actor_id.clone(),
            is_typing: on,
        });
    }

    fn show_message(&self, message: Message) {
        let (outcome, snapshot) = {
            let mut store = lock(&self.store);
            let outcome = store.merge_provisional(message.clone());
            (outcome, store.snapshot())
        };
        self.emit(ClientEvent::PlaybackMessage { message });
        if outcome.changed {
            self.emit(ClientEvent::MessagesChanged { messages: snapshot });
        }
    }

    fn retract_message(&self, message_id: &str) {
        self.emit(ClientEvent::MessageRetracted {
            message_id: message_id.to_string(),
        });
    }

    fn show_notice(&self, text: String) {
        self.emit(ClientEvent::Notice { text });
    }
}

/// Client for one conversation
pub struct ChatClient {
    context: SessionContext,
    store: Arc<Mutex<ConversationStore>>,
    emotion: Arc<Mutex<EmotionAggregator>>,
    playback: PlaybackScheduler,
    events: broadcast::Sender<ClientEvent>,
    session: Mutex<Option<SessionHandle>>,
    /// Debug preference applied to sessions opened later
    debug_mode: AtomicBool,
}

impl ChatClient {
    /// Load the conversation named by `context` from `storage`
    pub fn new(context: SessionContext, storage: Arc<dyn LocalStorage>) -> Self {
        let playback = PlaybackConfig::new(context.conversation_id.clone())
            .with_actor(context.actor_id.clone(), context.actor_name.clone());
        Self::with_playback(context, storage, playback)
    }

    pub fn with_playback(
        context: SessionContext,
        storage: Arc<dyn LocalStorage>,
        playback: PlaybackConfig,
    ) -> Self {
        let conversation_id = context.conversation_id.clone();
        let store = Arc::new(Mutex::new(ConversationStore::load(
            conversation_id.clone(),
            storage.clone(),
        )));
        let emotion = Arc::new(Mutex::new(EmotionAggregator::new(
            conversation_id,
            storage,
        )));
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let view = Arc::new(EventView {
            actor_id: playback.actor_id.clone(),
            store: store.clone(),
            events: events.clone(),
        });

        Self {
            debug_mode: AtomicBool::new(context.debug_mode),
            context,
            store,
            emotion,
            playback: PlaybackScheduler::new(playback, view),
            events,
            session: Mutex::new(None),
        }
    }

    /// Client for the device's stable conversation, configured from `config`
    pub fn from_config(config: &ClientConfig, storage: Arc<dyn LocalStorage>) -> Self {
        let conversation_id = load_or_create_conversation_id(storage.as_ref());
        let context = SessionContext::new(conversation_id, config.user_id.clone())
            .with_actor(config.actor_id.clone(), config.actor_name.clone())
            .with_session_config(config.session_config.clone())
            .with_reconnect_delay(config.reconnect_delay)
            .with_debug_mode(config.debug_mode);
        Self::new(context, storage)
    }

    pub fn conversation_id(&self) -> &str {
        &self.context.conversation_id
    }

    // ========================================================================
    // Store
    // ========================================================================

    /// Merge messages from any source
    pub fn merge(&self, messages: Vec<Message>) -> MergeOutcome {
        let (outcome, snapshot) = {
            let mut store = lock(&self.store);
            let outcome = store.merge(&self.context.conversation_id, messages);
            (outcome, store.snapshot())
        };
        if outcome.changed {
            self.emit(ClientEvent::MessagesChanged { messages: snapshot });
            for message_id in &outcome.recalled {
                self.emit(ClientEvent::MessageRetracted {
                    message_id: message_id.clone(),
                });
            }
        }
        outcome
    }

    /// Store a locally created message without sending it
    pub fn append_local(&self, message: Message) -> Message {
        let (stored, snapshot) = {
            let mut store = lock(&self.store);
            let stored = store.append_local(message);
            (stored, store.snapshot())
        };
        self.emit(ClientEvent::MessagesChanged { messages: snapshot });
        stored
    }

    /// Forget the conversation locally. `request_clear` asks the server.
    pub fn clear(&self) {
        lock(&self.store).clear();
        lock(&self.emotion).reset();
        self.emit(ClientEvent::MessagesChanged { messages: vec![] });
        self.emit(ClientEvent::ThemeChanged { theme: None });
    }

    /// Messages in display order
    pub fn snapshot(&self) -> Vec<Message> {
        lock(&self.store).snapshot()
    }

    pub fn mark_read(&self, timestamp: f64) -> bool {
        lock(&self.store).mark_read(timestamp)
    }

    pub fn unread_count(&self) -> usize {
        lock(&self.store).unread_count()
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Start syncing over `transport`. A session already running is torn
    /// down first.
    pub async fn open_session<T: Transport + 'static>(&self, transport: T) {
        self.teardown().await;

        let context = self
            .context
            .clone()
            .with_debug_mode(self.debug_mode.load(Ordering::Relaxed));
        let (event_tx, event_rx) = mpsc::channel(SESSION_QUEUE);
        let runtime = SessionRuntime::new(
            context,
            transport,
            self.store.clone(),
            self.emotion.clone(),
            event_rx,
            event_tx.clone(),
            self.events.clone(),
        );
        tokio::spawn(runtime.run());

        let handle = SessionHandle::new(event_tx);
        *lock(&self.session) = Some(handle.clone());
        handle.send(Event::Connect).await;
    }

    /// Send user text. Returns false when no session is running; a session
    /// that is reconnecting drops the text.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_event(Event::SendText { text: text.into() }).await
    }

    /// Ask the server to clear the conversation
    pub async fn request_clear(&self) -> bool {
        self.send_event(Event::RequestClear).await
    }

    pub async fn set_debug_mode(&self, enabled: bool) {
        self.debug_mode.store(enabled, Ordering::Relaxed);
        self.send_event(Event::SetDebugMode { enabled }).await;
    }

    /// The view became visible or hidden
    pub async fn set_visibility(&self, visible: bool) {
        if !visible {
            lock(&self.store).flush();
        }
        self.send_event(Event::VisibilityChanged { visible }).await;
    }

    /// Stop the session, if any. Idempotent.
    pub async fn teardown(&self) {
        let handle = lock(&self.session).take();
        if let Some(handle) = handle {
            tracing::info!(conv_id = %self.context.conversation_id, "Tearing down session");
            handle.send(Event::Teardown).await;
        }
    }

    async fn send_event(&self, event: Event) -> bool {
        let handle = lock(&self.session).clone();
        match handle {
            Some(handle) => handle.send(event).await,
            None => {
                tracing::debug!(event = event.name(), "No session, dropping event");
                false
            }
        }
    }

    // ========================================================================
    // Playback and theme
    // ========================================================================

    pub async fn run_plan(&self, plan: ActionPlan) -> Result<PlaybackReport, PlaybackError> {
        self.playback.run_plan(plan).await
    }

    pub fn compute_theme(&self, emotion_map: &EmotionMap) -> Option<ColorSet> {
        compute_theme(emotion_map)
    }

    /// Restore the last theme from storage or from the stored messages
    pub fn restore_theme(&self) -> Option<EmotionTheme> {
        let snapshot = self.snapshot();
        let theme = lock(&self.emotion).restore_theme(&snapshot);
        if theme.is_some() {
            self.emit(ClientEvent::ThemeChanged {
                theme: theme.clone(),
            });
        }
        theme
    }

    pub fn current_theme(&self) -> Option<EmotionTheme> {
        lock(&self.emotion).current().cloned()
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Stream of everything that changes from now on. A subscriber that
    /// falls behind skips what it missed.
    pub fn subscribe(&self) -> impl Stream<Item = ClientEvent> + Send + Unpin + 'static {
        let conversation_id = self.context.conversation_id.clone();
        BroadcastStream::new(self.events.subscribe()).filter_map(move |item| match item {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(conv_id = %conversation_id, error = %e, "Event subscriber lagged");
                None
            }
        })
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}
