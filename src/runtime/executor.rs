//! Sync session runtime executor

use super::traits::{ChannelEvent, Duplex, Transport};
use super::{lock, recall_notice, ClientEvent};

use crate::db::Message;
use crate::emotion::EmotionAggregator;
use crate::state_machine::MergeOrigin;
use crate::state_machine::{transition, Effect, Event, SessionContext, SessionState};
use crate::store::ConversationStore;
use crate::wire::{InboundFrame, OutboundFrame};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Outbound buffer between the executor and the channel pump
const OUTBOUND_BUFFER: usize = 64;

/// The channel currently dialing or open
struct LiveChannel {
    generation: u64,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
}

/// Generic session runtime that can work with any transport implementation
pub struct SessionRuntime<T>
where
    T: Transport + 'static,
{
    context: SessionContext,
    state: SessionState,
    transport: Arc<T>,
    store: Arc<Mutex<ConversationStore>>,
    emotion: Arc<Mutex<EmotionAggregator>>,
    /// Last typing flag seen per actor
    presence: HashMap<String, bool>,
    channel: Option<LiveChannel>,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<ClientEvent>,
}

impl<T> SessionRuntime<T>
where
    T: Transport + 'static,
{
    pub fn new(
        context: SessionContext,
        transport: T,
        store: Arc<Mutex<ConversationStore>>,
        emotion: Arc<Mutex<EmotionAggregator>>,
        event_rx: mpsc::Receiver<Event>,
        event_tx: mpsc::Sender<Event>,
        broadcast_tx: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            context,
            state: SessionState::default(),
            transport: Arc::new(transport),
            store,
            emotion,
            presence: HashMap::new(),
            channel: None,
            event_rx,
            event_tx,
            broadcast_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(conv_id = %self.context.conversation_id, "Starting session runtime");

        // Process events in a loop, strictly in arrival order
        while let Some(event) = self.event_rx.recv().await {
            self.process_event(event);
            if self.state.is_torn_down() {
                break;
            }
        }

        tracing::info!(conv_id = %self.context.conversation_id, "Session runtime stopped");
    }

    fn process_event(&mut self, event: Event) {
        let name = event.name();

        // Pure state transition
        let result = match transition(&self.state, &self.context, event) {
            Ok(r) => r,
            Err(e) => {
                // Rejections are expected (e.g. sending while reconnecting)
                tracing::debug!(
                    conv_id = %self.context.conversation_id,
                    event = name,
                    error = %e,
                    "Event rejected"
                );
                return;
            }
        };

        if result.new_state != self.state {
            tracing::debug!(
                conv_id = %self.context.conversation_id,
                event = name,
                from = ?self.state,
                to = ?result.new_state,
                "Session state changed"
            );
        }
        self.state = result.new_state;

        for effect in result.effects {
            self.execute_effect(effect);
        }
    }

    /// Execute an effect
    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Dial { generation } => self.dial(generation),

            Effect::CloseChannel => {
                if let Some(channel) = self.channel.take() {
                    tracing::debug!(
                        conv_id = %self.context.conversation_id,
                        generation = channel.generation,
                        "Closing channel"
                    );
                    channel.cancel.cancel();
                }
            }

            Effect::RequestSync => {
                // Read the cursor now, not when the effect was produced
                let after_timestamp = lock(&self.store).sync_cursor();
                self.write(OutboundFrame::Sync { after_timestamp });
            }

            Effect::SendFrame { frame } => self.write(frame),

            Effect::SendLocalText { text } => {
                let message = Message::text(
                    self.context.conversation_id.clone(),
                    self.context.user_id.clone(),
                    text,
                );
                let (stored, snapshot) = {
                    let mut store = lock(&self.store);
                    let stored = store.append_local(message);
                    (stored, store.snapshot())
                };
                self.emit(ClientEvent::MessagesChanged { messages: snapshot });
                self.write(OutboundFrame::Message {
                    id: stored.id,
                    content: stored.content,
                    metadata: stored.metadata,
                });
            }

            Effect::ScheduleReconnect { generation, delay } => {
                tracing::info!(
                    conv_id = %self.context.conversation_id,
                    generation,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Scheduling reconnect"
                );
                // Never cancelled; the state machine decides at fire time
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = event_tx.send(Event::ReconnectDue { generation }).await;
                });
            }

            Effect::MergeMessages { messages, origin } => self.merge(messages, origin),

            Effect::ClearConversation => {
                lock(&self.store).clear();
                lock(&self.emotion).reset();
                self.presence.clear();
                self.emit(ClientEvent::MessagesChanged { messages: vec![] });
                self.emit(ClientEvent::ThemeChanged { theme: None });
            }

            Effect::SetPresence { user_id, is_typing } => {
                let previous = self.presence.insert(user_id.clone(), is_typing);
                if previous.unwrap_or(false) != is_typing {
                    self.emit(ClientEvent::TypingChanged { user_id, is_typing });
                }
            }

            Effect::ForwardDebugLog { entry } => self.emit(ClientEvent::DebugLog { entry }),

            Effect::RememberDebugMode { enabled } => {
                tracing::info!(conv_id = %self.context.conversation_id, enabled, "Debug mode set");
                self.context.debug_mode = enabled;
            }

            Effect::FlushStore => lock(&self.store).flush(),

            Effect::NotifyConnection { status } => {
                tracing::info!(conv_id = %self.context.conversation_id, status = %status, "Connection status");
                self.emit(ClientEvent::ConnectionChanged { status });
            }
        }
    }

    /// Start a dial/pump task for `generation`
    fn dial(&mut self, generation: u64) {
        // A stale pump would otherwise keep its socket alive
        if let Some(previous) = self.channel.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        self.channel = Some(LiveChannel {
            generation,
            outbound: outbound_tx,
            cancel: cancel.clone(),
        });

        tracing::info!(conv_id = %self.context.conversation_id, generation, "Dialing");

        let pump = ChannelPump {
            transport: self.transport.clone(),
            conversation_id: self.context.conversation_id.clone(),
            generation,
            event_tx: self.event_tx.clone(),
            cancel,
        };
        tokio::spawn(pump.run(outbound_rx));
    }

    /// Write a frame to the live channel; dropped if there is none
    /// Queue a frame for the live channel without waiting; a full queue
    /// drops the frame
    fn write(&self, frame: OutboundFrame) {
        let Some(channel) = &self.channel else {
            tracing::debug!(frame = frame.kind(), "No live channel, dropping frame");
            return;
        };

        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(frame = frame.kind(), error = %e, "Failed to encode frame");
                return;
            }
        };

        match channel.outbound.try_send(text) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(frame = frame.kind(), "Outbound queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(frame = frame.kind(), "Channel pump gone, dropping frame");
            }
        }
    }

    fn merge(&self, messages: Vec<Message>, origin: MergeOrigin) {
        let conversation_id = self.context.conversation_id.clone();
        let (outcome, snapshot) = {
            let mut store = lock(&self.store);
            let outcome = store.merge(&conversation_id, messages.clone());
            (outcome, store.snapshot())
        };

        if !outcome.changed {
            return;
        }

        tracing::debug!(
            conv_id = %conversation_id,
            inserted = outcome.inserted,
            updated = outcome.updated,
            recalled = outcome.recalled.len(),
            "Merged messages"
        );
        self.emit(ClientEvent::MessagesChanged {
            messages: snapshot.clone(),
        });

        for message_id in outcome.recalled {
            self.emit(ClientEvent::MessageRetracted { message_id });
        }

        match origin {
            MergeOrigin::Live => {
                for message in &messages {
                    if message.is_recall() {
                        self.emit(ClientEvent::Notice {
                            text: recall_notice(&self.context.actor_name),
                        });
                    } else if message.sender_id != self.context.user_id {
                        self.apply_emotion(message);
                    }
                }
            }
            MergeOrigin::History => {
                let restored = {
                    let mut emotion = lock(&self.emotion);
                    if emotion.current().is_some() {
                        None
                    } else {
                        emotion.restore_theme(&snapshot)
                    }
                };
                if let Some(theme) = restored {
                    self.emit(ClientEvent::ThemeChanged { theme: Some(theme) });
                }
            }
        }
    }

    fn apply_emotion(&self, message: &Message) {
        let Some(emotion_map) = message.emotion_map() else {
            return;
        };
        let theme = lock(&self.emotion).apply(&emotion_map);
        if theme.is_some() {
            self.emit(ClientEvent::ThemeChanged { theme });
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.broadcast_tx.send(event);
    }
}

/// Dials one connection and bridges it to the executor's event queue
struct ChannelPump<T: Transport + 'static> {
    transport: Arc<T>,
    conversation_id: String,
    generation: u64,
    event_tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl<T: Transport + 'static> ChannelPump<T> {
    async fn run(self, mut outbound_rx: mpsc::Receiver<String>) {
        let generation = self.generation;

        let dialed = tokio::select! {
            () = self.cancel.cancelled() => return,
            result = self.transport.connect(&self.conversation_id) => result,
        };

        let Duplex {
            outbound,
            mut inbound,
        } = match dialed {
            Ok(duplex) => duplex,
            Err(e) => {
                tracing::warn!(conv_id = %self.conversation_id, generation, error = %e, "Dial failed");
                self.post(Event::ChannelFailed {
                    generation,
                    reason: e.to_string(),
                })
                .await;
                return;
            }
        };

        self.post(Event::ChannelOpened { generation }).await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,

                Some(text) = outbound_rx.recv() => {
                    if outbound.send(text).await.is_err() {
                        self.post(Event::ChannelError {
                            generation,
                            reason: "outbound closed".to_string(),
                        })
                        .await;
                        break;
                    }
                }

                item = inbound.recv() => match item {
                    Some(ChannelEvent::Frame(text)) => match InboundFrame::decode(&text) {
                        Some(frame) => {
                            tracing::debug!(conv_id = %self.conversation_id, frame = frame.kind(), "Frame received");
                            self.post(Event::FrameReceived { generation, frame }).await;
                        }
                        None => {
                            tracing::debug!(conv_id = %self.conversation_id, "Dropping malformed or unknown frame");
                        }
                    },
                    Some(ChannelEvent::Error(reason)) => {
                        tracing::warn!(conv_id = %self.conversation_id, generation, error = %reason, "Channel error");
                        self.post(Event::ChannelError { generation, reason }).await;
                    }
                    Some(ChannelEvent::Closed) | None => {
                        tracing::info!(conv_id = %self.conversation_id, generation, "Channel closed");
                        self.post(Event::ChannelClosed { generation }).await;
                        break;
                    }
                },
            }
        }
        // Dropping `outbound` closes the connection
    }

    async fn post(&self, event: Event) {
        let _ = self.event_tx.send(event).await;
    }
}
