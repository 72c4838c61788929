//! Local-first conversation store
//!
//! Holds the deduplicated message set for one conversation, the sync cursor
//! (highest timestamp seen) and the read cursor (highest timestamp the viewer
//! has seen). Memory is authoritative; every mutation is written through to
//! local storage before returning, and a failed write is logged and retried on
//! the next flush.

#[cfg(test)]
mod proptests;

use crate::db::Message;
use crate::runtime::LocalStorage;
use chrono::Utc;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Namespace holding the message array, keyed by conversation id
pub const MESSAGES_NAMESPACE: &str = "messages";
/// Namespace holding the read cursor, keyed by conversation id
pub const READ_CURSOR_NAMESPACE: &str = "read_cursor";

/// What a merge did to the visible set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// True iff at least one id was added or one payload differs
    pub changed: bool,
    pub inserted: usize,
    pub updated: usize,
    /// Ids already present that a tombstone in this merge marked recalled
    pub recalled: Vec<String>,
}

pub struct ConversationStore {
    conversation_id: String,
    storage: Arc<dyn LocalStorage>,
    /// Insertion (arrival) order
    messages: Vec<Message>,
    index: HashMap<String, usize>,
    /// Every id named by a recall tombstone, present locally or not
    recall_targets: HashSet<String>,
    sync_cursor: f64,
    read_cursor: f64,
    dirty: bool,
}

impl ConversationStore {
    /// An empty store that has never been persisted
    pub fn new(conversation_id: impl Into<String>, storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            storage,
            messages: Vec::new(),
            index: HashMap::new(),
            recall_targets: HashSet::new(),
            sync_cursor: 0.0,
            read_cursor: 0.0,
            dirty: false,
        }
    }

    /// Rebuild a store from local storage.
    ///
    /// Missing or corrupt data yields an empty store. The sync cursor is
    /// derived from the loaded messages, never read back.
    pub fn load(conversation_id: impl Into<String>, storage: Arc<dyn LocalStorage>) -> Self {
        let mut store = Self::new(conversation_id, storage);

        for message in store.read_persisted_messages() {
            if message.id.is_empty() {
                continue;
            }
            store.upsert(message);
        }
        store.resolve_recalls();
        store.read_cursor = store.read_persisted_cursor();

        tracing::debug!(
            conv_id = %store.conversation_id,
            count = store.messages.len(),
            sync_cursor = store.sync_cursor,
            "Loaded conversation store"
        );
        store
    }

    fn read_persisted_messages(&self) -> Vec<Message> {
        let raw = match self.storage.load(MESSAGES_NAMESPACE, &self.conversation_id) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(conv_id = %self.conversation_id, error = %e, "Failed to read messages");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(conv_id = %self.conversation_id, error = %e, "Discarding corrupt message cache");
            Vec::new()
        })
    }

    fn read_persisted_cursor(&self) -> f64 {
        match self.storage.load(READ_CURSOR_NAMESPACE, &self.conversation_id) {
            Ok(Some(raw)) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|ts| ts.is_finite() && *ts > 0.0)
                .unwrap_or(0.0),
            Ok(None) => 0.0,
            Err(e) => {
                tracing::warn!(conv_id = %self.conversation_id, error = %e, "Failed to read read cursor");
                0.0
            }
        }
    }

    // ==================== Accessors ====================

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn sync_cursor(&self) -> f64 {
        self.sync_cursor
    }

    pub fn read_cursor(&self) -> f64 {
        self.read_cursor
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&pos| &self.messages[pos])
    }

    /// Messages in display order: timestamp ascending, ties by arrival
    pub fn snapshot(&self) -> Vec<Message> {
        let mut ordered = self.messages.clone();
        ordered.sort_by(|a, b| a.sort_key().total_cmp(&b.sort_key()));
        ordered
    }

    /// Visible messages newer than the read cursor
    pub fn unread_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| !m.is_recall())
            .filter(|m| m.finite_timestamp().is_some_and(|ts| ts > self.read_cursor))
            .count()
    }

    // ==================== Mutations ====================

    /// Merge remotely delivered messages.
    ///
    /// Same id overwrites by arrival order. Recall tombstones are re-resolved
    /// against the whole set afterwards so a recall that arrived before its
    /// target still applies.
    pub fn merge(&mut self, conversation_id: &str, incoming: Vec<Message>) -> MergeOutcome {
        if conversation_id != self.conversation_id {
            tracing::warn!(
                conv_id = %self.conversation_id,
                other = %conversation_id,
                "Ignoring merge for another conversation"
            );
            return MergeOutcome::default();
        }

        let mut outcome = MergeOutcome::default();
        for message in incoming {
            if message.id.is_empty() {
                tracing::debug!(conv_id = %self.conversation_id, "Skipping message without id");
                continue;
            }
            match self.upsert(message) {
                Upsert::Inserted => outcome.inserted += 1,
                Upsert::Updated => outcome.updated += 1,
                Upsert::Unchanged => {}
            }
        }

        outcome.recalled = self.resolve_recalls();
        outcome.changed = outcome.inserted > 0 || outcome.updated > 0 || !outcome.recalled.is_empty();

        if outcome.changed {
            self.dirty = true;
            self.flush();
        }
        outcome
    }

    /// Insert a locally originated message, assigning an id and timestamp
    /// when missing. Returns the stored copy.
    pub fn append_local(&mut self, mut message: Message) -> Message {
        if message.id.is_empty() {
            message.id = generate_local_id();
        }
        if message.finite_timestamp().is_none() {
            message.timestamp = Some(now_seconds());
        }
        if message.conversation_id.is_empty() {
            message.conversation_id.clone_from(&self.conversation_id);
        }

        let id = message.id.clone();
        let fallback = message.clone();
        self.upsert(message);
        self.resolve_recalls();
        self.dirty = true;
        self.flush();

        tracing::debug!(conv_id = %self.conversation_id, message_id = %id, "Appended local message");
        self.get(&id).cloned().unwrap_or(fallback)
    }

    /// Show a message ahead of the server's copy.
    ///
    /// It never moves the sync cursor, and the server's copy replaces it on
    /// arrival. An id already present is left alone.
    pub fn merge_provisional(&mut self, mut message: Message) -> MergeOutcome {
        if message.id.is_empty() || self.index.contains_key(&message.id) {
            return MergeOutcome::default();
        }
        message.is_provisional = true;
        if message.conversation_id.is_empty() {
            message.conversation_id.clone_from(&self.conversation_id);
        }
        let conversation_id = self.conversation_id.clone();
        self.merge(&conversation_id, vec![message])
    }

    /// Drop every message and reset both cursors
    pub fn clear(&mut self) {
        self.messages.clear();
        self.index.clear();
        self.recall_targets.clear();
        self.sync_cursor = 0.0;
        self.read_cursor = 0.0;
        self.dirty = true;
        self.flush();
        tracing::info!(conv_id = %self.conversation_id, "Cleared conversation");
    }

    /// Advance the read cursor. Returns whether it moved.
    pub fn mark_read(&mut self, timestamp: f64) -> bool {
        if !timestamp.is_finite() || timestamp <= self.read_cursor {
            return false;
        }
        self.read_cursor = timestamp;
        self.dirty = true;
        self.flush();
        true
    }

    /// Write the in-memory state to storage if anything changed since the
    /// last successful write
    pub fn flush(&mut self) {
        if !self.dirty {
            return;
        }

        let json = match serde_json::to_string(&self.messages) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(conv_id = %self.conversation_id, error = %e, "Failed to encode messages");
                return;
            }
        };

        let messages = self.storage.save(MESSAGES_NAMESPACE, &self.conversation_id, &json);
        let cursor = self.storage.save(
            READ_CURSOR_NAMESPACE,
            &self.conversation_id,
            &self.read_cursor.to_string(),
        );

        match messages.and(cursor) {
            Ok(()) => self.dirty = false,
            Err(e) => {
                tracing::warn!(conv_id = %self.conversation_id, error = %e, "Failed to persist conversation");
            }
        }
    }

    // ==================== Internals ====================

    fn upsert(&mut self, mut message: Message) -> Upsert {
        if let Some(target) = message.recall_target() {
            self.recall_targets.insert(target.to_string());
        }
        if self.recall_targets.contains(&message.id) {
            message.is_recalled = true;
        }

        let counts = !message.is_provisional;
        let Some(&pos) = self.index.get(&message.id) else {
            if counts {
                self.advance_cursor(message.finite_timestamp());
            }
            self.index.insert(message.id.clone(), self.messages.len());
            self.messages.push(message);
            return Upsert::Inserted;
        };

        // A dated server copy already counted toward the cursor
        let previous = &self.messages[pos];
        if counts && (previous.is_provisional || previous.finite_timestamp().is_none()) {
            self.advance_cursor(message.finite_timestamp());
        }
        let existing = &mut self.messages[pos];
        if *existing == message {
            Upsert::Unchanged
        } else {
            *existing = message;
            Upsert::Updated
        }
    }

    fn advance_cursor(&mut self, timestamp: Option<f64>) {
        if let Some(ts) = timestamp {
            if ts > self.sync_cursor {
                self.sync_cursor = ts;
            }
        }
    }

    /// Mark every present tombstone target recalled. Returns the ids that
    /// flipped.
    fn resolve_recalls(&mut self) -> Vec<String> {
        let mut flipped = Vec::new();
        for target in &self.recall_targets {
            if let Some(&pos) = self.index.get(target) {
                let message = &mut self.messages[pos];
                if !message.is_recalled {
                    message.is_recalled = true;
                    flipped.push(target.clone());
                }
            }
        }
        flipped.sort();
        flipped
    }
}

enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

/// `msg-<unix nanos>-<6 hex>`
pub fn generate_local_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let suffix: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
    format!("msg-{nanos}-{suffix:06x}")
}

/// Wall clock in fractional seconds, the wire's timestamp unit
#[allow(clippy::cast_precision_loss)] // microsecond precision is plenty
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
