//! Emotion-state aggregation
//!
//! Blends the per-message emotion annotation into one mood color and keeps the
//! last known theme across restarts.

mod palette;

pub use palette::{compute_theme, hsl_to_rgb, intensity_weight, lookup, Hsl};

use crate::db::Message;
use crate::runtime::LocalStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Emotion label to intensity label, e.g. `{"happy": "high"}`
pub type EmotionMap = BTreeMap<String, String>;

/// Namespace holding the persisted theme, keyed by conversation id
pub const EMOTION_NAMESPACE: &str = "emotion_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Render-ready color strings derived from one blended color
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorSet {
    pub rgb: Rgb,
    pub base: String,
    pub shadow: String,
    pub shadow_soft: String,
}

impl ColorSet {
    pub fn from_rgb(rgb: Rgb) -> Self {
        let Rgb { r, g, b } = rgb;
        Self {
            rgb,
            base: format!("rgb({r}, {g}, {b})"),
            shadow: format!("rgba({r}, {g}, {b}, 0.35)"),
            shadow_soft: format!("rgba({r}, {g}, {b}, 0.22)"),
        }
    }
}

/// The last computed mood, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionTheme {
    pub emotion_map: EmotionMap,
    #[serde(alias = "colors")]
    pub color_set: ColorSet,
    pub updated_at: DateTime<Utc>,
}

/// Per-conversation theme holder
pub struct EmotionAggregator {
    conversation_id: String,
    storage: Arc<dyn LocalStorage>,
    current: Option<EmotionTheme>,
}

impl EmotionAggregator {
    /// Create an aggregator. Nothing is read from storage until
    /// [`restore_theme`](Self::restore_theme).
    pub fn new(conversation_id: impl Into<String>, storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            storage,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&EmotionTheme> {
        self.current.as_ref()
    }

    /// Compute and persist the theme for a new annotation.
    ///
    /// An annotation with no blendable entry leaves the previous theme in
    /// place and returns `None`.
    pub fn apply(&mut self, emotion_map: &EmotionMap) -> Option<EmotionTheme> {
        let color_set = compute_theme(emotion_map)?;
        let theme = EmotionTheme {
            emotion_map: emotion_map.clone(),
            color_set,
            updated_at: Utc::now(),
        };
        self.persist(&theme);
        self.current = Some(theme.clone());
        Some(theme)
    }

    /// Recover the theme after a restart.
    ///
    /// Prefers the persisted theme. Otherwise scans `messages` newest first for
    /// the most recent non-empty annotation and persists what it computes.
    pub fn restore_theme(&mut self, messages: &[Message]) -> Option<EmotionTheme> {
        if let Some(theme) = self.load_persisted() {
            self.current = Some(theme.clone());
            return Some(theme);
        }

        let mut newest_first: Vec<&Message> = messages.iter().collect();
        newest_first.sort_by(|a, b| b.sort_key().total_cmp(&a.sort_key()));

        let (message, emotion_map) = newest_first
            .into_iter()
            .find_map(|m| m.emotion_map().map(|map| (m, map)))?;

        let color_set = compute_theme(&emotion_map)?;
        let updated_at = message
            .finite_timestamp()
            .and_then(timestamp_to_datetime)
            .unwrap_or_else(Utc::now);

        let theme = EmotionTheme {
            emotion_map,
            color_set,
            updated_at,
        };

        tracing::debug!(
            conv_id = %self.conversation_id,
            message_id = %message.id,
            "Restored emotion theme from message history"
        );

        self.persist(&theme);
        self.current = Some(theme.clone());
        Some(theme)
    }

    /// Forget the current theme and delete it from storage
    pub fn reset(&mut self) {
        self.current = None;
        if let Err(e) = self.storage.remove(EMOTION_NAMESPACE, &self.conversation_id) {
            tracing::warn!(conv_id = %self.conversation_id, error = %e, "Failed to delete emotion state");
        }
    }

    fn load_persisted(&self) -> Option<EmotionTheme> {
        let raw = match self.storage.load(EMOTION_NAMESPACE, &self.conversation_id) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(conv_id = %self.conversation_id, error = %e, "Failed to read emotion state");
                return None;
            }
        };

        match serde_json::from_str::<EmotionTheme>(&raw) {
            Ok(theme) if !theme.emotion_map.is_empty() => Some(theme),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(conv_id = %self.conversation_id, error = %e, "Discarding corrupt emotion state");
                None
            }
        }
    }

    fn persist(&self, theme: &EmotionTheme) {
        let json = match serde_json::to_string(theme) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(conv_id = %self.conversation_id, error = %e, "Failed to encode emotion state");
                return;
            }
        };
        if let Err(e) = self.storage.save(EMOTION_NAMESPACE, &self.conversation_id, &json) {
            tracing::warn!(conv_id = %self.conversation_id, error = %e, "Failed to persist emotion state");
        }
    }
}

#[allow(clippy::cast_possible_truncation)] // sub-second precision is enough
fn timestamp_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
}
