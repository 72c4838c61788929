//! Action plans as delivered by the remote actor

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAction", into = "RawAction")]
pub enum Action {
    Pause {
        duration: Duration,
    },
    Send {
        text: String,
        message_id: Option<String>,
        emotion: Option<String>,
        /// Extra wait before this step
        delay: Duration,
    },
    Recall {
        target_id: String,
        delay: Duration,
    },
}

impl Action {
    pub fn pause(duration: Duration) -> Self {
        Action::Pause { duration }
    }

    pub fn send(text: impl Into<String>) -> Self {
        Action::Send {
            text: text.into(),
            message_id: None,
            emotion: None,
            delay: Duration::ZERO,
        }
    }

    pub fn recall(target_id: impl Into<String>) -> Self {
        Action::Recall {
            target_id: target_id.into(),
            delay: Duration::ZERO,
        }
    }

    /// Attach an id to a send; no-op for other actions
    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        if let Action::Send { message_id, .. } = &mut self {
            *message_id = Some(id.into());
        }
        self
    }

    #[must_use]
    pub fn with_emotion(mut self, label: impl Into<String>) -> Self {
        if let Action::Send { emotion, .. } = &mut self {
            *emotion = Some(label.into());
        }
        self
    }

    pub fn is_send(&self) -> bool {
        matches!(self, Action::Send { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Pause { .. } => "pause",
            Action::Send { .. } => "send",
            Action::Recall { .. } => "recall",
        }
    }
}

/// Ordered list of actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionPlan {
    pub actions: Vec<Action>,
}

impl ActionPlan {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// Parse a JSON array of actions
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Index of the send the action at `index` leads into: the next action
    /// that is not a pause, if it is a send
    pub fn upcoming_send(&self, index: usize) -> Option<usize> {
        self.actions
            .iter()
            .enumerate()
            .skip(index + 1)
            .find(|(_, a)| !matches!(a, Action::Pause { .. }))
            .filter(|(_, a)| a.is_send())
            .map(|(i, _)| i)
    }

    /// Index of the next send anywhere after `index`
    pub fn next_send(&self, index: usize) -> Option<usize> {
        self.actions
            .iter()
            .enumerate()
            .skip(index + 1)
            .find(|(_, a)| a.is_send())
            .map(|(i, _)| i)
    }
}

// ============================================================================
// Wire form
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    action_type: String,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Map<String, Value>>,
}

/// Negative or non-finite durations count as zero
fn seconds(value: Option<f64>) -> Duration {
    value
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .unwrap_or(Duration::ZERO)
}

fn non_zero_seconds(d: Duration) -> Option<f64> {
    (!d.is_zero()).then(|| d.as_secs_f64())
}

impl TryFrom<RawAction> for Action {
    type Error = String;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        let delay = seconds(raw.duration);
        match raw.action_type.as_str() {
            "pause" => Ok(Action::Pause { duration: delay }),
            "send" => Ok(Action::Send {
                text: raw.text.unwrap_or_default(),
                message_id: raw.message_id.filter(|id| !id.is_empty()),
                emotion: raw
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("emotion"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                delay,
            }),
            "recall" => match raw.target_id.filter(|id| !id.is_empty()) {
                Some(target_id) => Ok(Action::Recall { target_id, delay }),
                None => Err("recall action without target_id".to_string()),
            },
            other => Err(format!("unknown action type: {other}")),
        }
    }
}

impl From<Action> for RawAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Pause { duration } => RawAction {
                action_type: "pause".to_string(),
                duration: Some(duration.as_secs_f64()),
                ..RawAction::default()
            },
            Action::Send {
                text,
                message_id,
                emotion,
                delay,
            } => RawAction {
                action_type: "send".to_string(),
                duration: non_zero_seconds(delay),
                text: Some(text),
                message_id,
                metadata: emotion.map(|e| {
                    let mut m = Map::new();
                    m.insert("emotion".to_string(), Value::String(e));
                    m
                }),
                ..RawAction::default()
            },
            Action::Recall { target_id, delay } => RawAction {
                action_type: "recall".to_string(),
                duration: non_zero_seconds(delay),
                target_id: Some(target_id),
                ..RawAction::default()
            },
        }
    }
}
