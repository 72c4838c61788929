//! Action-sequence playback
//!
//! Replays a remote actor's plan of pauses, sends and recalls with human-like
//! pacing. The typing indicator is driven by length tiers: short texts get a
//! short lead, long texts a long one, and consecutive long texts keep the
//! indicator on in between.
//!
//! All randomness is drawn up front when a plan is prepared, so the RNG is
//! never held across a wait.

mod plan;
mod typing;

pub use plan::{Action, ActionPlan};
pub use typing::{
    tier_for, DelayRange, HesitationConfig, HesitationCycle, InitiationDelay, TypingTier,
    TYPING_TIERS,
};

use crate::db::Message;
use crate::runtime::lock;
use crate::store::{generate_local_id, now_seconds};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Where playback output goes
pub trait PlaybackView: Send + Sync {
    /// Called only when the indicator changes, except for the final forced off
    fn set_typing(&self, on: bool);
    fn show_message(&self, message: Message);
    fn retract_message(&self, message_id: &str);
    fn show_notice(&self, text: String);
}

impl<T: PlaybackView + ?Sized> PlaybackView for Arc<T> {
    fn set_typing(&self, on: bool) {
        (**self).set_typing(on);
    }

    fn show_message(&self, message: Message) {
        (**self).show_message(message);
    }

    fn retract_message(&self, message_id: &str) {
        (**self).retract_message(message_id);
    }

    fn show_notice(&self, text: String) {
        (**self).show_notice(text);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("A plan is already playing")]
    AlreadyRunning,
}

/// Summary of one finished plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub sent: usize,
    pub recalled: usize,
    pub hesitation_cycles: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub conversation_id: String,
    /// Sender id stamped on emitted messages
    pub actor_id: String,
    /// Shown in recall notices
    pub actor_name: String,
    /// `None` starts plans immediately
    pub initiation: Option<InitiationDelay>,
    pub hesitation: HesitationConfig,
}

impl PlaybackConfig {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            actor_id: "rin".to_string(),
            actor_name: "Rin".to_string(),
            initiation: Some(InitiationDelay::default()),
            hesitation: HesitationConfig::default(),
        }
    }

    pub fn with_actor(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.actor_id = id.into();
        self.actor_name = name.into();
        self
    }

    pub fn with_initiation(mut self, initiation: Option<InitiationDelay>) -> Self {
        self.initiation = initiation;
        self
    }

    pub fn with_hesitation(mut self, hesitation: HesitationConfig) -> Self {
        self.hesitation = hesitation;
        self
    }
}

/// Random draws for one plan
struct PreparedPlan {
    initiation: Duration,
    hesitation: Vec<HesitationCycle>,
    /// Per action; `Some` for sends
    entry_delays: Vec<Option<Duration>>,
}

/// Typing indicator with its lead clock
struct Indicator<'a> {
    view: &'a dyn PlaybackView,
    on_since: Option<Instant>,
}

impl<'a> Indicator<'a> {
    fn new(view: &'a dyn PlaybackView) -> Self {
        Self {
            view,
            on_since: None,
        }
    }

    fn is_on(&self) -> bool {
        self.on_since.is_some()
    }

    fn on(&mut self) {
        if self.on_since.is_none() {
            self.on_since = Some(Instant::now());
            self.view.set_typing(true);
        }
    }

    fn off(&mut self) {
        if self.on_since.take().is_some() {
            self.view.set_typing(false);
        }
    }

    fn force_off(&mut self) {
        self.on_since = None;
        self.view.set_typing(false);
    }

    /// Restart the lead clock without toggling
    fn restart_clock(&mut self) {
        if self.on_since.is_some() {
            self.on_since = Some(Instant::now());
        }
    }

    /// Wait until the indicator has been on for at least `target`
    async fn hold_for(&self, target: Duration) {
        if let Some(since) = self.on_since {
            tokio::time::sleep_until(since + target).await;
        }
    }
}

/// Clears the busy flag when a run ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Plays one plan at a time
pub struct PlaybackScheduler {
    config: PlaybackConfig,
    view: Arc<dyn PlaybackView>,
    rng: Mutex<StdRng>,
    busy: AtomicBool,
}

impl PlaybackScheduler {
    pub fn new(config: PlaybackConfig, view: Arc<dyn PlaybackView>) -> Self {
        Self::with_rng(config, view, StdRng::from_entropy())
    }

    /// Deterministic pacing for tests and replays
    pub fn with_rng(config: PlaybackConfig, view: Arc<dyn PlaybackView>, rng: StdRng) -> Self {
        Self {
            config,
            view,
            rng: Mutex::new(rng),
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Play `plan` to completion. Fails only if another plan is playing.
    pub async fn run_plan(&self, plan: ActionPlan) -> Result<PlaybackReport, PlaybackError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(conv_id = %self.config.conversation_id, "Rejecting plan, playback busy");
            return Err(PlaybackError::AlreadyRunning);
        }
        let _guard = BusyGuard(&self.busy);

        let started = Instant::now();
        let prepared = self.prepare(&plan);
        tracing::info!(
            conv_id = %self.config.conversation_id,
            actions = plan.len(),
            initiation_ms = u64::try_from(prepared.initiation.as_millis()).unwrap_or(u64::MAX),
            hesitation_cycles = prepared.hesitation.len(),
            "Starting playback"
        );

        let mut report = PlaybackReport {
            hesitation_cycles: prepared.hesitation.len(),
            ..PlaybackReport::default()
        };
        let mut indicator = Indicator::new(self.view.as_ref());

        tokio::time::sleep(prepared.initiation).await;

        for cycle in &prepared.hesitation {
            indicator.on();
            tokio::time::sleep(cycle.on).await;
            indicator.off();
            if let Some(gap) = cycle.gap {
                tokio::time::sleep(gap).await;
            }
        }

        for (index, action) in plan.actions.iter().enumerate() {
            match action {
                Action::Pause { duration } => match plan.upcoming_send(index) {
                    Some(send) => {
                        self.ensure_lead(&mut indicator, &plan, &prepared, send, *duration)
                            .await;
                    }
                    None => tokio::time::sleep(*duration).await,
                },

                Action::Send {
                    text,
                    message_id,
                    emotion,
                    delay,
                } => {
                    tokio::time::sleep(*delay).await;
                    self.ensure_lead(&mut indicator, &plan, &prepared, index, Duration::ZERO)
                        .await;

                    let message = self.build_message(text, message_id.as_deref(), emotion.as_deref());
                    tracing::debug!(
                        conv_id = %self.config.conversation_id,
                        message_id = %message.id,
                        "Playback send"
                    );
                    self.view.show_message(message);
                    report.sent += 1;

                    let keep = plan.next_send(index).is_some_and(|next| {
                        tier_for(text).keep_after_send || send_tier(&plan, next).keep_after_send
                    });
                    if keep {
                        indicator.restart_clock();
                    } else {
                        indicator.off();
                    }
                }

                Action::Recall { target_id, delay } => {
                    tokio::time::sleep(*delay).await;
                    tracing::debug!(
                        conv_id = %self.config.conversation_id,
                        target_id = %target_id,
                        "Playback recall"
                    );
                    self.view.retract_message(target_id);
                    self.view
                        .show_notice(crate::runtime::recall_notice(&self.config.actor_name));
                    report.recalled += 1;
                }
            }
        }

        indicator.force_off();
        report.elapsed = started.elapsed();

        tracing::info!(
            conv_id = %self.config.conversation_id,
            sent = report.sent,
            recalled = report.recalled,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "Playback finished"
        );
        Ok(report)
    }

    fn prepare(&self, plan: &ActionPlan) -> PreparedPlan {
        let mut rng = lock(&self.rng);
        let initiation = self
            .config
            .initiation
            .as_ref()
            .map_or(Duration::ZERO, |i| i.sample(&mut *rng));
        let hesitation = if plan.actions.iter().any(Action::is_send) {
            self.config.hesitation.sample(&mut *rng)
        } else {
            Vec::new()
        };
        let entry_delays = plan
            .actions
            .iter()
            .map(|action| match action {
                Action::Send { text, .. } => Some(tier_for(text).entry.sample(&mut *rng)),
                _ => None,
            })
            .collect();

        PreparedPlan {
            initiation,
            hesitation,
            entry_delays,
        }
    }

    /// Bring the indicator up for the send at `send` and hold it for
    /// `max(minimum, lead)`
    async fn ensure_lead(
        &self,
        indicator: &mut Indicator<'_>,
        plan: &ActionPlan,
        prepared: &PreparedPlan,
        send: usize,
        minimum: Duration,
    ) {
        if !indicator.is_on() {
            let entry = prepared
                .entry_delays
                .get(send)
                .copied()
                .flatten()
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(entry).await;
            indicator.on();
        }
        let lead = send_tier(plan, send).lead;
        indicator.hold_for(minimum.max(lead)).await;
    }

    fn build_message(&self, text: &str, message_id: Option<&str>, emotion: Option<&str>) -> Message {
        let id = message_id.map_or_else(generate_local_id, str::to_string);
        let message = Message::text(
            self.config.conversation_id.clone(),
            self.config.actor_id.clone(),
            text,
        )
        .with_id(id)
        .with_timestamp(now_seconds());

        match emotion {
            Some(label) => message.with_metadata("emotion", Value::from(label)),
            None => message,
        }
    }
}

fn send_tier(plan: &ActionPlan, index: usize) -> &'static TypingTier {
    match plan.actions.get(index) {
        Some(Action::Send { text, .. }) => tier_for(text),
        _ => &TYPING_TIERS[0],
    }
}
