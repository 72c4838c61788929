//! Typing pacing tables and delay sampling

use rand::Rng;
use std::time::Duration;

/// Inclusive millisecond range a delay is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        Duration::from_millis(rng.gen_range(lo..=hi))
    }

    pub fn contains(&self, d: Duration) -> bool {
        let ms = d.as_millis();
        ms >= u128::from(self.min_ms) && ms <= u128::from(self.max_ms)
    }
}

/// Pacing for one length class of outgoing text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingTier {
    /// Inclusive upper bound in characters; `None` for the last tier
    pub max_chars: Option<usize>,
    /// Minimum time the indicator stays on before the text appears
    pub lead: Duration,
    /// Gap between deciding to type and the indicator turning on
    pub entry: DelayRange,
    /// Keep the indicator on after sending when more text follows
    pub keep_after_send: bool,
}

pub const TYPING_TIERS: [TypingTier; 5] = [
    TypingTier {
        max_chars: Some(15),
        lead: Duration::from_millis(600),
        entry: DelayRange::new(150, 400),
        keep_after_send: false,
    },
    TypingTier {
        max_chars: Some(40),
        lead: Duration::from_millis(1000),
        entry: DelayRange::new(200, 500),
        keep_after_send: false,
    },
    TypingTier {
        max_chars: Some(80),
        lead: Duration::from_millis(1500),
        entry: DelayRange::new(250, 650),
        keep_after_send: false,
    },
    TypingTier {
        max_chars: Some(140),
        lead: Duration::from_millis(2000),
        entry: DelayRange::new(300, 800),
        keep_after_send: true,
    },
    TypingTier {
        max_chars: None,
        lead: Duration::from_millis(2500),
        entry: DelayRange::new(400, 1000),
        keep_after_send: true,
    },
];

/// Tier for `text`, by character count
pub fn tier_for(text: &str) -> &'static TypingTier {
    let chars = text.chars().count();
    TYPING_TIERS
        .iter()
        .find(|tier| tier.max_chars.is_none_or(|max| chars <= max))
        .unwrap_or(&TYPING_TIERS[TYPING_TIERS.len() - 1])
}

/// Weighted delay before a plan starts
#[derive(Debug, Clone, PartialEq)]
pub struct InitiationDelay {
    /// `(probability, range)` bands, tried in order
    pub bands: Vec<(f64, DelayRange)>,
    /// Used when the roll lands past every band
    pub fallback: DelayRange,
}

impl Default for InitiationDelay {
    fn default() -> Self {
        Self {
            bands: vec![
                (0.5, DelayRange::new(200, 400)),
                (0.3, DelayRange::new(500, 800)),
                (0.2, DelayRange::new(1000, 1500)),
            ],
            fallback: DelayRange::new(2000, 3000),
        }
    }
}

impl InitiationDelay {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let roll: f64 = rng.gen();
        let mut cumulative = 0.0;
        for (probability, range) in &self.bands {
            cumulative += probability.max(0.0);
            if roll < cumulative {
                return range.sample(rng);
            }
        }
        self.fallback.sample(rng)
    }
}

/// Indicator flicker before the first send
#[derive(Debug, Clone, PartialEq)]
pub struct HesitationConfig {
    pub probability: f64,
    pub min_cycles: u32,
    pub max_cycles: u32,
    pub on: DelayRange,
    pub gap: DelayRange,
}

impl Default for HesitationConfig {
    fn default() -> Self {
        Self {
            probability: 0.15,
            min_cycles: 1,
            max_cycles: 2,
            on: DelayRange::new(400, 1200),
            gap: DelayRange::new(200, 600),
        }
    }
}

/// One on/off flicker; `gap` is `None` for the last cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HesitationCycle {
    pub on: Duration,
    pub gap: Option<Duration>,
}

impl HesitationConfig {
    /// Roll whether to hesitate, and for how long
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<HesitationCycle> {
        let probability = if self.probability.is_finite() {
            self.probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if !rng.gen_bool(probability) {
            return Vec::new();
        }
        let max_cycles = self.max_cycles.max(self.min_cycles);
        let count = rng.gen_range(self.min_cycles..=max_cycles);
        (0..count)
            .map(|i| HesitationCycle {
                on: self.on.sample(rng),
                gap: (i + 1 < count).then(|| self.gap.sample(rng)),
            })
            .collect()
    }
}
