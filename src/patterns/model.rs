//! The user pattern model: bounded per-sender, per-channel and
//! per-keyword weights, trained only by feedback.
//!
//! Weights never drift unbounded: every mutation clamps back into a
//! fixed range. A decay tick runs once per analyze invocation and pulls
//! every weight a small fraction back toward its neutral default, so
//! stale feedback loses influence over time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::patterns::FeedbackEvent;

/// Neutral default and bounds for sender authority weights.
pub const AUTHORITY_NEUTRAL: f64 = 0.5;
pub const AUTHORITY_MIN: f64 = 0.05;
pub const AUTHORITY_MAX: f64 = 0.95;

/// Neutral default and bounds for channel urgency multipliers.
pub const CHANNEL_NEUTRAL: f64 = 1.0;
pub const CHANNEL_MIN: f64 = 0.5;
pub const CHANNEL_MAX: f64 = 1.5;

/// Neutral default and bounds for keyword boosts.
pub const KEYWORD_NEUTRAL: f64 = 0.0;
pub const KEYWORD_MIN: f64 = -0.25;
pub const KEYWORD_MAX: f64 = 0.25;

/// Rating scale midpoint; ratings above nudge up, below nudge down.
const RATING_MIDPOINT: f64 = 3.0;

/// Distance from the midpoint to either end of the rating scale.
const RATING_HALF_SPAN: f64 = 2.0;

/// Channel multipliers move at half the sender learning rate; the
/// channel is a weaker signal than the person who rated.
const CHANNEL_DELTA_FACTOR: f64 = 0.5;

/// The mutable pattern model. Single process-wide instance, mutated
/// only through [`apply_event`](Self::apply_event) and
/// [`decay_tick`](Self::decay_tick); readers take a [`PatternSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPatternModel {
    /// Bumped on every mutation; carried into snapshots.
    pub version: u64,
    /// Sender id → authority weight.
    sender_weights: HashMap<String, f64>,
    /// Channel id → urgency multiplier.
    channel_multipliers: HashMap<String, f64>,
    /// Keyword → boost.
    keyword_boosts: HashMap<String, f64>,
    /// Step size for feedback adjustments.
    learning_rate: f64,
    /// Per-tick fraction of the gap back toward neutral.
    decay_rate: f64,
}

impl UserPatternModel {
    /// Fresh model with empty maps.
    pub fn new(learning_rate: f64, decay_rate: f64) -> Self {
        Self {
            version: 0,
            sender_weights: HashMap::new(),
            channel_multipliers: HashMap::new(),
            keyword_boosts: HashMap::new(),
            learning_rate,
            decay_rate,
        }
    }

    /// Replays an archived event log over a fresh model. Produces the
    /// same weights as applying each event as it arrived; decay is a
    /// run-time operator and is not part of the projection.
    pub fn rebuild(learning_rate: f64, decay_rate: f64, events: &[FeedbackEvent]) -> Self {
        let mut model = Self::new(learning_rate, decay_rate);
        for event in events {
            model.apply_event(event);
        }
        model
    }

    /// Adopt the configured rates. Persisted models carry the rates
    /// they were saved with; the active configuration wins on load.
    pub fn set_rates(&mut self, learning_rate: f64, decay_rate: f64) {
        self.learning_rate = learning_rate;
        self.decay_rate = decay_rate;
    }

    /// Authority weight for a sender, neutral when unseen.
    pub fn sender_weight(&self, sender_id: &str) -> f64 {
        self.sender_weights
            .get(sender_id)
            .copied()
            .unwrap_or(AUTHORITY_NEUTRAL)
    }

    /// Urgency multiplier for a channel, neutral when unseen.
    pub fn channel_multiplier(&self, channel_id: &str) -> f64 {
        self.channel_multipliers
            .get(channel_id)
            .copied()
            .unwrap_or(CHANNEL_NEUTRAL)
    }

    /// Boost for a keyword, neutral when unseen.
    pub fn keyword_boost(&self, keyword: &str) -> f64 {
        self.keyword_boosts
            .get(keyword)
            .copied()
            .unwrap_or(KEYWORD_NEUTRAL)
    }

    /// Applies one feedback event: the rating maps onto a signed
    /// adjustment, scaled by the learning rate, and nudges the sender
    /// weight, the event's keyword boosts, and (at half strength) the
    /// channel multiplier. Every touched weight is clamped back into
    /// its bounds. Entries are created at neutral before adjustment.
    pub fn apply_event(&mut self, event: &FeedbackEvent) {
        let signed = (f64::from(event.rating) - RATING_MIDPOINT) / RATING_HALF_SPAN;
        let delta = self.learning_rate * signed;

        let sender = self
            .sender_weights
            .entry(event.sender_id.clone())
            .or_insert(AUTHORITY_NEUTRAL);
        *sender = (*sender + delta).clamp(AUTHORITY_MIN, AUTHORITY_MAX);

        let channel = self
            .channel_multipliers
            .entry(event.channel_id.clone())
            .or_insert(CHANNEL_NEUTRAL);
        *channel = (*channel + delta * CHANNEL_DELTA_FACTOR).clamp(CHANNEL_MIN, CHANNEL_MAX);

        for keyword in &event.keywords {
            let boost = self
                .keyword_boosts
                .entry(keyword.clone())
                .or_insert(KEYWORD_NEUTRAL);
            *boost = (*boost + delta).clamp(KEYWORD_MIN, KEYWORD_MAX);
        }

        self.version += 1;
    }

    /// Moves every weight a `decay_rate` fraction of the way back
    /// toward its neutral default. Called once per analyze run.
    pub fn decay_tick(&mut self) {
        if self.decay_rate > 0.0 {
            for w in self.sender_weights.values_mut() {
                *w += (AUTHORITY_NEUTRAL - *w) * self.decay_rate;
                *w = w.clamp(AUTHORITY_MIN, AUTHORITY_MAX);
            }
            for m in self.channel_multipliers.values_mut() {
                *m += (CHANNEL_NEUTRAL - *m) * self.decay_rate;
                *m = m.clamp(CHANNEL_MIN, CHANNEL_MAX);
            }
            for b in self.keyword_boosts.values_mut() {
                *b += (KEYWORD_NEUTRAL - *b) * self.decay_rate;
                *b = b.clamp(KEYWORD_MIN, KEYWORD_MAX);
            }
        }
        self.version += 1;
    }

    /// Immutable view for scoring. Later mutations of the model do not
    /// show through.
    pub fn snapshot(&self) -> PatternSnapshot {
        PatternSnapshot {
            version: self.version,
            sender_weights: self.sender_weights.clone(),
            channel_multipliers: self.channel_multipliers.clone(),
            keyword_boosts: self.keyword_boosts.clone(),
        }
    }

    /// Numbers of learned senders, channels, and keywords.
    pub fn entry_counts(&self) -> (usize, usize, usize) {
        (
            self.sender_weights.len(),
            self.channel_multipliers.len(),
            self.keyword_boosts.len(),
        )
    }
}

/// Frozen view of the pattern model, taken once per scoring pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSnapshot {
    /// Model version at the time of the snapshot.
    pub version: u64,
    sender_weights: HashMap<String, f64>,
    channel_multipliers: HashMap<String, f64>,
    keyword_boosts: HashMap<String, f64>,
}

impl PatternSnapshot {
    /// Authority weight for a sender, neutral when unseen.
    pub fn sender_weight(&self, sender_id: &str) -> f64 {
        self.sender_weights
            .get(sender_id)
            .copied()
            .unwrap_or(AUTHORITY_NEUTRAL)
    }

    /// Urgency multiplier for a channel, neutral when unseen.
    pub fn channel_multiplier(&self, channel_id: &str) -> f64 {
        self.channel_multipliers
            .get(channel_id)
            .copied()
            .unwrap_or(CHANNEL_NEUTRAL)
    }

    /// Sum of boosts for every learned keyword present in `text`
    /// (case-insensitive containment).
    pub fn keyword_boost_sum(&self, text: &str) -> f64 {
        if self.keyword_boosts.is_empty() {
            return 0.0;
        }
        let text = text.to_lowercase();
        self.keyword_boosts
            .iter()
            .filter(|(k, _)| text.contains(k.as_str()))
            .map(|(_, b)| b)
            .sum()
    }

    /// Empty snapshot, used when no model has been trained yet.
    pub fn empty() -> Self {
        Self {
            version: 0,
            sender_weights: HashMap::new(),
            channel_multipliers: HashMap::new(),
            keyword_boosts: HashMap::new(),
        }
    }
}
