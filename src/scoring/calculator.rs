//! The priority calculator: four normalized sub-scores blended by a
//! convex combination, then a tier from configured cut points.
//!
//! Pure: every input arrives as an argument, including the clock, so a
//! fixed (message, analysis, snapshot, now) quadruple always yields the
//! same score.

use chrono::{DateTime, Utc};

use crate::analysis::{AnalysisResult, Category, UrgencyHint};
use crate::config::CoreConfig;
use crate::patterns::PatternSnapshot;
use crate::scoring::{PriorityScore, ScoringWeights, Tier, TierThresholds};
use crate::source::RawMessage;

/// Time-urgency bonus for messages in a thread the user engages with.
const THREAD_ENGAGEMENT_BOOST: f64 = 0.15;

/// Flat content-importance discount for degraded analyses.
const DEGRADED_CONTENT_PENALTY: f64 = 0.2;

/// Neutral midpoint the pattern sub-score blends from, mirroring the
/// authority default. Without it an untrained model would zero the
/// sub-score for every message.
const PATTERN_NEUTRAL_BASE: f64 = 0.5;

/// Computes priority scores from a message, its analysis, and a
/// pattern snapshot.
#[derive(Debug, Clone)]
pub struct PriorityCalculator {
    weights: ScoringWeights,
    thresholds: TierThresholds,
    half_life_hours: f64,
}

impl PriorityCalculator {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            weights: config.scoring_weights,
            thresholds: config.tier_thresholds,
            half_life_hours: config.half_life_hours,
        }
    }

    /// Score one message. `now` is captured once per run by the caller
    /// so every message in a run is scored against the same clock.
    pub fn score(
        &self,
        message: &RawMessage,
        analysis: &AnalysisResult,
        snapshot: &PatternSnapshot,
        now: DateTime<Utc>,
    ) -> PriorityScore {
        let authority = snapshot.sender_weight(&message.sender_id);
        let time_urgency = self.time_urgency(message, now);
        let content_importance = content_importance(analysis);
        let pattern_adjustment = pattern_adjustment(message, snapshot);

        let value = clamp01(
            self.weights.authority * authority
                + self.weights.time_urgency * time_urgency
                + self.weights.content * content_importance
                + self.weights.patterns * pattern_adjustment,
        );

        PriorityScore {
            value,
            authority,
            time_urgency,
            content_importance,
            pattern_adjustment,
        }
    }

    /// Tier for a computed score.
    pub fn tier(&self, score: &PriorityScore) -> Tier {
        self.thresholds.tier_for(score.value)
    }

    /// Exponential recency: 0.5 ^ (age / half-life), plus a bounded
    /// boost for engaged threads.
    fn time_urgency(&self, message: &RawMessage, now: DateTime<Utc>) -> f64 {
        let age_hours = message.age_hours(now);
        let mut urgency = 0.5_f64.powf(age_hours / self.half_life_hours);
        if message.thread_engaged {
            urgency += THREAD_ENGAGEMENT_BOOST;
        }
        clamp01(urgency)
    }
}

/// Category × urgency-hint lookup, discounted when degraded.
fn content_importance(analysis: &AnalysisResult) -> f64 {
    let base = content_base(analysis.category, analysis.urgency);
    if analysis.degraded {
        clamp01(base - DEGRADED_CONTENT_PENALTY)
    } else {
        base
    }
}

/// The importance matrix. Unknown sits low enough that even before the
/// degraded penalty it never outranks a real classification of the
/// same hint by much.
fn content_base(category: Category, urgency: UrgencyHint) -> f64 {
    use Category::*;
    use UrgencyHint::*;
    match (category, urgency) {
        (Informational, Low) => 0.10,
        (Informational, Moderate) => 0.20,
        (Informational, High) => 0.30,
        (Informational, Critical) => 0.45,
        (Question, Low) => 0.35,
        (Question, Moderate) => 0.50,
        (Question, High) => 0.65,
        (Question, Critical) => 0.80,
        (ActionRequired, Low) => 0.55,
        (ActionRequired, Moderate) => 0.70,
        (ActionRequired, High) => 0.85,
        (ActionRequired, Critical) => 1.00,
        (DecisionNeeded, Low) => 0.60,
        (DecisionNeeded, Moderate) => 0.75,
        (DecisionNeeded, High) => 0.90,
        (DecisionNeeded, Critical) => 1.00,
        (Unknown, Low) => 0.25,
        (Unknown, Moderate) => 0.35,
        (Unknown, High) => 0.45,
        (Unknown, Critical) => 0.55,
    }
}

/// Channel multiplier over the neutral base plus matched keyword
/// boosts, clamped before blending.
fn pattern_adjustment(message: &RawMessage, snapshot: &PatternSnapshot) -> f64 {
    let multiplier = snapshot.channel_multiplier(&message.channel_id);
    let boosts = snapshot.keyword_boost_sum(&message.text);
    clamp01(multiplier * (PATTERN_NEUTRAL_BASE + boosts))
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}
