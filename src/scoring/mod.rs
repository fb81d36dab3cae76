//! Priority scoring: score/tier types and the calculator.

mod calculator;

pub use calculator::PriorityCalculator;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Coarse priority bucket derived from a continuous score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Urgent,
    High,
    Medium,
    Low,
}

impl Tier {
    /// Human-readable label, also used in rendered output.
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Urgent => "urgent",
            Tier::High => "high",
            Tier::Medium => "medium",
            Tier::Low => "low",
        }
    }
}

/// Convex-combination weights for the four priority sub-scores.
/// Must sum to 1; validated at configuration load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Weight of the sender-authority sub-score.
    #[serde(default = "default_authority_weight")]
    pub authority: f64,
    /// Weight of the time-urgency sub-score.
    #[serde(default = "default_time_weight")]
    pub time_urgency: f64,
    /// Weight of the content-importance sub-score.
    #[serde(default = "default_content_weight")]
    pub content: f64,
    /// Weight of the learned-pattern sub-score.
    #[serde(default = "default_patterns_weight")]
    pub patterns: f64,
}

fn default_authority_weight() -> f64 {
    0.20
}

fn default_time_weight() -> f64 {
    0.25
}

fn default_content_weight() -> f64 {
    0.40
}

fn default_patterns_weight() -> f64 {
    0.15
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            authority: default_authority_weight(),
            time_urgency: default_time_weight(),
            content: default_content_weight(),
            patterns: default_patterns_weight(),
        }
    }
}

impl ScoringWeights {
    /// Checks that every weight is in [0, 1] and the four sum to 1 within
    /// `epsilon`.
    pub fn validate(&self, epsilon: f64) -> Result<(), ConfigError> {
        let weights = [
            ("authority", self.authority),
            ("time_urgency", self.time_urgency),
            ("content", self.content),
            ("patterns", self.patterns),
        ];
        for (name, w) in weights {
            if !(0.0..=1.0).contains(&w) {
                return Err(ConfigError::InvalidValue {
                    key: format!("scoring_weights.{name}"),
                    message: format!("{w} is outside [0, 1]"),
                });
            }
        }
        let sum = self.authority + self.time_urgency + self.content + self.patterns;
        if (sum - 1.0).abs() > epsilon {
            return Err(ConfigError::InvalidValue {
                key: "scoring_weights".to_string(),
                message: format!("weights sum to {sum}, expected 1.0"),
            });
        }
        Ok(())
    }
}

/// Score cut points for tier assignment. A score at or above a cut point
/// lands in that tier; below `medium` is low.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    #[serde(default = "default_urgent_threshold")]
    pub urgent: f64,
    #[serde(default = "default_high_threshold")]
    pub high: f64,
    #[serde(default = "default_medium_threshold")]
    pub medium: f64,
}

fn default_urgent_threshold() -> f64 {
    0.80
}

fn default_high_threshold() -> f64 {
    0.60
}

fn default_medium_threshold() -> f64 {
    0.40
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            urgent: default_urgent_threshold(),
            high: default_high_threshold(),
            medium: default_medium_threshold(),
        }
    }
}

impl TierThresholds {
    /// Checks that the cut points sit strictly descending inside (0, 1).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = 0.0 < self.medium
            && self.medium < self.high
            && self.high < self.urgent
            && self.urgent < 1.0;
        if !ordered {
            return Err(ConfigError::InvalidValue {
                key: "tier_thresholds".to_string(),
                message: format!(
                    "expected 0 < medium < high < urgent < 1, got {} / {} / {}",
                    self.medium, self.high, self.urgent
                ),
            });
        }
        Ok(())
    }

    /// Maps a normalized score onto its tier.
    pub fn tier_for(&self, score: f64) -> Tier {
        if score >= self.urgent {
            Tier::Urgent
        } else if score >= self.high {
            Tier::High
        } else if score >= self.medium {
            Tier::Medium
        } else {
            Tier::Low
        }
    }
}

/// A computed priority: the blended value plus the four contributing
/// sub-scores, kept for explainability. All five stay in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityScore {
    /// Final convex combination of the sub-scores.
    pub value: f64,
    /// Sender authority from the pattern snapshot.
    pub authority: f64,
    /// Recency with configurable half-life, plus thread engagement boost.
    pub time_urgency: f64,
    /// Category and urgency-hint importance, discounted when degraded.
    pub content_importance: f64,
    /// Channel multiplier applied to matched keyword boosts.
    pub pattern_adjustment: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_serde_snake_case() {
        let json = serde_json::to_string(&Tier::Urgent).unwrap();
        assert_eq!(json, "\"urgent\"");

        let parsed: Tier = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(parsed, Tier::Medium);
    }

    #[test]
    fn tier_for_uses_inclusive_cut_points() {
        let t = TierThresholds::default();
        assert_eq!(t.tier_for(0.80), Tier::Urgent);
        assert_eq!(t.tier_for(0.799), Tier::High);
        assert_eq!(t.tier_for(0.60), Tier::High);
        assert_eq!(t.tier_for(0.40), Tier::Medium);
        assert_eq!(t.tier_for(0.399), Tier::Low);
        assert_eq!(t.tier_for(0.0), Tier::Low);
        assert_eq!(t.tier_for(1.0), Tier::Urgent);
    }

    #[test]
    fn weights_validate_rejects_bad_sum() {
        let w = ScoringWeights {
            authority: 0.5,
            time_urgency: 0.5,
            content: 0.5,
            patterns: 0.5,
        };
        assert!(w.validate(1e-6).is_err());
    }

    #[test]
    fn weights_validate_rejects_out_of_range() {
        let w = ScoringWeights {
            authority: -0.2,
            time_urgency: 0.5,
            content: 0.5,
            patterns: 0.2,
        };
        assert!(w.validate(1e-6).is_err());
    }

    #[test]
    fn thresholds_validate_requires_strict_order() {
        let t = TierThresholds {
            urgent: 0.6,
            high: 0.6,
            medium: 0.4,
        };
        assert!(t.validate().is_err());

        let t = TierThresholds {
            urgent: 0.9,
            high: 0.5,
            medium: 0.7,
        };
        assert!(t.validate().is_err());

        assert!(TierThresholds::default().validate().is_ok());
    }
}
