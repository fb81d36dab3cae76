//! Configuration types and loading.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scoring::{ScoringWeights, TierThresholds};

/// Tolerance when checking that scoring weights sum to 1.
const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// Core configuration. Every knob the pipeline recognizes; loadable from a
/// TOML file, with code defaults for anything omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Lookback window for a run, in hours.
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    /// Ceiling on messages processed per run; excess is dropped, not queued.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Model id for the low-cost analysis backend.
    #[serde(default = "default_low_cost_model")]
    pub low_cost_model_id: String,
    /// Model id for the high-cost analysis backend.
    #[serde(default = "default_high_cost_model")]
    pub high_cost_model_id: String,
    /// Complexity estimate at or above this routes to the high-cost backend.
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: u32,
    /// Keywords that raise the complexity estimate (whole-word match).
    #[serde(default = "default_trigger_keywords")]
    pub trigger_keywords: Vec<String>,
    /// Convex-combination weights for the four priority sub-scores.
    #[serde(default)]
    pub scoring_weights: ScoringWeights,
    /// Score cut points for tier assignment.
    #[serde(default)]
    pub tier_thresholds: TierThresholds,
    /// Half-life of the time-urgency sub-score, in hours.
    #[serde(default = "default_half_life_hours")]
    pub half_life_hours: f64,
    /// Step size for feedback-driven weight adjustments.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Per-run fraction by which pattern weights move back toward neutral.
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    /// Concurrent in-flight analysis calls.
    #[serde(default = "default_max_parallel")]
    pub max_parallel_analysis_calls: usize,
    /// Deadline for a single backend call, in seconds.
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    /// Path of the local database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Directory for daily-rolling log files; stderr-only when unset.
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_window_hours() -> u32 {
    24
}

fn default_max_messages() -> usize {
    100
}

fn default_low_cost_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_high_cost_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_complexity_threshold() -> u32 {
    200
}

fn default_trigger_keywords() -> Vec<String> {
    [
        "urgent", "asap", "deadline", "decision", "approve", "budget", "review", "meeting",
        "strategy", "planning",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_half_life_hours() -> f64 {
    12.0
}

fn default_learning_rate() -> f64 {
    0.05
}

fn default_decay_rate() -> f64 {
    0.02
}

fn default_max_parallel() -> usize {
    5
}

fn default_backend_timeout_secs() -> u64 {
    30
}

fn default_db_path() -> String {
    "catchup.db".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            max_messages: default_max_messages(),
            low_cost_model_id: default_low_cost_model(),
            high_cost_model_id: default_high_cost_model(),
            complexity_threshold: default_complexity_threshold(),
            trigger_keywords: default_trigger_keywords(),
            scoring_weights: ScoringWeights::default(),
            tier_thresholds: TierThresholds::default(),
            half_life_hours: default_half_life_hours(),
            learning_rate: default_learning_rate(),
            decay_rate: default_decay_rate(),
            max_parallel_analysis_calls: default_max_parallel(),
            backend_timeout_secs: default_backend_timeout_secs(),
            db_path: default_db_path(),
            log_dir: None,
        }
    }
}

impl CoreConfig {
    /// Loads configuration from a TOML file and validates it.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Parses configuration from a TOML string and validates it.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every invariant the pipeline relies on. Called at load time so
    /// bad configuration fails before any run starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring_weights.validate(WEIGHT_SUM_EPSILON)?;
        self.tier_thresholds.validate()?;

        if self.window_hours == 0 {
            return Err(ConfigError::InvalidValue {
                key: "window_hours".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_messages == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_messages".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_parallel_analysis_calls == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_parallel_analysis_calls".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.backend_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "backend_timeout_secs".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        if self.complexity_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                key: "complexity_threshold".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(self.half_life_hours > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "half_life_hours".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "learning_rate".to_string(),
                message: "must be in (0, 1]".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.decay_rate) {
            return Err(ConfigError::InvalidValue {
                key: "decay_rate".to_string(),
                message: "must be in [0, 1)".to_string(),
            });
        }
        if self.low_cost_model_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "low_cost_model_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.high_cost_model_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "high_cost_model_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Per-call backend deadline.
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

/// API credentials, sourced from the environment and never serialized.
#[derive(Clone)]
pub struct Credentials {
    pub openai_api_key: Option<SecretString>,
    pub anthropic_api_key: Option<SecretString>,
    pub slack_bot_token: Option<SecretString>,
}

impl Credentials {
    /// Reads `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` and `SLACK_BOT_TOKEN`.
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env_secret("OPENAI_API_KEY"),
            anthropic_api_key: env_secret("ANTHROPIC_API_KEY"),
            slack_bot_token: env_secret("SLACK_BOT_TOKEN"),
        }
    }

    pub fn require_openai(&self) -> Result<SecretString, ConfigError> {
        self.openai_api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))
    }

    pub fn require_anthropic(&self) -> Result<SecretString, ConfigError> {
        self.anthropic_api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))
    }

    pub fn require_slack(&self) -> Result<SecretString, ConfigError> {
        self.slack_bot_token
            .clone()
            .ok_or_else(|| ConfigError::MissingEnvVar("SLACK_BOT_TOKEN".to_string()))
    }
}

fn env_secret(key: &str) -> Option<SecretString> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}
