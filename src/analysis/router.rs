//! Analysis router: picks a backend per message and guarantees a
//! result.
//!
//! Selection is cost-driven: a cheap complexity estimate (text length,
//! thread context, trigger keywords) routes simple messages to the
//! low-cost backend and involved ones to the high-cost backend.
//!
//! The router never fails past its boundary. The ladder is: selected
//! backend → one retry on the same backend → single attempt on the
//! other backend → keyword-heuristic fallback flagged as degraded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisBackend, AnalysisResult, Category, UrgencyHint, UsageRecord};
use crate::config::CoreConfig;
use crate::error::{BackendError, ConfigError};
use crate::source::RawMessage;

/// Added to the complexity estimate when a thread root is present.
const THREAD_CONTEXT_WEIGHT: u32 = 150;

/// Added to the complexity estimate per distinct matched trigger keyword.
const TRIGGER_KEYWORD_WEIGHT: u32 = 150;

/// Bounds for the jittered delay before the single same-backend retry.
const RETRY_DELAY_MIN_MS: u64 = 50;
const RETRY_DELAY_MAX_MS: u64 = 250;

/// Messages younger than this get one urgency bump in the heuristic
/// fallback.
const HEURISTIC_RECENT_HOURS: f64 = 1.0;

/// Terms that read as drop-everything urgency.
const HEURISTIC_CRITICAL_TERMS: &[&str] = &["urgent", "asap", "emergency", "critical"];

/// Terms that read as same-day urgency.
const HEURISTIC_HIGH_TERMS: &[&str] = &["deadline", "eod", "blocked", "today"];

/// Terms that suggest the sender wants something from the user.
const HEURISTIC_ACTION_TERMS: &[&str] = &["please", "can you", "could you", "review", "confirm"];

/// Which of the two backends a message was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendChoice {
    LowCost,
    HighCost,
}

impl BackendChoice {
    fn other(self) -> Self {
        match self {
            Self::LowCost => Self::HighCost,
            Self::HighCost => Self::LowCost,
        }
    }
}

/// A routed classification plus its usage record. The record is opaque
/// to scoring and generation; the orchestrator forwards it to the store.
#[derive(Debug, Clone)]
pub struct RoutedAnalysis {
    pub result: AnalysisResult,
    pub usage: UsageRecord,
}

/// Routes messages between the low-cost and high-cost backends.
pub struct AnalysisRouter {
    low_cost: Arc<dyn AnalysisBackend>,
    high_cost: Arc<dyn AnalysisBackend>,
    complexity_threshold: u32,
    trigger_pattern: Option<Regex>,
    call_timeout: Duration,
}

impl AnalysisRouter {
    /// Create a router from the two backend capabilities and the
    /// configured selection policy.
    pub fn new(
        low_cost: Arc<dyn AnalysisBackend>,
        high_cost: Arc<dyn AnalysisBackend>,
        config: &CoreConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            low_cost,
            high_cost,
            complexity_threshold: config.complexity_threshold,
            trigger_pattern: compile_trigger_pattern(&config.trigger_keywords)?,
            call_timeout: config.backend_timeout(),
        })
    }

    /// Classify one message, degrading instead of failing. Always
    /// returns a result plus the usage record for the call that won.
    pub async fn route_and_analyze(&self, message: &RawMessage) -> RoutedAnalysis {
        let estimate = self.complexity_estimate(message);
        let primary = if estimate < self.complexity_threshold {
            BackendChoice::LowCost
        } else {
            BackendChoice::HighCost
        };
        debug!(
            id = %message.id,
            estimate,
            threshold = self.complexity_threshold,
            backend = self.backend_for(primary).id(),
            "Routing message for analysis"
        );

        // First attempt, then one retry on the same backend.
        let primary_backend = self.backend_for(primary);
        match self.classify_once(primary_backend, message).await {
            Ok(result) => return self.routed(message, primary_backend, result),
            Err(e) => {
                warn!(
                    id = %message.id,
                    backend = primary_backend.id(),
                    error = %e,
                    "Backend attempt failed, retrying once"
                );
            }
        }

        let jitter_ms = rand::thread_rng().gen_range(RETRY_DELAY_MIN_MS..RETRY_DELAY_MAX_MS);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

        match self.classify_once(primary_backend, message).await {
            Ok(result) => return self.routed(message, primary_backend, result),
            Err(e) => {
                warn!(
                    id = %message.id,
                    backend = primary_backend.id(),
                    error = %e,
                    "Retry failed, falling back to the other backend"
                );
            }
        }

        // Single attempt on the other backend.
        let fallback_backend = self.backend_for(primary.other());
        match self.classify_once(fallback_backend, message).await {
            Ok(result) => self.routed(message, fallback_backend, result),
            Err(e) => {
                warn!(
                    id = %message.id,
                    backend = fallback_backend.id(),
                    error = %e,
                    "Both backends failed, using heuristic fallback"
                );
                let result = self.heuristic_result(message);
                let usage = UsageRecord {
                    id: Uuid::new_v4(),
                    message_id: message.id.clone(),
                    backend: result.backend.clone(),
                    model: String::new(),
                    estimated_cost: Decimal::ZERO,
                    degraded: true,
                    created_at: Utc::now(),
                };
                RoutedAnalysis { result, usage }
            }
        }
    }

    /// One backend call under the configured deadline.
    async fn classify_once(
        &self,
        backend: &Arc<dyn AnalysisBackend>,
        message: &RawMessage,
    ) -> Result<AnalysisResult, BackendError> {
        match tokio::time::timeout(self.call_timeout, backend.classify(message)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                backend: backend.id().to_string(),
                timeout: self.call_timeout,
            }),
        }
    }

    fn backend_for(&self, choice: BackendChoice) -> &Arc<dyn AnalysisBackend> {
        match choice {
            BackendChoice::LowCost => &self.low_cost,
            BackendChoice::HighCost => &self.high_cost,
        }
    }

    fn routed(
        &self,
        message: &RawMessage,
        backend: &Arc<dyn AnalysisBackend>,
        result: AnalysisResult,
    ) -> RoutedAnalysis {
        info!(
            id = %message.id,
            backend = backend.id(),
            category = result.category.label(),
            urgency = result.urgency.label(),
            "Message classified"
        );
        let usage = UsageRecord {
            id: Uuid::new_v4(),
            message_id: message.id.clone(),
            backend: backend.id().to_string(),
            model: backend.model_id().to_string(),
            estimated_cost: backend.estimated_cost_per_call(),
            degraded: false,
            created_at: Utc::now(),
        };
        RoutedAnalysis { result, usage }
    }

    /// Length plus flat bonuses for thread context and distinct trigger
    /// keywords.
    fn complexity_estimate(&self, message: &RawMessage) -> u32 {
        let mut estimate = message.text.chars().count() as u32;
        if message.thread_root.is_some() {
            estimate += THREAD_CONTEXT_WEIGHT;
        }
        estimate += TRIGGER_KEYWORD_WEIGHT * self.matched_triggers(&message.text).len() as u32;
        estimate
    }

    /// Distinct trigger keywords present in the text, lower-cased.
    fn matched_triggers(&self, text: &str) -> Vec<String> {
        let Some(pattern) = &self.trigger_pattern else {
            return Vec::new();
        };
        let mut matched: Vec<String> = pattern
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        matched.sort();
        matched.dedup();
        matched
    }

    /// Keyword-and-recency classification used when both backends fail.
    fn heuristic_result(&self, message: &RawMessage) -> AnalysisResult {
        let text = message.text.to_lowercase();
        let mut urgency = if HEURISTIC_CRITICAL_TERMS.iter().any(|t| text.contains(t)) {
            UrgencyHint::Critical
        } else if HEURISTIC_HIGH_TERMS.iter().any(|t| text.contains(t)) {
            UrgencyHint::High
        } else if text.contains('?') || HEURISTIC_ACTION_TERMS.iter().any(|t| text.contains(t)) {
            UrgencyHint::Moderate
        } else {
            UrgencyHint::Low
        };
        if urgency == UrgencyHint::Low
            && message.age_hours(Utc::now()) < HEURISTIC_RECENT_HOURS
        {
            urgency = UrgencyHint::Moderate;
        }

        AnalysisResult {
            category: Category::Unknown,
            urgency,
            rationale: "both backends unavailable, keyword heuristics applied".into(),
            keywords: self.matched_triggers(&message.text),
            backend: "heuristic".into(),
            degraded: true,
        }
    }
}

/// Compile the trigger keyword list into one case-insensitive
/// whole-word alternation. `None` when the list is empty.
fn compile_trigger_pattern(keywords: &[String]) -> Result<Option<Regex>, ConfigError> {
    let escaped: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if escaped.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"(?i)\b(?:{})\b", escaped.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            key: "trigger_keywords".to_string(),
            message: e.to_string(),
        })
}
