//! Message analysis: classification types, the backend capability
//! trait, and the router that picks between backends.

pub mod backends;
pub mod router;

pub use backends::{AnthropicBackend, OpenAiBackend};
pub use router::{AnalysisRouter, RoutedAnalysis};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackendError;
use crate::source::RawMessage;

// ── Classification types ────────────────────────────────────────────

/// What kind of response, if any, a message calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// FYI content, no response expected.
    Informational,
    /// Someone is asking the user something.
    Question,
    /// The user is expected to do something.
    ActionRequired,
    /// The user is expected to choose or approve.
    DecisionNeeded,
    /// Classification unavailable (degraded fallback only).
    Unknown,
}

impl Category {
    /// Short label for logging and tags.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Question => "question",
            Self::ActionRequired => "action_required",
            Self::DecisionNeeded => "decision_needed",
            Self::Unknown => "unknown",
        }
    }
}

/// Backend's read on how time-sensitive a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyHint {
    Low,
    Moderate,
    High,
    Critical,
}

impl UrgencyHint {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Canonical classification for one message. Created once by the
/// router; never mutated downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// What the message asks of the user.
    pub category: Category,
    /// Backend's urgency read.
    pub urgency: UrgencyHint,
    /// One or two sentences of reasoning from the classifier.
    pub rationale: String,
    /// Lower-cased terms the classifier found significant; feeds the
    /// pattern model's keyword learning.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Identifier of the backend that produced this result.
    pub backend: String,
    /// True when both backends failed and heuristics filled in.
    #[serde(default)]
    pub degraded: bool,
}

// ── Backend capability ──────────────────────────────────────────────

/// A language-model classification capability. Two production variants
/// exist (low-cost and high-cost); the router is polymorphic over this
/// trait and owns the choice between them.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Stable identifier recorded in results and usage records.
    fn id(&self) -> &str;

    /// Model id this backend invokes.
    fn model_id(&self) -> &str;

    /// Estimated cost of one classification call, in dollars.
    fn estimated_cost_per_call(&self) -> Decimal;

    /// Classify one message. Timeouts and retries are the router's job.
    async fn classify(&self, message: &RawMessage) -> Result<AnalysisResult, BackendError>;
}

// ── Usage record ────────────────────────────────────────────────────

/// One classification call, recorded for cost statistics. Opaque to the
/// rest of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record id.
    pub id: Uuid,
    /// Message the call classified.
    pub message_id: String,
    /// Backend id ("openai", "anthropic", "heuristic").
    pub backend: String,
    /// Model id, empty for the heuristic fallback.
    pub model: String,
    /// Estimated cost of the call, in dollars.
    pub estimated_cost: Decimal,
    /// Whether the result was a degraded fallback.
    pub degraded: bool,
    /// When the call finished.
    pub created_at: DateTime<Utc>,
}
