//! Learned personal patterns: feedback types and the bounded
//! weight model they train.

pub mod model;

pub use model::{PatternSnapshot, UserPatternModel};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Feedback types ──────────────────────────────────────────────────

/// A user's satisfaction rating for one generated todo. Consumed
/// exactly once by the pattern model, then archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningFeedback {
    /// Sequence id of the rated todo within its run.
    pub todo_id: u32,
    /// Satisfaction rating, 1 (useless) to 5 (spot on).
    pub rating: u8,
    /// Optional free-text comment, archived verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// When the feedback was given.
    pub created_at: DateTime<Utc>,
}

/// One archived feedback application. The append-only event log is the
/// source of truth; the pattern model is a projection rebuildable from
/// these rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// Event id.
    pub id: Uuid,
    /// Run the rated todo belonged to.
    pub run_id: Uuid,
    /// Sequence id of the rated todo within that run.
    pub todo_id: u32,
    /// Satisfaction rating, 1 to 5.
    pub rating: u8,
    /// Optional free-text comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Sender of the message behind the rated todo.
    pub sender_id: String,
    /// Channel the message arrived in.
    pub channel_id: String,
    /// Detected keywords from the todo's analysis, lower-cased.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// When the feedback was given.
    pub created_at: DateTime<Utc>,
}
