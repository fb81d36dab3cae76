//! Unified `Store` trait: one async interface for all persistence.
//!
//! One backend persists everything the pipeline needs across runs: the
//! archived todo lists, the append-only feedback event log, the pattern
//! model projection, and per-call analysis usage.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::analysis::UsageRecord;
use crate::error::StoreError;
use crate::patterns::{FeedbackEvent, UserPatternModel};
use crate::scoring::Tier;
use crate::todos::TodoList;

/// Call count and summed estimated cost for one analysis backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendUsage {
    pub backend: String,
    pub calls: u64,
    pub estimated_cost: Decimal,
}

/// Average final score of archived items in one tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierAverage {
    pub tier: Tier,
    pub items: u64,
    pub average_score: f64,
}

/// Aggregates across every archived run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub runs_recorded: u64,
    /// Total analysis calls, one per processed message (heuristic
    /// fallbacks included).
    pub messages_processed: u64,
    pub backend_usage: Vec<BackendUsage>,
    pub average_score_by_tier: Vec<TierAverage>,
    pub feedback_count: u64,
    /// Mean rating over all feedback, absent until any exists.
    pub average_rating: Option<f64>,
}

/// Backend-agnostic persistence trait covering runs, feedback, usage,
/// and the pattern model.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load the persisted pattern model projection, if one was saved.
    async fn load_pattern_model(&self) -> Result<Option<UserPatternModel>, StoreError>;

    /// Persist the pattern model projection. Overwrites the previous
    /// one; the feedback event log is the durable history.
    async fn save_pattern_model(&self, model: &UserPatternModel) -> Result<(), StoreError>;

    /// Archive a completed run with all its items.
    async fn archive_run(&self, list: &TodoList) -> Result<(), StoreError>;

    /// The most recently generated run, if any.
    async fn latest_run(&self) -> Result<Option<TodoList>, StoreError>;

    /// Append one feedback event to the log.
    async fn append_feedback(&self, event: &FeedbackEvent) -> Result<(), StoreError>;

    /// Full feedback log in insertion order, for model rebuilds.
    async fn list_feedback(&self) -> Result<Vec<FeedbackEvent>, StoreError>;

    /// Record one analysis call.
    async fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError>;

    /// Aggregate counters across all archived data.
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}
