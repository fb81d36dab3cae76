//! Todo data model: generated items and the ranked run output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::AnalysisResult;
use crate::scoring::{PriorityScore, Tier};
use crate::source::RawMessage;

/// Suggested handling window, derived from the priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlingWindow {
    Immediate,
    Today,
    ThisWeek,
}

impl HandlingWindow {
    /// Urgent items want attention now, high-tier items today, the rest
    /// can wait for the week.
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Urgent => HandlingWindow::Immediate,
            Tier::High => HandlingWindow::Today,
            Tier::Medium | Tier::Low => HandlingWindow::ThisWeek,
        }
    }

    /// Human-readable label for rendered output.
    pub fn label(&self) -> &'static str {
        match self {
            HandlingWindow::Immediate => "immediate",
            HandlingWindow::Today => "today",
            HandlingWindow::ThisWeek => "this week",
        }
    }
}

/// A single actionable item generated from one analyzed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    /// Position in the ranked list, starting at 1. Stable within a run;
    /// this is the id `details` and `feedback` commands take.
    pub id: u32,
    /// Short action-oriented title, templated from the category.
    pub title: String,
    /// Context block: where the message came from, a preview, and the
    /// classification rationale.
    pub description: String,
    /// Deterministic tags (message kind, category, channel, degraded).
    pub tags: Vec<String>,
    /// Priority tier the score landed in.
    pub tier: Tier,
    /// Suggested handling window for the tier.
    pub window: HandlingWindow,
    /// Full score breakdown, kept for explainability.
    pub score: PriorityScore,
    /// The message this item was generated from.
    pub message: RawMessage,
    /// The classification behind the score.
    pub analysis: AnalysisResult,
}

/// Item counts per tier, for the run summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub urgent: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl TierCounts {
    pub fn tally(items: &[TodoItem]) -> Self {
        let mut counts = Self::default();
        for item in items {
            match item.tier {
                Tier::Urgent => counts.urgent += 1,
                Tier::High => counts.high += 1,
                Tier::Medium => counts.medium += 1,
                Tier::Low => counts.low += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.urgent + self.high + self.medium + self.low
    }
}

/// One triage run: the ranked items plus run-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoList {
    /// Unique id for this run; feedback events reference it.
    pub run_id: Uuid,
    /// When the run was generated.
    pub generated_at: DateTime<Utc>,
    /// Look-back window the run covered, in hours.
    pub window_hours: u32,
    /// Ranked items, highest priority first.
    pub items: Vec<TodoItem>,
    /// Per-tier item counts.
    pub tier_counts: TierCounts,
}

impl TodoList {
    /// Look up an item by its ranked id.
    pub fn find(&self, todo_id: u32) -> Option<&TodoItem> {
        self.items.iter().find(|item| item.id == todo_id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
