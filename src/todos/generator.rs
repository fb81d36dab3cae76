//! Turns scored messages into a ranked, actionable todo list.
//!
//! Generation is fully deterministic: titles and tags are templated
//! from the analysis, and ranking orders by score with timestamp and
//! message id as tie-breakers, so a fixed input always produces the
//! same list no matter what order the analyses completed in.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::analysis::{AnalysisResult, Category};
use crate::scoring::{PriorityScore, Tier};
use crate::source::{MessageKind, RawMessage};
use crate::todos::model::{HandlingWindow, TierCounts, TodoItem, TodoList};

/// Longest message preview embedded in a todo description, in chars.
const PREVIEW_CHAR_LIMIT: usize = 160;

/// A message with its analysis and computed score, ready for ranking.
#[derive(Debug, Clone)]
pub struct ScoredMessage {
    pub message: RawMessage,
    pub analysis: AnalysisResult,
    pub score: PriorityScore,
    pub tier: Tier,
}

/// Stateless generator for ranked todo lists.
#[derive(Debug, Clone, Default)]
pub struct TodoGenerator;

impl TodoGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Rank scored messages and materialize them as a todo list.
    /// `now` stamps the run; ids are assigned after ranking, 1..=n.
    pub fn generate(
        &self,
        mut scored: Vec<ScoredMessage>,
        window_hours: u32,
        now: DateTime<Utc>,
    ) -> TodoList {
        scored.sort_by(|a, b| {
            b.score
                .value
                .total_cmp(&a.score.value)
                .then_with(|| a.message.timestamp.cmp(&b.message.timestamp))
                .then_with(|| a.message.id.cmp(&b.message.id))
        });

        let items: Vec<TodoItem> = scored
            .into_iter()
            .zip(1u32..)
            .map(|(entry, id)| self.build_item(id, entry))
            .collect();

        TodoList {
            run_id: Uuid::new_v4(),
            generated_at: now,
            window_hours,
            tier_counts: TierCounts::tally(&items),
            items,
        }
    }

    fn build_item(&self, id: u32, entry: ScoredMessage) -> TodoItem {
        let title = title_for(&entry.message, &entry.analysis);
        let description = description_for(&entry.message, &entry.analysis);
        let tags = tags_for(&entry.message, &entry.analysis);
        TodoItem {
            id,
            title,
            description,
            tags,
            tier: entry.tier,
            window: HandlingWindow::for_tier(entry.tier),
            score: entry.score,
            message: entry.message,
            analysis: entry.analysis,
        }
    }
}

/// Action-oriented title keyed on the message category.
fn title_for(message: &RawMessage, analysis: &AnalysisResult) -> String {
    let sender = &message.sender_name;
    match analysis.category {
        Category::Question => format!("Respond to {sender}'s question"),
        Category::ActionRequired => format!("Review {sender}'s request"),
        Category::DecisionNeeded => format!("Decide on {sender}'s proposal"),
        Category::Informational => format!("Read {sender}'s update"),
        Category::Unknown => format!("Check {sender}'s message"),
    }
}

/// Multi-line context block: origin, quoted preview, rationale, link.
fn description_for(message: &RawMessage, analysis: &AnalysisResult) -> String {
    let origin = match message.kind {
        MessageKind::Dm => format!("Direct message from {}.", message.sender_name),
        MessageKind::Mention => format!(
            "Mentioned by {} in #{}.",
            message.sender_name, message.channel_name
        ),
        MessageKind::ThreadReply => format!(
            "Thread reply from {} in #{}.",
            message.sender_name, message.channel_name
        ),
        MessageKind::ChannelPost => format!(
            "Posted by {} in #{}.",
            message.sender_name, message.channel_name
        ),
    };

    let mut lines = vec![origin, format!("> {}", preview(&message.text))];
    if !analysis.rationale.is_empty() {
        lines.push(format!("Why: {}", analysis.rationale));
    }
    if let Some(link) = &message.permalink {
        lines.push(link.clone());
    }
    lines.join("\n")
}

/// Deterministic tag set: kind, then category, then channel for
/// non-DM messages, then a degraded marker.
fn tags_for(message: &RawMessage, analysis: &AnalysisResult) -> Vec<String> {
    let mut tags = vec![message.kind.label().to_string()];
    tags.push(
        match analysis.category {
            Category::Question => "question",
            Category::ActionRequired => "action",
            Category::DecisionNeeded => "decision",
            Category::Informational => "info",
            Category::Unknown => "triage",
        }
        .to_string(),
    );
    if message.kind != MessageKind::Dm {
        tags.push(format!("#{}", message.channel_name));
    }
    if analysis.degraded {
        tags.push("degraded".to_string());
    }
    tags
}

/// Single-line preview, truncated on a char boundary.
fn preview(text: &str) -> String {
    let flattened: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if flattened.chars().count() <= PREVIEW_CHAR_LIMIT {
        flattened
    } else {
        let truncated: String = flattened.chars().take(PREVIEW_CHAR_LIMIT).collect();
        format!("{truncated}…")
    }
}
