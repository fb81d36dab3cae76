//! Message source: raw activity records and the source trait.

pub mod slack;

pub use slack::SlackSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

// ── Raw message ─────────────────────────────────────────────────────

/// How a message reached the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// The user was @-mentioned in a channel.
    Mention,
    /// Direct message conversation.
    Dm,
    /// Reply inside a thread the user participates in.
    ThreadReply,
    /// Ordinary post in a channel the user is a member of.
    ChannelPost,
}

impl MessageKind {
    /// Short label for logging and tags.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mention => "mention",
            Self::Dm => "dm",
            Self::ThreadReply => "thread",
            Self::ChannelPost => "channel",
        }
    }
}

/// One piece of recent activity, converted from the platform's native
/// format by the source adapter. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    /// Platform-native message id, unique within its channel.
    pub id: String,
    /// Sender identifier.
    pub sender_id: String,
    /// Human-readable sender name, falling back to the id when unknown.
    pub sender_name: String,
    /// Channel identifier.
    pub channel_id: String,
    /// Channel display name; the peer's name for direct conversations.
    pub channel_name: String,
    /// Message body.
    pub text: String,
    /// When the message was posted.
    pub timestamp: DateTime<Utc>,
    /// Root message id when this sits inside a thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_root: Option<String>,
    /// How the message reached the user.
    pub kind: MessageKind,
    /// True when the user already participates in the surrounding thread.
    #[serde(default)]
    pub thread_engaged: bool,
    /// Link back to the message, when the platform provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
}

impl RawMessage {
    /// Age at `now`, in hours. Messages timestamped in the future count
    /// as zero age.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let secs = now.signed_duration_since(self.timestamp).num_seconds();
        secs.max(0) as f64 / 3600.0
    }
}

// ── Source trait ────────────────────────────────────────────────────

/// Trait for message sources. Pure I/O, no scoring or analysis logic.
///
/// A fresh `fetch_recent` call yields a fresh window. Implementations
/// deduplicate by (channel id, message id) and skip the user's own and
/// bot-authored messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Source name (e.g. "slack").
    fn name(&self) -> &str;

    /// Fetch activity from the last `window_hours`, at most `max_count`
    /// records. Order is not significant; the pipeline sorts.
    async fn fetch_recent(
        &self,
        window_hours: u32,
        max_count: usize,
    ) -> Result<Vec<RawMessage>, SourceError>;
}
