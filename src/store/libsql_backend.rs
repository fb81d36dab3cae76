//! libSQL backend: the async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. Runs and todo items
//! are stored relationally with JSON payload columns; the pattern
//! model lives in a singleton row and can always be rebuilt from the
//! feedback event log.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::analysis::UsageRecord;
use crate::error::StoreError;
use crate::patterns::{FeedbackEvent, UserPatternModel};
use crate::scoring::Tier;
use crate::store::migrations;
use crate::store::traits::{BackendUsage, Store, StoreStats, TierAverage};
use crate::todos::{TierCounts, TodoItem, TodoList};

/// libSQL store backend.
///
/// Holds a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async
/// use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn str_to_tier(s: &str) -> Tier {
    match s {
        "urgent" => Tier::Urgent,
        "high" => Tier::High,
        "medium" => Tier::Medium,
        _ => Tier::Low,
    }
}

/// Map a libsql row to a FeedbackEvent.
///
/// Column order: 0:id, 1:run_id, 2:todo_id, 3:rating, 4:comment,
/// 5:sender_id, 6:channel_id, 7:keywords, 8:created_at
fn row_to_feedback_event(row: &libsql::Row) -> Result<FeedbackEvent, libsql::Error> {
    let id_str: String = row.get(0)?;
    let run_id_str: String = row.get(1)?;
    let todo_id: i64 = row.get(2)?;
    let rating: i64 = row.get(3)?;
    let comment: Option<String> = row.get(4).ok();
    let sender_id: String = row.get(5)?;
    let channel_id: String = row.get(6)?;
    let keywords_str: String = row.get(7)?;
    let created_str: String = row.get(8)?;

    Ok(FeedbackEvent {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        run_id: Uuid::parse_str(&run_id_str).unwrap_or_else(|_| Uuid::nil()),
        todo_id: todo_id as u32,
        rating: rating as u8,
        comment,
        sender_id,
        channel_id,
        keywords: serde_json::from_str(&keywords_str).unwrap_or_default(),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Store for LibSqlStore {
    async fn load_pattern_model(&self) -> Result<Option<UserPatternModel>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT payload FROM pattern_model WHERE id = 1", ())
            .await
            .map_err(|e| StoreError::Query(format!("load_pattern_model: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let payload: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("load_pattern_model row: {e}")))?;
                let model = serde_json::from_str(&payload).map_err(|e| {
                    StoreError::Serialization(format!("pattern model payload: {e}"))
                })?;
                Ok(Some(model))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("load_pattern_model: {e}"))),
        }
    }

    async fn save_pattern_model(&self, model: &UserPatternModel) -> Result<(), StoreError> {
        let payload = serde_json::to_string(model)
            .map_err(|e| StoreError::Serialization(format!("pattern model payload: {e}")))?;

        self.conn()
            .execute(
                "INSERT OR REPLACE INTO pattern_model (id, version, payload, updated_at)
                 VALUES (1, ?1, ?2, ?3)",
                params![model.version as i64, payload, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("save_pattern_model: {e}")))?;

        debug!(version = model.version, "Pattern model saved");
        Ok(())
    }

    async fn archive_run(&self, list: &TodoList) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO runs (id, generated_at, window_hours, item_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                list.run_id.to_string(),
                list.generated_at.to_rfc3339(),
                list.window_hours as i64,
                list.items.len() as i64,
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("archive_run: {e}")))?;

        for item in &list.items {
            let payload = serde_json::to_string(item)
                .map_err(|e| StoreError::Serialization(format!("todo item payload: {e}")))?;
            conn.execute(
                "INSERT INTO todo_items (run_id, seq, tier, score, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    list.run_id.to_string(),
                    item.id as i64,
                    item.tier.label(),
                    item.score.value,
                    payload,
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("archive_run item {}: {e}", item.id)))?;
        }

        debug!(run_id = %list.run_id, items = list.items.len(), "Run archived");
        Ok(())
    }

    async fn latest_run(&self) -> Result<Option<TodoList>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT id, generated_at, window_hours FROM runs
                 ORDER BY generated_at DESC, created_at DESC LIMIT 1",
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("latest_run: {e}")))?;

        let run_row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(StoreError::Query(format!("latest_run: {e}"))),
        };

        let run_id_str: String = run_row
            .get(0)
            .map_err(|e| StoreError::Query(format!("latest_run row: {e}")))?;
        let generated_str: String = run_row
            .get(1)
            .map_err(|e| StoreError::Query(format!("latest_run row: {e}")))?;
        let window_hours: i64 = run_row
            .get(2)
            .map_err(|e| StoreError::Query(format!("latest_run row: {e}")))?;

        let mut item_rows = conn
            .query(
                "SELECT payload FROM todo_items WHERE run_id = ?1 ORDER BY seq ASC",
                params![run_id_str.clone()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("latest_run items: {e}")))?;

        let mut items: Vec<TodoItem> = Vec::new();
        while let Some(row) = item_rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("latest_run items: {e}")))?
        {
            let payload: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("latest_run item row: {e}")))?;
            let item = serde_json::from_str(&payload)
                .map_err(|e| StoreError::Serialization(format!("todo item payload: {e}")))?;
            items.push(item);
        }

        Ok(Some(TodoList {
            run_id: Uuid::parse_str(&run_id_str).unwrap_or_else(|_| Uuid::nil()),
            generated_at: parse_datetime(&generated_str),
            window_hours: window_hours as u32,
            tier_counts: TierCounts::tally(&items),
            items,
        }))
    }

    async fn append_feedback(&self, event: &FeedbackEvent) -> Result<(), StoreError> {
        let keywords = serde_json::to_string(&event.keywords)
            .map_err(|e| StoreError::Serialization(format!("feedback keywords: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO feedback_events (id, run_id, todo_id, rating, comment, sender_id, channel_id, keywords, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.id.to_string(),
                    event.run_id.to_string(),
                    event.todo_id as i64,
                    event.rating as i64,
                    opt_text(event.comment.as_deref()),
                    event.sender_id.clone(),
                    event.channel_id.clone(),
                    keywords,
                    event.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("append_feedback: {e}")))?;

        debug!(todo_id = event.todo_id, rating = event.rating, "Feedback appended");
        Ok(())
    }

    async fn list_feedback(&self) -> Result<Vec<FeedbackEvent>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, run_id, todo_id, rating, comment, sender_id, channel_id, keywords, created_at
                 FROM feedback_events ORDER BY rowid ASC",
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_feedback: {e}")))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_feedback: {e}")))?
        {
            let event = row_to_feedback_event(&row)
                .map_err(|e| StoreError::Query(format!("list_feedback row: {e}")))?;
            events.push(event);
        }
        Ok(events)
    }

    async fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO analysis_calls (id, message_id, backend, model, estimated_cost, degraded, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.to_string(),
                    record.message_id.clone(),
                    record.backend.clone(),
                    record.model.clone(),
                    record.estimated_cost.to_string(),
                    record.degraded as i64,
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("record_usage: {e}")))?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn();

        let mut rows = conn
            .query("SELECT COUNT(*) FROM runs", ())
            .await
            .map_err(|e| StoreError::Query(format!("stats runs: {e}")))?;
        let runs_recorded: i64 = match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("stats runs: {e}")))?
        {
            Some(row) => row.get(0).unwrap_or(0),
            None => 0,
        };

        // Costs are stored as decimal text; summing happens here rather
        // than in SQL to avoid float drift.
        let mut usage: BTreeMap<String, (u64, Decimal)> = BTreeMap::new();
        let mut rows = conn
            .query("SELECT backend, estimated_cost FROM analysis_calls", ())
            .await
            .map_err(|e| StoreError::Query(format!("stats usage: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("stats usage: {e}")))?
        {
            let backend: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("stats usage row: {e}")))?;
            let cost_str: String = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("stats usage row: {e}")))?;
            let cost = cost_str.parse::<Decimal>().unwrap_or(Decimal::ZERO);
            let entry = usage.entry(backend).or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += cost;
        }
        let messages_processed: u64 = usage.values().map(|(calls, _)| calls).sum();
        let backend_usage: Vec<BackendUsage> = usage
            .into_iter()
            .map(|(backend, (calls, estimated_cost))| BackendUsage {
                backend,
                calls,
                estimated_cost,
            })
            .collect();

        let mut by_tier: BTreeMap<String, (u64, f64)> = BTreeMap::new();
        let mut rows = conn
            .query(
                "SELECT tier, COUNT(*), AVG(score) FROM todo_items GROUP BY tier",
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("stats tiers: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("stats tiers: {e}")))?
        {
            let tier: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("stats tier row: {e}")))?;
            let count: i64 = row.get(1).unwrap_or(0);
            let avg: f64 = row.get(2).unwrap_or(0.0);
            by_tier.insert(tier, (count as u64, avg));
        }
        let average_score_by_tier: Vec<TierAverage> = ["urgent", "high", "medium", "low"]
            .iter()
            .filter_map(|label| {
                by_tier.get(*label).map(|(items, average_score)| TierAverage {
                    tier: str_to_tier(label),
                    items: *items,
                    average_score: *average_score,
                })
            })
            .collect();

        let mut rows = conn
            .query("SELECT COUNT(*), AVG(rating) FROM feedback_events", ())
            .await
            .map_err(|e| StoreError::Query(format!("stats feedback: {e}")))?;
        let (feedback_count, average_rating) = match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("stats feedback: {e}")))?
        {
            Some(row) => {
                let count: i64 = row.get(0).unwrap_or(0);
                let avg = if count > 0 { row.get::<f64>(1).ok() } else { None };
                (count as u64, avg)
            }
            None => (0, None),
        };

        Ok(StoreStats {
            runs_recorded: runs_recorded as u64,
            messages_processed,
            backend_usage,
            average_score_by_tier,
            feedback_count,
            average_rating,
        })
    }
}
