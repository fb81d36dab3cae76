//! Run coordination. One method per user-facing operation.
//!
//! The orchestrator owns the pattern model and is its only writer.
//! Scoring reads a snapshot taken once per run, so a feedback
//! submission landing mid-run never produces mixed weights. Analysis
//! calls fan out with bounded parallelism; the final ordering of a run
//! never depends on completion order.

use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, stream};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::analysis::{AnalysisRouter, RoutedAnalysis};
use crate::config::CoreConfig;
use crate::error::{FeedbackError, Result};
use crate::patterns::{FeedbackEvent, LearningFeedback, UserPatternModel};
use crate::scoring::PriorityCalculator;
use crate::source::{MessageSource, RawMessage};
use crate::store::{Store, StoreStats};
use crate::todos::{ScoredMessage, TodoGenerator, TodoItem, TodoList};

/// Coordinates one source, two analysis backends behind the router, the
/// calculator and the store into the operations the CLI exposes.
pub struct Orchestrator {
    source: Arc<dyn MessageSource>,
    router: AnalysisRouter,
    calculator: PriorityCalculator,
    generator: TodoGenerator,
    store: Arc<dyn Store>,
    model: Mutex<UserPatternModel>,
    config: CoreConfig,
}

impl Orchestrator {
    /// Wires the pipeline and restores the pattern model. A saved
    /// projection wins; otherwise the model is rebuilt from the
    /// feedback log, and a fresh one is used when the log is empty too.
    pub async fn init(
        source: Arc<dyn MessageSource>,
        router: AnalysisRouter,
        store: Arc<dyn Store>,
        config: CoreConfig,
    ) -> Result<Self> {
        let model = match store.load_pattern_model().await? {
            Some(mut model) => {
                model.set_rates(config.learning_rate, config.decay_rate);
                model
            }
            None => {
                let events = store.list_feedback().await?;
                if events.is_empty() {
                    UserPatternModel::new(config.learning_rate, config.decay_rate)
                } else {
                    info!(
                        events = events.len(),
                        "Rebuilding pattern model from the feedback log"
                    );
                    UserPatternModel::rebuild(config.learning_rate, config.decay_rate, &events)
                }
            }
        };
        let (senders, channels, keywords) = model.entry_counts();
        info!(senders, channels, keywords, "Pattern model ready");

        Ok(Self {
            calculator: PriorityCalculator::new(&config),
            generator: TodoGenerator::new(),
            source,
            router,
            store,
            model: Mutex::new(model),
            config,
        })
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Runs one full pass: fetch, classify, score, rank, archive.
    /// `None` arguments fall back to the configured defaults. The run
    /// is archived before it is returned; an archive failure fails the
    /// run.
    pub async fn analyze(
        &self,
        window_hours: Option<u32>,
        max_count: Option<usize>,
    ) -> Result<TodoList> {
        let window_hours = window_hours.unwrap_or(self.config.window_hours);
        let max_count = max_count.unwrap_or(self.config.max_messages);
        info!(window_hours, max_count, source = self.source.name(), "Starting analyze run");

        // Decay runs once per analyze invocation, before the snapshot,
        // and the decayed model is persisted even if the run fails
        // later.
        let snapshot = {
            let mut model = self.model.lock().await;
            model.decay_tick();
            self.store.save_pattern_model(&model).await?;
            model.snapshot()
        };

        let mut messages = self.source.fetch_recent(window_hours, max_count).await?;
        // The source already caps its result; the cap holds here even
        // when a source does not.
        messages.truncate(max_count);
        info!(count = messages.len(), "Fetched recent messages");

        let parallel = self.config.max_parallel_analysis_calls.max(1);
        let entries: Vec<(RawMessage, RoutedAnalysis)> =
            stream::iter(messages.into_iter().map(|message| async move {
                let routed = self.router.route_and_analyze(&message).await;
                (message, routed)
            }))
            .buffer_unordered(parallel)
            .collect()
            .await;

        let degraded = entries.iter().filter(|(_, r)| r.result.degraded).count();
        for (_, routed) in &entries {
            self.store.record_usage(&routed.usage).await?;
        }

        // One clock reading for the whole run keeps the ranking
        // reproducible regardless of how long analysis took.
        let now = Utc::now();
        let scored: Vec<ScoredMessage> = entries
            .into_iter()
            .map(|(message, routed)| {
                let score = self.calculator.score(&message, &routed.result, &snapshot, now);
                let tier = self.calculator.tier(&score);
                ScoredMessage { message, analysis: routed.result, score, tier }
            })
            .collect();

        let list = self.generator.generate(scored, window_hours, now);
        self.store.archive_run(&list).await?;
        info!(
            run_id = %list.run_id,
            items = list.items.len(),
            urgent = list.tier_counts.urgent,
            high = list.tier_counts.high,
            degraded,
            "Analyze run complete"
        );
        Ok(list)
    }

    /// Full detail for one todo in the latest archived run.
    pub async fn get_details(&self, todo_id: u32) -> Result<TodoItem> {
        let run = self
            .store
            .latest_run()
            .await?
            .ok_or(FeedbackError::NoArchivedRun)?;
        run.find(todo_id)
            .cloned()
            .ok_or_else(|| FeedbackError::UnknownTodo { id: todo_id }.into())
    }

    /// Records a satisfaction rating against the latest run and trains
    /// the pattern model with it. Validation happens before anything is
    /// written; a rejected submission leaves both the log and the model
    /// untouched.
    pub async fn submit_feedback(&self, feedback: LearningFeedback) -> Result<()> {
        if !(1..=5).contains(&feedback.rating) {
            return Err(FeedbackError::RatingOutOfRange { rating: feedback.rating }.into());
        }
        let run = self
            .store
            .latest_run()
            .await?
            .ok_or(FeedbackError::NoArchivedRun)?;
        let item = run
            .find(feedback.todo_id)
            .ok_or(FeedbackError::UnknownTodo { id: feedback.todo_id })?;

        let event = FeedbackEvent {
            id: Uuid::new_v4(),
            run_id: run.run_id,
            todo_id: feedback.todo_id,
            rating: feedback.rating,
            comment: feedback.comment,
            sender_id: item.message.sender_id.clone(),
            channel_id: item.message.channel_id.clone(),
            keywords: item.analysis.keywords.clone(),
            created_at: feedback.created_at,
        };

        // The event log is the durable record; it is appended before
        // the projection moves.
        self.store.append_feedback(&event).await?;

        let mut model = self.model.lock().await;
        model.apply_event(&event);
        self.store.save_pattern_model(&model).await?;
        info!(
            todo_id = feedback.todo_id,
            rating = feedback.rating,
            version = model.version,
            "Feedback applied to pattern model"
        );
        Ok(())
    }

    /// The effective configuration for this process.
    pub fn get_config(&self) -> &CoreConfig {
        &self.config
    }

    /// Aggregate usage and feedback statistics from the store.
    pub async fn get_stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::analysis::{AnalysisBackend, AnalysisResult, Category, UrgencyHint};
    use crate::error::{BackendError, Error, SourceError};
    use crate::source::MessageKind;
    use crate::store::LibSqlStore;

    struct ScriptedSource {
        batches: Mutex<VecDeque<std::result::Result<Vec<RawMessage>, SourceError>>>,
    }

    impl ScriptedSource {
        fn new(batches: Vec<std::result::Result<Vec<RawMessage>, SourceError>>) -> Self {
            Self { batches: Mutex::new(batches.into_iter().collect()) }
        }
    }

    #[async_trait]
    impl MessageSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch_recent(
            &self,
            _window_hours: u32,
            _max_count: usize,
        ) -> std::result::Result<Vec<RawMessage>, SourceError> {
            self.batches
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// Classifies by text markers so results are stable under any
    /// completion order: "decide" is critical, "?" is a question,
    /// anything else is informational. "budget" becomes a keyword.
    struct StubBackend {
        id: &'static str,
    }

    #[async_trait]
    impl AnalysisBackend for StubBackend {
        fn id(&self) -> &str {
            self.id
        }

        fn model_id(&self) -> &str {
            "stub-model"
        }

        fn estimated_cost_per_call(&self) -> Decimal {
            dec!(0.001)
        }

        async fn classify(
            &self,
            message: &RawMessage,
        ) -> std::result::Result<AnalysisResult, BackendError> {
            let text = message.text.to_lowercase();
            let (category, urgency) = if text.contains("decide") {
                (Category::DecisionNeeded, UrgencyHint::Critical)
            } else if text.contains('?') {
                (Category::Question, UrgencyHint::Moderate)
            } else {
                (Category::Informational, UrgencyHint::Low)
            };
            let keywords = if text.contains("budget") {
                vec!["budget".to_string()]
            } else {
                Vec::new()
            };
            Ok(AnalysisResult {
                category,
                urgency,
                rationale: "scripted".to_string(),
                keywords,
                backend: self.id.to_string(),
                degraded: false,
            })
        }
    }

    fn make_message(id: &str, sender: &str, text: &str, minutes_ago: i64) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            sender_id: sender.to_string(),
            sender_name: sender.to_string(),
            channel_id: "C01".to_string(),
            channel_name: "general".to_string(),
            text: text.to_string(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            thread_root: None,
            kind: MessageKind::ChannelPost,
            thread_engaged: false,
            permalink: None,
        }
    }

    fn make_event(sender: &str, rating: u8) -> FeedbackEvent {
        FeedbackEvent {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            todo_id: 1,
            rating,
            comment: None,
            sender_id: sender.to_string(),
            channel_id: "C01".to_string(),
            keywords: Vec::new(),
            created_at: Utc::now(),
        }
    }

    async fn make_orchestrator_with_store(
        batches: Vec<std::result::Result<Vec<RawMessage>, SourceError>>,
        store: Arc<LibSqlStore>,
    ) -> Orchestrator {
        let config = CoreConfig::default();
        let router = AnalysisRouter::new(
            Arc::new(StubBackend { id: "stub-low" }),
            Arc::new(StubBackend { id: "stub-high" }),
            &config,
        )
        .unwrap();
        Orchestrator::init(Arc::new(ScriptedSource::new(batches)), router, store, config)
            .await
            .unwrap()
    }

    async fn make_orchestrator(
        batches: Vec<std::result::Result<Vec<RawMessage>, SourceError>>,
    ) -> (Orchestrator, Arc<LibSqlStore>) {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let orchestrator = make_orchestrator_with_store(batches, store.clone()).await;
        (orchestrator, store)
    }

    #[tokio::test]
    async fn analyze_ranks_scores_and_archives() {
        let batch = vec![
            make_message("C01:1", "U1ALICE", "Weekly notes from the team sync", 60),
            make_message("C01:2", "U2BOB", "Please decide on the budget plan", 10),
            make_message("C01:3", "U3CARA", "Can you take a quick look?", 30),
        ];
        let (orchestrator, store) = make_orchestrator(vec![Ok(batch)]).await;

        let list = orchestrator.analyze(None, None).await.unwrap();

        assert_eq!(list.items.len(), 3);
        let ids: Vec<u32> = list.items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(list.items[0].message.text.contains("decide"));
        assert!(list.items[0].score.value > list.items[1].score.value);
        assert!(list.items[1].score.value > list.items[2].score.value);

        let archived = store.latest_run().await.unwrap().unwrap();
        assert_eq!(archived.run_id, list.run_id);
        assert_eq!(archived.items.len(), 3);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.runs_recorded, 1);
        assert_eq!(stats.messages_processed, 3);
    }

    #[tokio::test]
    async fn analyze_with_no_messages_archives_an_empty_run() {
        let (orchestrator, store) = make_orchestrator(vec![Ok(Vec::new())]).await;

        let list = orchestrator.analyze(None, None).await.unwrap();

        assert!(list.is_empty());
        assert_eq!(list.tier_counts.total(), 0);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.runs_recorded, 1);
        assert_eq!(stats.messages_processed, 0);
    }

    #[tokio::test]
    async fn analyze_fails_the_run_when_the_source_fails() {
        let failure = SourceError::RequestFailed {
            name: "scripted".to_string(),
            reason: "connection refused".to_string(),
        };
        let (orchestrator, store) = make_orchestrator(vec![Err(failure)]).await;

        let err = orchestrator.analyze(None, None).await.unwrap_err();

        assert!(matches!(err, Error::Source(_)));
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.runs_recorded, 0);
    }

    #[tokio::test]
    async fn analyze_caps_the_batch_at_the_requested_maximum() {
        let batch = vec![
            make_message("C01:1", "U1ALICE", "First update", 5),
            make_message("C01:2", "U2BOB", "Second update", 10),
            make_message("C01:3", "U3CARA", "Third update", 15),
        ];
        let (orchestrator, _store) = make_orchestrator(vec![Ok(batch)]).await;

        let list = orchestrator.analyze(None, Some(2)).await.unwrap();

        assert_eq!(list.items.len(), 2);
        let sources: Vec<&str> =
            list.items.iter().map(|i| i.message.id.as_str()).collect();
        assert!(sources.contains(&"C01:1"));
        assert!(sources.contains(&"C01:2"));
    }

    #[tokio::test]
    async fn analyze_decays_and_persists_the_model_once_per_run() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let mut model = UserPatternModel::new(0.05, 0.02);
        model.apply_event(&make_event("U1ALICE", 5));
        store.save_pattern_model(&model).await.unwrap();

        let orchestrator = make_orchestrator_with_store(vec![Ok(Vec::new())], store.clone()).await;
        orchestrator.analyze(None, None).await.unwrap();

        let saved = store.load_pattern_model().await.unwrap().unwrap();
        // 0.55 pulled 2% of the way back toward 0.5.
        assert!((saved.sender_weight("U1ALICE") - 0.549).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ranking_is_stable_across_identical_runs() {
        let batch = vec![
            make_message("C01:1", "U1ALICE", "Please decide on the rollout", 20),
            make_message("C01:2", "U2BOB", "Does this need a follow up?", 40),
            make_message("C01:3", "U3CARA", "Notes from the retro", 90),
        ];
        let (orchestrator, _store) =
            make_orchestrator(vec![Ok(batch.clone()), Ok(batch)]).await;

        let first = orchestrator.analyze(None, None).await.unwrap();
        let second = orchestrator.analyze(None, None).await.unwrap();

        let first_ids: Vec<&str> = first.items.iter().map(|i| i.message.id.as_str()).collect();
        let second_ids: Vec<&str> = second.items.iter().map(|i| i.message.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn trained_sender_outranks_an_unseen_one() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let mut model = UserPatternModel::new(0.05, 0.02);
        for _ in 0..5 {
            model.apply_event(&make_event("U9VIP", 5));
        }
        store.save_pattern_model(&model).await.unwrap();

        let batch = vec![
            make_message("C01:1", "U0NEW", "Notes from the platform sync", 30),
            make_message("C01:2", "U9VIP", "Notes from the platform sync", 30),
        ];
        let orchestrator = make_orchestrator_with_store(vec![Ok(batch)], store).await;

        let list = orchestrator.analyze(None, None).await.unwrap();

        assert_eq!(list.items[0].message.sender_id, "U9VIP");
        assert!(list.items[0].score.authority > list.items[1].score.authority);
    }

    #[tokio::test]
    async fn details_resolve_against_the_latest_run() {
        let batch = vec![make_message("C01:1", "U1ALICE", "Please decide soon", 10)];
        let (orchestrator, _store) = make_orchestrator(vec![Ok(batch)]).await;
        orchestrator.analyze(None, None).await.unwrap();

        let item = orchestrator.get_details(1).await.unwrap();
        assert_eq!(item.id, 1);
        assert_eq!(item.message.sender_id, "U1ALICE");

        let err = orchestrator.get_details(99).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Feedback(FeedbackError::UnknownTodo { id: 99 })
        ));
    }

    #[tokio::test]
    async fn details_require_an_archived_run() {
        let (orchestrator, _store) = make_orchestrator(Vec::new()).await;

        let err = orchestrator.get_details(1).await.unwrap_err();
        assert!(matches!(err, Error::Feedback(FeedbackError::NoArchivedRun)));
    }

    #[tokio::test]
    async fn feedback_trains_and_persists_the_model() {
        let batch = vec![make_message(
            "C01:1",
            "U2BOB",
            "Please decide on the budget plan",
            10,
        )];
        let (orchestrator, store) = make_orchestrator(vec![Ok(batch)]).await;
        orchestrator.analyze(None, None).await.unwrap();

        orchestrator
            .submit_feedback(LearningFeedback {
                todo_id: 1,
                rating: 5,
                comment: Some("spot on".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let events = store.list_feedback().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sender_id, "U2BOB");
        assert_eq!(events[0].keywords, vec!["budget".to_string()]);

        let saved = store.load_pattern_model().await.unwrap().unwrap();
        assert!((saved.sender_weight("U2BOB") - 0.55).abs() < 1e-9);
        assert!((saved.keyword_boost("budget") - 0.05).abs() < 1e-9);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.feedback_count, 1);
        assert_eq!(stats.average_rating, Some(5.0));
    }

    #[tokio::test]
    async fn feedback_rejects_out_of_range_ratings() {
        let batch = vec![make_message("C01:1", "U1ALICE", "Quick note", 10)];
        let (orchestrator, store) = make_orchestrator(vec![Ok(batch)]).await;
        orchestrator.analyze(None, None).await.unwrap();
        let version_before = store.load_pattern_model().await.unwrap().unwrap().version;

        for rating in [0u8, 6] {
            let err = orchestrator
                .submit_feedback(LearningFeedback {
                    todo_id: 1,
                    rating,
                    comment: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::Feedback(FeedbackError::RatingOutOfRange { .. })
            ));
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.feedback_count, 0);
        let version_after = store.load_pattern_model().await.unwrap().unwrap().version;
        assert_eq!(version_before, version_after);
    }

    #[tokio::test]
    async fn feedback_for_an_unknown_todo_leaves_everything_untouched() {
        let batch = vec![make_message("C01:1", "U1ALICE", "Quick note", 10)];
        let (orchestrator, store) = make_orchestrator(vec![Ok(batch)]).await;
        orchestrator.analyze(None, None).await.unwrap();

        let err = orchestrator
            .submit_feedback(LearningFeedback {
                todo_id: 42,
                rating: 3,
                comment: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Feedback(FeedbackError::UnknownTodo { id: 42 })
        ));
        assert_eq!(store.stats().await.unwrap().feedback_count, 0);
    }

    #[tokio::test]
    async fn init_rebuilds_the_model_from_the_feedback_log() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        store.append_feedback(&make_event("U9VIP", 5)).await.unwrap();
        store.append_feedback(&make_event("U9VIP", 5)).await.unwrap();

        let orchestrator = make_orchestrator_with_store(vec![Ok(Vec::new())], store.clone()).await;
        orchestrator.analyze(None, None).await.unwrap();

        // Two rating-5 events lift the sender to 0.6; one decay tick
        // pulls 2% of the gap back.
        let saved = store.load_pattern_model().await.unwrap().unwrap();
        assert!((saved.sender_weight("U9VIP") - 0.598).abs() < 1e-9);
    }

    #[tokio::test]
    async fn get_stats_reports_backend_usage() {
        let batch = vec![
            make_message("C01:1", "U1ALICE", "Short note", 5),
            make_message("C01:2", "U2BOB", "Another short note", 6),
        ];
        let (orchestrator, _store) = make_orchestrator(vec![Ok(batch)]).await;
        orchestrator.analyze(None, None).await.unwrap();

        let stats = orchestrator.get_stats().await.unwrap();
        assert_eq!(stats.messages_processed, 2);
        let calls: u64 = stats.backend_usage.iter().map(|u| u.calls).sum();
        assert_eq!(calls, 2);
    }
}
