//! Five-stage turn pipeline: self-analysis, gap detection, action
//! planning, execution, learning. The orchestrator owns the load/save
//! discipline — every record is loaded exactly once at the start of a
//! turn and saved exactly once at the end. The learning stage runs after
//! the response is composed and persists its own records; a failure there
//! is logged and never fails the turn.

pub mod analysis;
pub mod context;
pub mod execution;
pub mod gaps;
pub mod learning;
pub mod planning;

use std::sync::Arc;

use tracing::{info, warn};

use crate::classifier::IntentClassifier;
use crate::config::PipelineConfig;
use crate::records::{append_deduped, ChatEntry, GapRecord, KnowledgeRecord, ProjectRecord};
use crate::router::Router;
use crate::sentiment;
use crate::traits::{keys, load_or_default, save_record, KnowledgeStore, ModelProvider};

pub struct Pipeline {
    store: Arc<dyn KnowledgeStore>,
    provider: Arc<dyn ModelProvider>,
    router: Router,
    classifier: IntentClassifier,
    history_window: usize,
}

/// What a completed turn hands back to the job layer.
pub struct TurnOutcome {
    pub response: String,
    pub project: ProjectRecord,
    pub knowledge: KnowledgeRecord,
    pub gaps: GapRecord,
    /// Recent chat history, bounded by the configured window.
    pub chat_tail: Vec<ChatEntry>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        provider: Arc<dyn ModelProvider>,
        router: Router,
        classifier: IntentClassifier,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            router,
            classifier,
            history_window: config.history_window,
        }
    }

    /// Full five-stage turn for one user message.
    pub async fn run_turn(
        &self,
        project_id: &str,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> anyhow::Result<TurnOutcome> {
        let store = self.store.as_ref();

        let mut project: ProjectRecord =
            match store.get(&keys::project(project_id)).await? {
                Some(value) => serde_json::from_value(value)
                    .unwrap_or_else(|_| ProjectRecord::new_draft(project_id)),
                None => ProjectRecord::new_draft(project_id),
            };
        let mut history: Vec<ChatEntry> =
            load_or_default(store, &keys::chat(project_id)).await?;
        let prior: KnowledgeRecord =
            load_or_default(store, &keys::knowledge(user_id, project_id)).await?;
        let learning_record =
            load_or_default(store, &keys::learning(user_id)).await?;

        let turn_gap_secs = history
            .last()
            .map(|e| (chrono::Utc::now() - e.timestamp).num_milliseconds().max(0) as f64 / 1000.0);

        // Inbound messages may be delivered more than once; the chat log
        // keeps a single copy.
        let appended = append_deduped(
            &mut history,
            ChatEntry {
                role: "user".to_string(),
                message: message.to_string(),
                timestamp: chrono::Utc::now(),
                session_id: session_id.to_string(),
                analysis: None,
            },
        );
        if !appended {
            info!(project_id, "Duplicate user message, reprocessing without re-append");
        }

        let ctx = context::derive_context(&history);

        // Stage 1: self-analysis (deterministic).
        let analysis_out = analysis::analyze(&project, &history, &prior, &ctx);

        // Stage 2: gap detection.
        let gap_record = gaps::detect(
            &self.classifier,
            self.provider.as_ref(),
            &self.router,
            &project,
            &analysis_out.knowledge,
        )
        .await;

        // Stage 3: action planning.
        let plan = planning::plan(
            &self.classifier,
            self.provider.as_ref(),
            &self.router,
            &gap_record,
            &analysis_out.knowledge,
            &ctx,
            &learning_record,
        )
        .await;

        // Stage 4: execution (the only stage that writes the project).
        let mood = sentiment::analyze(message);
        let exec = execution::execute(
            &self.classifier,
            self.provider.as_ref(),
            &self.router,
            &mut project,
            &plan,
            &analysis_out.knowledge,
            sentiment::verbosity_band(mood),
            message,
            analysis_out.routed_area,
        )
        .await;

        history.push(ChatEntry {
            role: "assistant".to_string(),
            message: exec.response.clone(),
            timestamp: chrono::Utc::now(),
            session_id: session_id.to_string(),
            analysis: Some(serde_json::json!({
                "sentiment": mood.as_str(),
                "action": plan.action,
                "merged": exec.merged,
                "phases": exec.phases.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            })),
        });

        // The gap record's todos were computed before the merge; recompute
        // completion against the project as it now stands.
        let gap_record = refresh_completion(gap_record, &project);

        save_record(store, &keys::project(project_id), &project).await?;
        save_record(store, &keys::chat(project_id), &history).await?;
        save_record(
            store,
            &keys::knowledge(user_id, project_id),
            &analysis_out.knowledge,
        )
        .await?;
        save_record(store, &keys::gaps(user_id, project_id), &gap_record).await?;

        // Stage 5: learning, after the response exists. Writes only its
        // own records; failure must not fail the turn.
        let observation = learning::TurnObservation {
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            message: message.to_string(),
            turn_gap_secs,
            action: plan.action.clone(),
            action_confidence: plan.confidence,
            reasoning: plan.reasoning.clone(),
            merged: exec.merged,
            engagement: ctx.engagement,
            response_pattern: ctx.response_pattern,
            sentiment: mood,
            snapshot: analysis_out.knowledge.history.last().cloned(),
            project_description: project
                .areas
                .objectives
                .as_ref()
                .and_then(|o| o.description.clone()),
        };
        if let Err(e) = learning::run(
            self.store.clone(),
            self.provider.as_ref(),
            &self.router,
            observation,
        )
        .await
        {
            warn!(error = %e, "Learning stage failed; profile not updated this turn");
        }

        let chat_tail = tail(&history, self.history_window);
        Ok(TurnOutcome {
            response: exec.response,
            project,
            knowledge: analysis_out.knowledge,
            gaps: gap_record,
            chat_tail,
        })
    }

    /// Initialize a project: create the draft if absent and derive the
    /// initial analysis and todo list without consuming a user message.
    pub async fn run_init(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> anyhow::Result<TurnOutcome> {
        let store = self.store.as_ref();

        let project: ProjectRecord = match store.get(&keys::project(project_id)).await? {
            Some(value) => serde_json::from_value(value)
                .unwrap_or_else(|_| ProjectRecord::new_draft(project_id)),
            None => {
                let draft = ProjectRecord::new_draft(project_id);
                info!(project_id, "Created draft project");
                draft
            }
        };

        self.refresh(project, project_id, user_id, welcome_message())
            .await
    }

    /// Re-derive analysis, gaps, and todos from the stored project without
    /// a conversational turn.
    pub async fn run_analyze(
        &self,
        project_id: &str,
        user_id: &str,
    ) -> anyhow::Result<TurnOutcome> {
        let store = self.store.as_ref();
        let project: ProjectRecord = match store.get(&keys::project(project_id)).await? {
            Some(value) => serde_json::from_value(value)
                .unwrap_or_else(|_| ProjectRecord::new_draft(project_id)),
            None => anyhow::bail!("project '{}' not found", project_id),
        };

        let summary = format!(
            "Re-analyzed '{}': see the updated gap list.",
            project.name
        );
        self.refresh(project, project_id, user_id, summary).await
    }

    /// Shared non-conversational path: analysis + gaps, then persist.
    async fn refresh(
        &self,
        project: ProjectRecord,
        project_id: &str,
        user_id: &str,
        response: String,
    ) -> anyhow::Result<TurnOutcome> {
        let store = self.store.as_ref();
        let history: Vec<ChatEntry> = load_or_default(store, &keys::chat(project_id)).await?;
        let prior: KnowledgeRecord =
            load_or_default(store, &keys::knowledge(user_id, project_id)).await?;

        let ctx = context::derive_context(&history);
        let analysis_out = analysis::analyze(&project, &history, &prior, &ctx);
        let gap_record = gaps::detect(
            &self.classifier,
            self.provider.as_ref(),
            &self.router,
            &project,
            &analysis_out.knowledge,
        )
        .await;

        save_record(store, &keys::project(project_id), &project).await?;
        save_record(
            store,
            &keys::knowledge(user_id, project_id),
            &analysis_out.knowledge,
        )
        .await?;
        save_record(store, &keys::gaps(user_id, project_id), &gap_record).await?;

        let chat_tail = tail(&history, self.history_window);
        Ok(TurnOutcome {
            response,
            project,
            knowledge: analysis_out.knowledge,
            gaps: gap_record,
            chat_tail,
        })
    }
}

fn welcome_message() -> String {
    "Let's plan your project. What are you trying to accomplish?".to_string()
}

fn tail(history: &[ChatEntry], window: usize) -> Vec<ChatEntry> {
    let start = history.len().saturating_sub(window);
    history[start..].to_vec()
}

fn refresh_completion(mut record: GapRecord, project: &ProjectRecord) -> GapRecord {
    for todo in &mut record.todos {
        todo.completed = project.area_filled(&todo.id);
    }
    record
}
