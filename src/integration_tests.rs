//! End-to-end tests: whole conversations through the job queue and
//! pipeline, against both store backends.

use std::sync::Arc;

use crate::classifier::IntentClassifier;
use crate::config::PipelineConfig;
use crate::jobs::{queue_depth, JobQueue};
use crate::pipeline::Pipeline;
use crate::records::{JobStatus, LearningRecord, ProjectRecord};
use crate::router::Router;
use crate::state::{MemoryKnowledgeStore, SqliteKnowledgeStore};
use crate::traits::{keys, load_or_default, KnowledgeStore, ModelProvider};

/// Provider stub that always errors: every turn must complete on the
/// classifier and deterministic paths alone.
struct OfflineProvider;

#[async_trait::async_trait]
impl ModelProvider for OfflineProvider {
    async fn complete(&self, _: &str, _: &str, _: &str) -> anyhow::Result<String> {
        anyhow::bail!("provider offline")
    }
}

fn build_queue(store: Arc<dyn KnowledgeStore>) -> Arc<JobQueue> {
    let mut classifier = IntentClassifier::new();
    classifier.train_default();
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        Arc::new(OfflineProvider),
        Router::new(crate::config::ModelsConfig::default()),
        classifier,
        &PipelineConfig::default(),
    ));
    Arc::new(JobQueue::new(store, pipeline))
}

async fn send(queue: &JobQueue, project: &str, message: &str) -> crate::records::JobResults {
    let job = queue
        .enqueue("send_message", project, "u1", "s1", Some(message.to_string()))
        .await
        .unwrap();
    let done = queue.poll(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed, "{}", done.message);
    queue.results(&job.id).await.unwrap().unwrap()
}

#[tokio::test]
async fn full_conversation_fills_all_areas_offline() {
    let store = Arc::new(MemoryKnowledgeStore::new());
    let queue = build_queue(store.clone());

    let init = queue.enqueue("init", "p1", "u1", "s1", None).await.unwrap();
    queue.poll(&init.id).await.unwrap();
    let results = queue.results(&init.id).await.unwrap().unwrap();
    assert_eq!(results.project_data.status, "draft");
    assert_eq!(results.todos.len(), 4);
    assert!(results.todos.iter().all(|t| !t.completed));

    let r1 = send(&queue, "p1", "i want to open a coffee shop").await;
    assert_eq!(r1.project_data.name, "Coffee Shop");
    assert!(r1.project_data.area_filled("objectives"));

    let r2 = send(&queue, "p1", "my budget is $30k").await;
    assert_eq!(
        r2.project_data.areas.budget.as_ref().unwrap().total.as_deref(),
        Some("$30k")
    );
    assert!(r2.analysis.completeness > r1.analysis.completeness);

    let r3 = send(&queue, "p1", "we need to finish by june").await;
    assert_eq!(
        r3.project_data.areas.tasks.as_ref().unwrap().deadline.as_deref(),
        Some("june")
    );

    let r4 = send(&queue, "p1", "my team is me and my sister").await;
    assert!(r4.project_data.area_filled("people"));
    // Todos are refreshed against the post-merge project.
    assert!(r4.todos.iter().all(|t| t.completed));

    // The next turn's analysis sees the fully filled project.
    let r5 = send(&queue, "p1", "ok what now").await;
    assert!((r5.analysis.completeness - 1.0).abs() < 1e-9);
    assert!(r5.analysis.confidence > 0.85);
    assert!(r5.analysis.missing_fields.is_empty());

    let gaps: crate::records::GapRecord =
        load_or_default(store.as_ref(), &keys::gaps("u1", "p1")).await.unwrap();
    assert!(gaps.gaps.is_empty());
    assert_eq!(gaps.next_action, "summarize");
}

#[tokio::test]
async fn job_lifecycle_and_persistence_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("pm.db");
    let db_path = db_path.to_str().unwrap();

    {
        let store: Arc<dyn KnowledgeStore> =
            Arc::new(SqliteKnowledgeStore::new(db_path).await.unwrap());
        let queue = build_queue(store.clone());

        let job = queue
            .enqueue(
                "send_message",
                "p1",
                "u1",
                "s1",
                Some("my budget is $30k".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(queue_depth(store.as_ref()).await.unwrap(), 1);

        let done = queue.poll(&job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(queue_depth(store.as_ref()).await.unwrap(), 0);
    }

    // Reopen the database: project and chat survive the restart.
    let store: Arc<dyn KnowledgeStore> =
        Arc::new(SqliteKnowledgeStore::new(db_path).await.unwrap());
    let project: Option<ProjectRecord> = store
        .get(&keys::project("p1"))
        .await
        .unwrap()
        .and_then(|v| serde_json::from_value(v).ok());
    let project = project.unwrap();
    assert_eq!(
        project.areas.budget.as_ref().unwrap().total.as_deref(),
        Some("$30k")
    );
    let chat: Vec<crate::records::ChatEntry> =
        load_or_default(store.as_ref(), &keys::chat("p1")).await.unwrap();
    assert_eq!(chat.len(), 2);
}

#[tokio::test]
async fn redelivered_message_keeps_one_chat_copy() {
    let store = Arc::new(MemoryKnowledgeStore::new());
    let queue = build_queue(store.clone());

    send(&queue, "p1", "my budget is $30k").await;
    // Same payload delivered again as a fresh job.
    send(&queue, "p1", "my budget is $30k").await;

    let chat: Vec<crate::records::ChatEntry> =
        load_or_default(store.as_ref(), &keys::chat("p1")).await.unwrap();
    let user_entries = chat.iter().filter(|e| e.role == "user").count();
    assert_eq!(user_entries, 1);

    // The budget was merged once and kept.
    let project: ProjectRecord = serde_json::from_value(
        store.get(&keys::project("p1")).await.unwrap().unwrap(),
    )
    .unwrap();
    assert_eq!(
        project.areas.budget.as_ref().unwrap().total.as_deref(),
        Some("$30k")
    );
}

#[tokio::test]
async fn terse_user_profile_converges_to_low_engagement() {
    let store = Arc::new(MemoryKnowledgeStore::new());
    let queue = build_queue(store.clone());

    for message in ["hi", "ok", "yes", "sure", "fine"] {
        send(&queue, "p1", message).await;
    }

    let learning: LearningRecord =
        load_or_default(store.as_ref(), &keys::learning("u1")).await.unwrap();
    assert_eq!(learning.user_patterns.engagement_level, "low");
    assert_eq!(learning.user_patterns.preferred_question_style, "direct");
    // Back-to-back replies land in the quick bucket.
    assert_eq!(learning.user_patterns.response_time, "quick");
    assert_eq!(learning.interaction_history.len(), 5);
}
