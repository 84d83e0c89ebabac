//! Startup wiring: build the store, provider, classifier, pipeline, and
//! job queue from config, then run the HTTP daemon until it exits.

use std::sync::Arc;

use tracing::info;

use crate::classifier::IntentClassifier;
use crate::config::AppConfig;
use crate::daemon::{self, AppState};
use crate::jobs::JobQueue;
use crate::pipeline::Pipeline;
use crate::providers::OpenAiCompatibleProvider;
use crate::router::Router;
use crate::state::SqliteKnowledgeStore;
use crate::traits::{KnowledgeStore, ModelProvider};

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store: Arc<dyn KnowledgeStore> =
        Arc::new(SqliteKnowledgeStore::new(&config.state.db_path).await?);
    info!(db_path = %config.state.db_path, "Knowledge store ready");

    let provider: Arc<dyn ModelProvider> = Arc::new(OpenAiCompatibleProvider::new(
        &config.provider.base_url,
        &config.provider.api_key,
        config.provider.request_timeout_secs,
    )?);
    let router = Router::new(config.provider.models.clone());

    let classifier = IntentClassifier::ensure_ready(store.as_ref()).await?;

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        provider,
        router,
        classifier,
        &config.pipeline,
    ));
    let queue = Arc::new(JobQueue::new(store.clone(), pipeline));

    JobQueue::spawn_drain_loop(queue.clone(), config.queue.clone());

    let state = Arc::new(AppState { queue, store });
    daemon::serve(state, &config.daemon).await
}
