use async_trait::async_trait;
use serde_json::Value;

/// Per-project/user key-value persistence. Keys are namespaced by record
/// kind (see [`keys`]); list operations back the job queue. No
/// transactions — callers tolerate read-then-write races.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;
    async fn set(&self, key: &str, value: &Value) -> anyhow::Result<()>;

    /// Append an item to the tail of a named list.
    async fn list_push(&self, list: &str, item: &str) -> anyhow::Result<()>;
    /// Inclusive range; `stop = -1` means "to the end".
    async fn list_range(&self, list: &str, start: i64, stop: i64) -> anyhow::Result<Vec<String>>;
    /// Remove the first occurrence of an item from a list.
    async fn list_remove(&self, list: &str, item: &str) -> anyhow::Result<()>;
}

/// Large-language fallback collaborator: text in, text out. The service
/// is not guaranteed to return pure JSON — callers extract defensively
/// via `utils::extract_json_object`.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, model: &str, system: &str, prompt: &str) -> anyhow::Result<String>;
}

/// Store key layout. One record kind per prefix.
pub mod keys {
    pub const JOB_QUEUE: &str = "queue:jobs";
    pub const CLASSIFIER_MODEL: &str = "classifier:model";

    pub fn project(project_id: &str) -> String {
        format!("project:{}", project_id)
    }

    pub fn knowledge(user_id: &str, project_id: &str) -> String {
        format!("knowledge:{}:{}", user_id, project_id)
    }

    pub fn gaps(user_id: &str, project_id: &str) -> String {
        format!("gaps:{}:{}", user_id, project_id)
    }

    pub fn learning(user_id: &str) -> String {
        format!("learning:{}", user_id)
    }

    pub fn reflection(user_id: &str, project_id: &str) -> String {
        format!("reflection:{}:{}", user_id, project_id)
    }

    pub fn chat(project_id: &str) -> String {
        format!("chat:{}", project_id)
    }

    pub fn job(job_id: &str) -> String {
        format!("job:{}", job_id)
    }

    pub fn job_results(job_id: &str) -> String {
        format!("jobresult:{}", job_id)
    }
}

/// Load a typed record, coercing missing or malformed persisted state to
/// the default value (with a warning) rather than failing the turn.
pub async fn load_or_default<T>(store: &dyn KnowledgeStore, key: &str) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match store.get(key).await? {
        None => Ok(T::default()),
        Some(value) => match serde_json::from_value(value) {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::warn!(key, error = %e, "Malformed persisted record, using default");
                Ok(T::default())
            }
        },
    }
}

pub async fn save_record<T: serde::Serialize>(
    store: &dyn KnowledgeStore,
    key: &str,
    record: &T,
) -> anyhow::Result<()> {
    store.set(key, &serde_json::to_value(record)?).await
}
