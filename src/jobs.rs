//! Job queue and worker. Every pipeline run is driven by exactly one job;
//! jobs move queued -> processing -> completed | failed, terminal states
//! are final and a failed job is never retried automatically. Processing
//! is triggered by polling, with an optional background drain sweeping up
//! jobs nobody polled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::QueueConfig;
use crate::pipeline::{Pipeline, TurnOutcome};
use crate::records::{Job, JobResults, JobStatus};
use crate::traits::{keys, load_or_default, save_record, KnowledgeStore};

const JOB_TYPES: &[&str] = &["send_message", "init", "analyze"];

pub struct JobQueue {
    store: Arc<dyn KnowledgeStore>,
    pipeline: Arc<Pipeline>,
    /// Per-project locks: turns for the same project run strictly one at
    /// a time; different projects run concurrently.
    project_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn KnowledgeStore>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            store,
            pipeline,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and persist a new job, then put it on the queue.
    pub async fn enqueue(
        &self,
        job_type: &str,
        project_id: &str,
        user_id: &str,
        session_id: &str,
        input: Option<String>,
    ) -> anyhow::Result<Job> {
        if !JOB_TYPES.contains(&job_type) {
            anyhow::bail!("unknown job type '{}'", job_type);
        }
        if project_id.trim().is_empty() || user_id.trim().is_empty() {
            anyhow::bail!("project_id and user_id are required");
        }
        if job_type == "send_message"
            && input.as_deref().map_or(true, |m| m.trim().is_empty())
        {
            anyhow::bail!("send_message requires a non-empty message");
        }

        let job = Job::new(job_type, project_id, user_id, session_id, input);
        save_record(self.store.as_ref(), &keys::job(&job.id), &job).await?;
        self.store.list_push(keys::JOB_QUEUE, &job.id).await?;
        info!(job_id = %job.id, job_type, project_id, "Job enqueued");
        Ok(job)
    }

    pub async fn get(&self, job_id: &str) -> anyhow::Result<Option<Job>> {
        match self.store.get(&keys::job(job_id)).await? {
            None => Ok(None),
            Some(value) => Ok(serde_json::from_value(value).ok()),
        }
    }

    pub async fn results(&self, job_id: &str) -> anyhow::Result<Option<JobResults>> {
        match self.store.get(&keys::job_results(job_id)).await? {
            None => Ok(None),
            Some(value) => Ok(serde_json::from_value(value).ok()),
        }
    }

    /// Status poll doubles as the processing trigger: a queued job is run
    /// to completion before the poll returns.
    pub async fn poll(&self, job_id: &str) -> anyhow::Result<Option<Job>> {
        let Some(job) = self.get(job_id).await? else {
            return Ok(None);
        };
        if job.status == JobStatus::Queued {
            self.process(&job.id).await?;
        }
        self.get(job_id).await
    }

    /// Run one queued job through the pipeline. Idempotent: anything past
    /// the queued state is returned untouched.
    pub async fn process(&self, job_id: &str) -> anyhow::Result<()> {
        let Some(job) = self.get(job_id).await? else {
            anyhow::bail!("job '{}' not found", job_id);
        };

        let lock = self.project_lock(&job.project_id).await;
        let _guard = lock.lock().await;

        // Re-check under the lock: a concurrent poll or drain pass may
        // have taken the job already.
        let Some(mut job) = self.get(job_id).await? else {
            anyhow::bail!("job '{}' not found", job_id);
        };
        if job.status != JobStatus::Queued {
            return Ok(());
        }

        job.status = JobStatus::Processing;
        job.progress = 10;
        job.message = "Processing".to_string();
        job.updated_at = chrono::Utc::now();
        save_record(self.store.as_ref(), &keys::job(&job.id), &job).await?;

        let outcome = self.run_job(&job).await;

        match outcome {
            Ok(outcome) => {
                let results = JobResults {
                    ai_response: outcome.response,
                    todos: outcome.gaps.todos.clone(),
                    project_data: outcome.project,
                    analysis: outcome.knowledge,
                    chat_history: outcome.chat_tail,
                };
                save_record(self.store.as_ref(), &keys::job_results(&job.id), &results)
                    .await?;
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.message = "Completed".to_string();
                info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.progress = 100;
                job.message = format!("Failed: {}", e);
                error!(job_id = %job.id, error = %e, "Job failed");
            }
        }
        job.updated_at = chrono::Utc::now();
        save_record(self.store.as_ref(), &keys::job(&job.id), &job).await?;
        self.store.list_remove(keys::JOB_QUEUE, &job.id).await?;
        Ok(())
    }

    async fn run_job(&self, job: &Job) -> anyhow::Result<TurnOutcome> {
        match job.job_type.as_str() {
            "send_message" => {
                let message = job
                    .input
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("send_message job has no message"))?;
                self.pipeline
                    .run_turn(&job.project_id, &job.user_id, &job.session_id, message)
                    .await
            }
            "init" => self.pipeline.run_init(&job.project_id, &job.user_id).await,
            "analyze" => {
                self.pipeline
                    .run_analyze(&job.project_id, &job.user_id)
                    .await
            }
            other => anyhow::bail!("unknown job type '{}'", other),
        }
    }

    /// One drain pass: sweep up to `limit` jobs off the head of the queue.
    pub async fn drain(&self, limit: usize) -> anyhow::Result<usize> {
        if limit == 0 {
            return Ok(0);
        }
        let ids = self
            .store
            .list_range(keys::JOB_QUEUE, 0, limit as i64 - 1)
            .await?;
        for id in &ids {
            if let Err(e) = self.process(id).await {
                warn!(job_id = %id, error = %e, "Drain pass failed to process job");
            }
        }
        Ok(ids.len())
    }

    /// Background drain loop, spawned at startup when enabled.
    pub fn spawn_drain_loop(queue: Arc<Self>, config: QueueConfig) {
        if !config.drain_enabled {
            info!("Queue drain loop disabled");
            return;
        }
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(config.drain_interval_secs.max(1)));
            loop {
                ticker.tick().await;
                match queue.drain(config.drain_limit).await {
                    Ok(0) => {}
                    Ok(n) => info!(jobs = n, "Drain pass processed queued jobs"),
                    Err(e) => warn!(error = %e, "Drain pass failed"),
                }
            }
        });
    }

    async fn project_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.project_locks.lock().await;
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Queued-job count, served by the health endpoint.
pub async fn queue_depth(store: &dyn KnowledgeStore) -> anyhow::Result<usize> {
    Ok(store.list_range(keys::JOB_QUEUE, 0, -1).await?.len())
}
