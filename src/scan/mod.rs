//! Scan orchestration.
//!
//! A scan batch takes a list of tool ids, creates one task per known
//! tool, and drives each task through the pipeline: tool metadata, TOS
//! resolution and analysis, knowledge merge, alternative suggestions,
//! report generation. A semaphore bounds how many pipelines run at once.
//!
//! Tasks live in an in-process registry keyed by (batch id, tool id), so
//! two concurrent batches scanning the same tool never overwrite each
//! other's state. Status lookups resolve to the most recently created
//! task for a tool.

pub mod task;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::SqlitePool;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ai::AnalysisClient;
use crate::config::Config;
use crate::knowledge;
use crate::scan::task::ScanTask;
use crate::scoring::ScoringEngine;
use crate::store;
use crate::tos::TosService;

/// Shown to callers instead of internal error details.
const FAILURE_MESSAGE: &str = "scan failed, check the server logs";

type TaskKey = (Uuid, i64);

/// Owned arena of scan tasks. All mutation goes through this type under
/// one lock, so task state is never shared mutably across the crate.
#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    tasks: HashMap<TaskKey, ScanTask>,
    // tool id -> batch of the most recently created task for that tool
    latest: HashMap<i64, Uuid>,
}

impl TaskRegistry {
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, batch_id: Uuid, task: ScanTask) {
        let mut inner = self.lock();
        inner.latest.insert(task.tool_id, batch_id);
        inner.tasks.insert((batch_id, task.tool_id), task);
    }

    /// Mutate one task in place under the registry lock.
    pub fn with_task<F: FnOnce(&mut ScanTask)>(&self, batch_id: Uuid, tool_id: i64, f: F) {
        let mut inner = self.lock();
        if let Some(task) = inner.tasks.get_mut(&(batch_id, tool_id)) {
            f(task);
        }
    }

    pub fn get(&self, batch_id: Uuid, tool_id: i64) -> Option<ScanTask> {
        self.lock().tasks.get(&(batch_id, tool_id)).cloned()
    }

    /// The most recently created task for a tool, across all batches.
    pub fn latest_for_tool(&self, tool_id: i64) -> Option<ScanTask> {
        let inner = self.lock();
        let batch_id = *inner.latest.get(&tool_id)?;
        inner.tasks.get(&(batch_id, tool_id)).cloned()
    }

    pub fn batch_tasks(&self, batch_id: Uuid) -> Vec<ScanTask> {
        let inner = self.lock();
        let mut tasks: Vec<ScanTask> = inner
            .tasks
            .iter()
            .filter(|((b, _), _)| *b == batch_id)
            .map(|(_, t)| t.clone())
            .collect();
        tasks.sort_by_key(|t| t.tool_id);
        tasks
    }
}

/// Outcome of batch creation: which requested ids became tasks and
/// which were unknown.
#[derive(Debug)]
pub struct ScanBatch {
    pub batch_id: Uuid,
    pub accepted: Vec<i64>,
    pub skipped: Vec<i64>,
}

pub struct ScanOrchestrator {
    pool: SqlitePool,
    registry: TaskRegistry,
    semaphore: Arc<Semaphore>,
    client: Arc<AnalysisClient>,
    tos: TosService,
    engine: ScoringEngine,
}

impl ScanOrchestrator {
    pub fn new(pool: SqlitePool, config: &Config) -> Result<Self> {
        let client = Arc::new(
            AnalysisClient::from_config(&config.ai, &config.scanning.retry)
                .context("Failed to construct the AI analysis client")?,
        );
        let tos = TosService::new(Arc::clone(&client))?;
        let engine = ScoringEngine::new(config.compliance.clone(), Arc::clone(&client));
        Ok(Self {
            pool,
            registry: TaskRegistry::default(),
            semaphore: Arc::new(Semaphore::new(config.scanning.max_concurrent)),
            client,
            tos,
            engine,
        })
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn provider_name(&self) -> &str {
        self.client.provider_name()
    }

    /// Create pending tasks for the tool ids that exist, preserving the
    /// request order. Unknown ids are skipped with a warning rather than
    /// failing the whole batch.
    pub async fn create_batch(&self, tool_ids: &[i64]) -> Result<ScanBatch> {
        let batch_id = Uuid::new_v4();
        let mut accepted = Vec::new();
        let mut skipped = Vec::new();

        for &tool_id in tool_ids {
            match store::find_tool_by_id(&self.pool, tool_id).await? {
                Some(tool) => {
                    self.registry.insert(batch_id, ScanTask::new(tool.id, &tool.name));
                    accepted.push(tool_id);
                }
                None => {
                    warn!(tool_id, "skipping unknown tool id in scan request");
                    skipped.push(tool_id);
                }
            }
        }

        info!(
            batch = %batch_id,
            accepted = accepted.len(),
            skipped = skipped.len(),
            "scan batch created"
        );
        Ok(ScanBatch {
            batch_id,
            accepted,
            skipped,
        })
    }

    /// Kick off a batch in the background. The spawned supervisor logs
    /// any batch-level failure; per-task failures are already recorded on
    /// the tasks themselves.
    pub fn spawn_batch(self: &Arc<Self>, batch: ScanBatch) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = orchestrator.run_batch(batch).await {
                error!(error = %err, "scan batch aborted");
            }
        });
    }

    /// Run every task in a batch to a terminal state, bounded by the
    /// concurrency limit. Returns the terminal tasks.
    pub async fn run_batch(self: &Arc<Self>, batch: ScanBatch) -> Result<Vec<ScanTask>> {
        let mut handles = Vec::with_capacity(batch.accepted.len());
        for tool_id in &batch.accepted {
            let orchestrator = Arc::clone(self);
            let batch_id = batch.batch_id;
            let tool_id = *tool_id;
            handles.push(tokio::spawn(async move {
                orchestrator.scan_one(batch_id, tool_id).await;
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "scan worker panicked");
            }
        }
        Ok(self.registry.batch_tasks(batch.batch_id))
    }

    async fn scan_one(&self, batch_id: Uuid, tool_id: i64) {
        // Admission gate. Closing the semaphore is not part of the
        // lifecycle, so acquire only fails if the orchestrator is gone.
        let Ok(_permit) = self.semaphore.acquire().await else {
            self.registry
                .with_task(batch_id, tool_id, |t| t.fail(FAILURE_MESSAGE));
            return;
        };

        self.registry.with_task(batch_id, tool_id, |t| t.start());

        match self.run_pipeline(batch_id, tool_id).await {
            Ok(report_id) => {
                self.registry.with_task(batch_id, tool_id, |t| {
                    t.update_progress(1.0, "scan finished");
                    t.complete(json!({
                        "tool_id": tool_id,
                        "report_id": report_id,
                        "message": "compliance scan completed",
                    }));
                });
            }
            Err(err) => {
                error!(tool_id, error = %err, "scan pipeline failed");
                self.registry
                    .with_task(batch_id, tool_id, |t| t.fail(FAILURE_MESSAGE));
            }
        }
    }

    async fn run_pipeline(&self, batch_id: Uuid, tool_id: i64) -> Result<i64> {
        let progress = |p: f64, step: &str| {
            self.registry
                .with_task(batch_id, tool_id, |t| t.update_progress(p, step));
        };

        progress(0.1, "fetching tool metadata");
        let tool = store::find_tool_by_id(&self.pool, tool_id)
            .await?
            .with_context(|| format!("tool {} disappeared during scan", tool_id))?;
        // Version detection is not implemented; record the sentinel so
        // the field is never silently empty.
        store::update_tool_version(&self.pool, tool.id, tool.version.as_deref()).await?;

        progress(0.3, "resolving and analyzing terms of service");
        let mut analysis = self.tos.resolve_and_analyze(&self.pool, &tool).await?;

        progress(0.5, "merging stored knowledge");
        if let Some(known) = knowledge::lookup(&self.pool, &tool.name).await? {
            let filled = knowledge::merge_with_knowledge(&mut analysis, &known);
            if filled > 0 {
                info!(tool = %tool.name, filled, "analysis backfilled from knowledge");
            }
        }

        progress(0.7, "collecting alternative tools");
        if analysis.alternative_tools.is_empty() {
            match self.client.suggest_alternatives(&tool.name).await {
                Ok(alternatives) if !alternatives.is_empty() => {
                    info!(tool = %tool.name, count = alternatives.len(), "alternatives suggested");
                    analysis.alternative_tools = alternatives;
                }
                Ok(_) => {}
                Err(err) => warn!(tool = %tool.name, error = %err, "alternative lookup failed"),
            }
        }

        progress(0.9, "generating compliance report");
        let report = self.engine.generate_report(&self.pool, &tool, &analysis).await?;
        Ok(report.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tracks_latest_task_per_tool() {
        let registry = TaskRegistry::default();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        registry.insert(first, ScanTask::new(1, "docker"));
        registry.with_task(first, 1, |t| t.start());
        registry.insert(second, ScanTask::new(1, "docker"));

        // Both tasks survive under distinct keys.
        assert!(registry.get(first, 1).is_some());
        assert!(registry.get(second, 1).is_some());

        // Lookups resolve to the newer batch.
        let latest = registry.latest_for_tool(1).unwrap();
        assert_eq!(latest.status, task::ScanStatus::Pending);

        // The older task is untouched by the newer insert.
        let old = registry.get(first, 1).unwrap();
        assert_eq!(old.status, task::ScanStatus::Processing);
    }

    #[test]
    fn batch_tasks_are_scoped_to_their_batch() {
        let registry = TaskRegistry::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.insert(a, ScanTask::new(1, "docker"));
        registry.insert(a, ScanTask::new(2, "postman"));
        registry.insert(b, ScanTask::new(3, "anaconda"));

        let tasks = registry.batch_tasks(a);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].tool_id, 1);
        assert_eq!(tasks[1].tool_id, 2);
        assert_eq!(registry.batch_tasks(b).len(), 1);
    }

    #[test]
    fn missing_tasks_are_ignored_by_with_task() {
        let registry = TaskRegistry::default();
        registry.with_task(Uuid::new_v4(), 42, |t| t.start());
        assert!(registry.latest_for_tool(42).is_none());
    }
}
