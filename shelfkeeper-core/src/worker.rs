//! Single-worker dispatch loop: claim a task, route it to its stage
//! processor, record the outcome (spec §4.4).
//!
//! Grounded on `kobold.worker` (the poll/process/backoff loop) and
//! `scan::orchestration::lease::CompletionOutcome` (explicit per-completion
//! result variants in place of bare exception propagation — see the
//! corresponding redesign note).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::model::{Task, TaskKind};
use crate::queue::TaskQueue;

/// Backoff applied after an unexpected error polling the queue itself (not a
/// task failure, which goes through [`TaskQueue::retry_task`]).
const WORKER_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// The outcome a processor reports back to the worker for a single task
/// attempt, mirroring `CompletionOutcome`'s explicit variants instead of
/// relying on exception-vs-success control flow.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    Retry { error: String },
}

/// A single pipeline stage. One implementation per `TaskKind`, each
/// constructed with only the collaborators it needs (spec §4.5, §9 — no
/// shared god-object).
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    fn task_kind(&self) -> TaskKind;

    async fn process(&self, task: &Task) -> Outcome;
}

/// An immutable map from task type to the processor that handles it.
pub struct ProcessorRegistry {
    processors: HashMap<TaskKind, Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    pub fn register(mut self, processor: Arc<dyn TaskProcessor>) -> Self {
        self.processors.insert(processor.task_kind(), processor);
        self
    }

    pub fn get(&self, kind: TaskKind) -> Option<&Arc<dyn TaskProcessor>> {
        self.processors.get(&kind)
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The single-worker dispatch loop. Claims one task at a time from the
/// queue, routes it by `TaskKind` to the matching processor, and records
/// completion or retry/dead-letter on the queue.
pub struct Worker {
    queue: Arc<TaskQueue>,
    registry: ProcessorRegistry,
    poll_interval: Duration,
}

/// Default wait timeout when no wakeup arrives, matching `WORKER_POLL_INTERVAL`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

impl Worker {
    pub fn new(queue: Arc<TaskQueue>, registry: ProcessorRegistry) -> Self {
        Self::with_poll_interval(queue, registry, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        queue: Arc<TaskQueue>,
        registry: ProcessorRegistry,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            registry,
            poll_interval,
        }
    }

    /// Run until `shutdown` resolves. Each iteration claims at most one
    /// task; when none is available the loop waits on the queue's wakeup
    /// signal rather than busy-polling.
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        match self.queue.recover_stale_tasks().await {
            Ok(count) => info!(count, "startup stale-task recovery complete"),
            Err(e) => warn!(error = %e, "startup stale-task recovery failed, continuing"),
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("worker shutting down");
                    return;
                }
                result = self.poll_once() => {
                    if let Err(e) = result {
                        error!(error = %e, "error polling task queue, backing off");
                        tokio::time::sleep(WORKER_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }

    /// Claim and process a single task, or wait for one to arrive. Exposed
    /// separately from `run` so tests can drive the loop deterministically.
    pub async fn poll_once(&self) -> Result<()> {
        match self.queue.fetch_next_task().await? {
            Some(task) => {
                self.process_task(task).await;
                Ok(())
            }
            None => {
                self.queue.wait_for_task(self.poll_interval).await;
                Ok(())
            }
        }
    }

    async fn process_task(&self, task: Task) {
        let kind = task.kind();
        let Some(processor) = self.registry.get(kind) else {
            warn!(task_id = %task.id, task_type = %kind, "no processor registered for task type");
            let _ = self
                .queue
                .fail_immediately(task.id, format!("Unknown task type: {kind}"))
                .await;
            return;
        };

        match processor.process(&task).await {
            Outcome::Completed => {
                if let Err(e) = self.queue.complete_task(task.id).await {
                    error!(task_id = %task.id, error = %e, "failed to persist task completion");
                }
            }
            Outcome::Retry { error } => {
                warn!(task_id = %task.id, task_type = %kind, %error, "task failed");
                if let Err(e) = self.queue.retry_task(task.id, error, None).await {
                    error!(task_id = %task.id, error = %e, "failed to persist task retry");
                }
            }
        }
    }
}

/// Adapt a fallible processor body into an [`Outcome`], formatting the error
/// the same way as the original worker's failure handler
/// (`f"{type(e).__name__}: {e}"`).
pub fn outcome_from_result<T>(result: Result<T>) -> Outcome {
    match result {
        Ok(_) => Outcome::Completed,
        Err(e) => Outcome::Retry {
            error: format!("{e:?}: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct StubProcessor(TaskKind);

    #[async_trait]
    impl TaskProcessor for StubProcessor {
        fn task_kind(&self) -> TaskKind {
            self.0
        }

        async fn process(&self, _task: &Task) -> Outcome {
            Outcome::Completed
        }
    }

    #[test]
    fn registry_routes_by_task_kind() {
        let registry = ProcessorRegistry::new()
            .register(Arc::new(StubProcessor(TaskKind::Ingest)))
            .register(Arc::new(StubProcessor(TaskKind::Organize)));

        assert!(registry.get(TaskKind::Ingest).is_some());
        assert!(registry.get(TaskKind::Organize).is_some());
        assert!(registry.get(TaskKind::Convert).is_none());
    }

    #[test]
    fn outcome_from_result_maps_err_to_retry() {
        let ok: Result<()> = Ok(());
        assert!(matches!(outcome_from_result(ok), Outcome::Completed));

        let err: Result<()> = Err(Error::NotFound("book".to_string()));
        match outcome_from_result(err) {
            Outcome::Retry { error } => assert!(error.contains("book")),
            Outcome::Completed => panic!("expected retry"),
        }
    }
}
