//! Durable task queue backed by Postgres (spec §4.3).
//!
//! Grounded on `scan::orchestration::persistence::PostgresQueueService`
//! (claim-without-double-claim via `FOR UPDATE SKIP LOCKED`, retry/backoff,
//! dead-letter, stale-task recovery) and `kobold.task_queue.TaskQueue`
//! (default backoff formula, full-status-map stats, `Notify`-style wakeup).

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Task, TaskId, TaskKind, TaskPayload, TaskStatus, DEFAULT_MAX_RETRIES, STALE_TASK_MINUTES};

/// All known task statuses, in a stable order — used to build a complete
/// stats map even for statuses with zero rows.
const ALL_STATUSES: [TaskStatus; 5] = [
    TaskStatus::Pending,
    TaskStatus::Processing,
    TaskStatus::Completed,
    TaskStatus::Failed,
    TaskStatus::DeadLetter,
];

/// Base of the exponential backoff applied between retries, in seconds.
const RETRY_BACKOFF_BASE_SECONDS: i64 = 10;

fn default_retry_delay(retry_count: i32) -> ChronoDuration {
    let seconds = RETRY_BACKOFF_BASE_SECONDS * 2i64.pow((retry_count - 1).max(0) as u32);
    ChronoDuration::seconds(seconds)
}

/// A durable, Postgres-backed FIFO-by-priority task queue with retry,
/// dead-lettering, and stale-task recovery. A single [`tokio::sync::Notify`]
/// gives the worker loop a push-style wakeup instead of busy-polling.
pub struct TaskQueue {
    pool: PgPool,
    notify: Notify,
}

impl TaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            notify: Notify::new(),
        }
    }

    /// The underlying pool, exposed for callers (tests, admin tooling) that
    /// need to inspect rows the queue's own API doesn't surface.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wake one waiting `wait_for_task` caller, if any.
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Block until `notify` fires or `timeout` elapses, whichever comes
    /// first. The timeout bound is what lets a scheduled retry become
    /// eligible and get picked up even though nothing calls `notify` again
    /// once its backoff expires.
    pub async fn wait_for_task(&self, timeout: std::time::Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    /// Insert a new pending task and wake up a waiting worker.
    pub async fn add_task(&self, payload: TaskPayload) -> Result<Task> {
        self.add_task_with_retries(payload, DEFAULT_MAX_RETRIES).await
    }

    pub async fn add_task_with_retries(
        &self,
        payload: TaskPayload,
        max_retries: i32,
    ) -> Result<Task> {
        let id = TaskId::new();
        let kind = payload.kind();
        let payload_json = payload.to_json()?;

        let row = sqlx::query(
            r#"
            INSERT INTO tasks (id, task_type, payload, status, retry_count, max_retries, created_at)
            VALUES ($1, $2, $3, 'pending', 0, $4, now())
            RETURNING id, task_type, payload, status, retry_count, max_retries,
                      created_at, started_at, completed_at, next_retry_at, error_message
            "#,
        )
        .bind(id.0)
        .bind(kind.to_string())
        .bind(&payload_json)
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await?;

        let task = row_to_task(&row)?;
        self.notify();
        Ok(task)
    }

    /// Atomically claim the next eligible pending task, marking it
    /// `processing`. Ordered by `next_retry_at` (nulls first), then
    /// `created_at`, matching the original dispatch order. Uses
    /// `FOR UPDATE SKIP LOCKED` so concurrent claimants never double-claim.
    pub async fn fetch_next_task(&self) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, task_type, payload, status, retry_count, max_retries,
                   created_at, started_at, completed_at, next_retry_at, error_message
            FROM tasks
            WHERE status = 'pending'
              AND (next_retry_at IS NULL OR next_retry_at <= now())
            ORDER BY next_retry_at ASC NULLS FIRST, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let id: Uuid = row.try_get("id")?;
        let claimed = sqlx::query(
            r#"
            UPDATE tasks SET status = 'processing', started_at = now()
            WHERE id = $1
            RETURNING id, task_type, payload, status, retry_count, max_retries,
                      created_at, started_at, completed_at, next_retry_at, error_message
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row_to_task(&claimed)?))
    }

    /// Mark a task completed. Warns (but does not error) if the id is
    /// unknown, matching the original queue's defensive logging.
    pub async fn complete_task(&self, id: TaskId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'completed', completed_at = now() WHERE id = $1",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(task_id = %id, "complete_task called for unknown task id");
        }
        Ok(())
    }

    /// Mark a task terminally `failed` without consuming a retry attempt,
    /// used for errors no retry could ever fix (e.g. an unknown task type).
    pub async fn fail_immediately(&self, id: TaskId, error_message: impl Into<String>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'failed', completed_at = now(), error_message = $2 WHERE id = $1",
        )
        .bind(id.0)
        .bind(error_message.into())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(task_id = %id, "fail_immediately called for unknown task id");
        }
        Ok(())
    }

    /// Record a failure. If the task has retries remaining it is rescheduled
    /// with exponential backoff (`10 * 2^(retry_count-1)` seconds unless
    /// `delay` overrides it); otherwise it is moved to `dead_letter`.
    pub async fn retry_task(
        &self,
        id: TaskId,
        error_message: impl Into<String>,
        delay: Option<ChronoDuration>,
    ) -> Result<()> {
        let error_message = error_message.into();
        let row = sqlx::query("SELECT retry_count, max_retries FROM tasks WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            warn!(task_id = %id, "retry_task called for unknown task id");
            return Ok(());
        };

        let retry_count: i32 = row.try_get("retry_count")?;
        let max_retries: i32 = row.try_get("max_retries")?;
        let next_retry_count = retry_count + 1;

        if next_retry_count > max_retries {
            sqlx::query(
                "UPDATE tasks SET status = 'dead_letter', completed_at = now(), error_message = $2 WHERE id = $1",
            )
            .bind(id.0)
            .bind(&error_message)
            .execute(&self.pool)
            .await?;
            warn!(task_id = %id, retry_count, "task moved to dead letter");
            return Ok(());
        }

        let delay = delay.unwrap_or_else(|| default_retry_delay(next_retry_count));
        let next_retry_at = Utc::now() + delay;

        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending', retry_count = $2, next_retry_at = $3, error_message = $4
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(next_retry_count)
        .bind(next_retry_at)
        .bind(&error_message)
        .execute(&self.pool)
        .await?;

        debug!(task_id = %id, retry_count = next_retry_count, %next_retry_at, "task scheduled for retry");
        self.notify();
        Ok(())
    }

    /// Reclaim tasks stuck in `processing` for longer than
    /// [`STALE_TASK_MINUTES`]: reset to `pending`, clear `started_at`,
    /// increment `retry_count` unconditionally (no dead-lettering here —
    /// stale recovery always gives the task another turn, distinct from an
    /// explicit processor failure). Intended to run once at worker startup.
    pub async fn recover_stale_tasks(&self) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::minutes(STALE_TASK_MINUTES);
        let rows = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending',
                started_at = NULL,
                retry_count = retry_count + 1,
                error_message = 'recovered from stale state'
            WHERE status = 'processing' AND started_at < $1
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let recovered = rows.len() as u64;
        if recovered > 0 {
            warn!(count = recovered, "recovered stale tasks");
            self.notify();
        }
        Ok(recovered)
    }

    /// Count tasks by status, including statuses with zero tasks.
    pub async fn stats(&self) -> Result<HashMap<TaskStatus, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts: HashMap<TaskStatus, i64> =
            ALL_STATUSES.iter().map(|s| (*s, 0)).collect();

        for row in rows {
            let status_str: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            if let Ok(status) = TaskStatus::from_str(&status_str) {
                counts.insert(status, count);
            }
        }

        Ok(counts)
    }
}

fn row_to_task(row: &sqlx::postgres::PgRow) -> Result<Task> {
    let id: Uuid = row.try_get("id")?;
    let task_type: String = row.try_get("task_type")?;
    let payload_json: serde_json::Value = row.try_get("payload")?;
    let status_str: String = row.try_get("status")?;
    let retry_count: i32 = row.try_get("retry_count")?;
    let max_retries: i32 = row.try_get("max_retries")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let started_at: Option<DateTime<Utc>> = row.try_get("started_at")?;
    let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at")?;
    let next_retry_at: Option<DateTime<Utc>> = row.try_get("next_retry_at")?;
    let error_message: Option<String> = row.try_get("error_message")?;

    let kind = TaskKind::from_str(&task_type)?;
    let payload = TaskPayload::from_parts(kind, payload_json)
        .map_err(|e| Error::InvalidPayload(e.to_string()))?;
    let status = TaskStatus::from_str(&status_str)?;

    Ok(Task {
        id: TaskId(id),
        payload,
        status,
        retry_count,
        max_retries,
        created_at,
        started_at,
        completed_at,
        next_retry_at,
        error_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_delay_matches_exponential_backoff() {
        assert_eq!(default_retry_delay(1), ChronoDuration::seconds(10));
        assert_eq!(default_retry_delay(2), ChronoDuration::seconds(20));
        assert_eq!(default_retry_delay(3), ChronoDuration::seconds(40));
    }
}
