//! Integration tests against a real (ephemeral, per-test) Postgres schema,
//! migrated automatically by `#[sqlx::test]`.

use sqlx::{PgPool, Row};

use shelfkeeper_core::model::{BookId, TaskPayload, TaskStatus};
use shelfkeeper_core::queue::TaskQueue;

#[sqlx::test(migrations = "./migrations")]
async fn enqueue_then_claim_marks_processing(pool: PgPool) {
    let queue = TaskQueue::new(pool);
    let task = queue
        .add_task(TaskPayload::metadata(BookId::new()))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    let claimed = queue.fetch_next_task().await.unwrap().unwrap();
    assert_eq!(claimed.id, task.id);
    assert_eq!(claimed.status, TaskStatus::Processing);

    assert!(queue.fetch_next_task().await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn failed_task_is_rescheduled_until_retries_exhausted(pool: PgPool) {
    let queue = TaskQueue::new(pool);
    let task = queue
        .add_task_with_retries(TaskPayload::convert(BookId::new()), 1)
        .await
        .unwrap();

    let claimed = queue.fetch_next_task().await.unwrap().unwrap();
    queue
        .retry_task(claimed.id, "boom", Some(chrono::Duration::zero()))
        .await
        .unwrap();

    let reclaimed = queue.fetch_next_task().await.unwrap().unwrap();
    assert_eq!(reclaimed.id, task.id);
    assert_eq!(reclaimed.retry_count, 1);

    queue
        .retry_task(reclaimed.id, "boom again", Some(chrono::Duration::zero()))
        .await
        .unwrap();

    assert!(queue.fetch_next_task().await.unwrap().is_none());
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats[&TaskStatus::DeadLetter], 1);

    let row = sqlx::query("SELECT retry_count FROM tasks WHERE id = $1")
        .bind(task.id.0)
        .fetch_one(queue.pool())
        .await
        .unwrap();
    let retry_count: i32 = row.try_get("retry_count").unwrap();
    assert_eq!(retry_count, 1, "dead-lettering must not push retry_count past max_retries");
}

#[sqlx::test(migrations = "./migrations")]
async fn stats_reports_every_status_including_zero(pool: PgPool) {
    let queue = TaskQueue::new(pool);
    queue
        .add_task(TaskPayload::organize(BookId::new()))
        .await
        .unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.len(), 5);
    assert_eq!(stats[&TaskStatus::Pending], 1);
    assert_eq!(stats[&TaskStatus::Completed], 0);
    assert_eq!(stats[&TaskStatus::DeadLetter], 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn complete_task_is_idempotent_for_unknown_id(pool: PgPool) {
    let queue = TaskQueue::new(pool);
    let bogus = shelfkeeper_core::model::TaskId::new();
    queue.complete_task(bogus).await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
async fn recover_stale_tasks_resets_long_running_processing_tasks(pool: PgPool) {
    let queue = TaskQueue::new(pool);
    let task = queue
        .add_task(TaskPayload::organize(BookId::new()))
        .await
        .unwrap();
    let claimed = queue.fetch_next_task().await.unwrap().unwrap();
    assert_eq!(claimed.id, task.id);

    let two_hours_ago = chrono::Utc::now() - chrono::Duration::hours(2);
    sqlx::query("UPDATE tasks SET started_at = $2 WHERE id = $1")
        .bind(task.id.0)
        .bind(two_hours_ago)
        .execute(queue.pool())
        .await
        .unwrap();

    let recovered = queue.recover_stale_tasks().await.unwrap();
    assert_eq!(recovered, 1);

    let row = sqlx::query("SELECT status, started_at, retry_count FROM tasks WHERE id = $1")
        .bind(task.id.0)
        .fetch_one(queue.pool())
        .await
        .unwrap();
    let status: String = row.try_get("status").unwrap();
    let started_at: Option<chrono::DateTime<chrono::Utc>> = row.try_get("started_at").unwrap();
    let retry_count: i32 = row.try_get("retry_count").unwrap();
    assert_eq!(status, "pending");
    assert!(started_at.is_none());
    assert_eq!(retry_count, 1);

    // Already recovered once; nothing left in `processing` to reclaim.
    assert_eq!(queue.recover_stale_tasks().await.unwrap(), 0);
}
