//! `INGEST`: turn a raw filesystem event into a `Book` row and hand off to
//! `METADATA`, or retire a book whose file was removed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::books::BookRepository;
use crate::error::{Error, Result};
use crate::model::{Book, IngestEvent, Task, TaskKind, TaskPayload};
use crate::organizer::hash_file;
use crate::pipeline_config::PipelineConfig;
use crate::queue::TaskQueue;
use crate::worker::{outcome_from_result, Outcome, TaskProcessor};

pub struct IngestProcessor {
    books: Arc<BookRepository>,
    queue: Arc<TaskQueue>,
    config: PipelineConfig,
}

impl IngestProcessor {
    pub fn new(books: Arc<BookRepository>, queue: Arc<TaskQueue>, config: PipelineConfig) -> Self {
        Self {
            books,
            queue,
            config,
        }
    }

    async fn handle(&self, task: &Task) -> Result<()> {
        let TaskPayload::Ingest(payload) = &task.payload else {
            return Err(Error::InvalidPayload(
                "INGEST task given a non-ingest payload".to_string(),
            ));
        };

        match payload.event {
            IngestEvent::Add => self.handle_add(&payload.path).await,
            IngestEvent::Delete => self.handle_delete(&payload.path).await,
        }
    }

    async fn handle_add(&self, path: &std::path::Path) -> Result<()> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        if !path.exists() || !self.config.is_supported_extension(&ext) {
            return Ok(());
        }

        let hash = hash_file(path)?;
        let size = std::fs::metadata(path)?.len() as i64;
        let path_str = path.to_string_lossy().to_string();

        match self.books.find_by_hash_and_size(&hash, size).await? {
            None => self.handle_no_content_match(path, &path_str, hash, size, ext).await,
            Some(existing) if existing.file_path.as_path() == path => {
                info!(book_id = %existing.id, "idempotent re-ingest of known file");
                Ok(())
            }
            Some(existing) => self.handle_content_match_elsewhere(existing, path).await,
        }
    }

    async fn handle_no_content_match(
        &self,
        path: &std::path::Path,
        path_str: &str,
        hash: String,
        size: i64,
        ext: String,
    ) -> Result<()> {
        if let Some(mut existing) = self.books.find_any_by_path(path_str).await? {
            if existing.is_deleted {
                existing.mark_undeleted();
                existing.file_hash = hash;
                existing.file_size = size;
                self.books.update(&existing).await?;
                info!(book_id = %existing.id, "un-deleted book reappearing with new content");
                self.queue.add_task(TaskPayload::metadata(existing.id)).await?;
                return Ok(());
            }
        }

        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string();
        let book = Book::new_ingested(title, path.to_path_buf(), hash, size, ext);
        self.books.insert(&book).await?;
        info!(book_id = %book.id, path = %path.display(), "ingested new book");
        self.queue.add_task(TaskPayload::metadata(book.id)).await?;
        Ok(())
    }

    async fn handle_content_match_elsewhere(
        &self,
        mut existing: Book,
        new_path: &std::path::Path,
    ) -> Result<()> {
        if existing.file_path.exists() {
            info!(
                existing_id = %existing.id,
                new_path = %new_path.display(),
                "duplicate content of an existing book, discarding"
            );
            std::fs::remove_file(new_path)?;
            return Ok(());
        }

        existing.file_path = new_path.to_path_buf();
        existing.mark_updated();
        self.books.update(&existing).await?;
        info!(
            book_id = %existing.id,
            new_path = %new_path.display(),
            "self-healed: recorded path was missing, file reappeared elsewhere"
        );
        self.queue.add_task(TaskPayload::organize(existing.id)).await?;
        Ok(())
    }

    async fn handle_delete(&self, path: &std::path::Path) -> Result<()> {
        let path_str = path.to_string_lossy().to_string();
        let Some(mut book) = self.books.find_by_path(&path_str).await? else {
            info!(path = %path.display(), "delete event for untracked or already-deleted path, ignoring");
            return Ok(());
        };

        book.mark_deleted();
        self.books.update(&book).await?;
        info!(book_id = %book.id, path = %path.display(), "retired book after delete event");
        Ok(())
    }
}

#[async_trait]
impl TaskProcessor for IngestProcessor {
    fn task_kind(&self) -> TaskKind {
        TaskKind::Ingest
    }

    async fn process(&self, task: &Task) -> Outcome {
        outcome_from_result(self.handle(task).await)
    }
}
