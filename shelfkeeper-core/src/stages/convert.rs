//! `CONVERT`: produce a kepub rendition of a book, then hand off to
//! `ORGANIZE`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::books::BookRepository;
use crate::collaborators::Converter;
use crate::error::{Error, Result};
use crate::model::{Task, TaskKind, TaskPayload};
use crate::pipeline_config::PipelineConfig;
use crate::queue::TaskQueue;
use crate::worker::{outcome_from_result, Outcome, TaskProcessor};

pub struct ConvertProcessor {
    books: Arc<BookRepository>,
    converter: Arc<dyn Converter>,
    queue: Arc<TaskQueue>,
    config: PipelineConfig,
}

impl ConvertProcessor {
    pub fn new(
        books: Arc<BookRepository>,
        converter: Arc<dyn Converter>,
        queue: Arc<TaskQueue>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            books,
            converter,
            queue,
            config,
        }
    }

    async fn handle(&self, task: &Task) -> Result<()> {
        let Some(book_id) = task.payload.book_id() else {
            return Err(Error::InvalidPayload(
                "CONVERT task missing a book id".to_string(),
            ));
        };

        let Some(mut book) = self.books.get(book_id).await? else {
            info!(%book_id, "convert task for missing book, no-op");
            return Ok(());
        };

        if self.config.needs_conversion(&book.file_format) {
            if !book.file_path.exists() {
                return Err(Error::FileNotFound(book.file_path.clone()));
            }

            let output_path = kepub_output_path(&book.file_path);
            self.converter.convert(&book, &output_path).await?;

            book.kepub_path = Some(output_path);
            book.mark_updated();
            self.books.update(&book).await?;
            info!(book_id = %book.id, "converted book to kepub");
        }

        if self.config.organize_enabled {
            self.queue.add_task(TaskPayload::organize(book.id)).await?;
        }
        Ok(())
    }
}

fn kepub_output_path(source: &std::path::Path) -> std::path::PathBuf {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("book");
    source.with_file_name(format!("{stem}.kepub.epub"))
}

#[async_trait]
impl TaskProcessor for ConvertProcessor {
    fn task_kind(&self) -> TaskKind {
        TaskKind::Convert
    }

    async fn process(&self, task: &Task) -> Outcome {
        outcome_from_result(self.handle(task).await)
    }
}
