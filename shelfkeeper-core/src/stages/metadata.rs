//! `METADATA`: enrich a `Book` from an external provider, then hand off to
//! `CONVERT` (or straight to `ORGANIZE` when conversion is disabled).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::books::BookRepository;
use crate::collaborators::{CoverFetcher, EmbedFields, MetadataProvider};
use crate::error::{Error, Result};
use crate::model::{Task, TaskKind, TaskPayload};
use crate::pipeline_config::PipelineConfig;
use crate::queue::TaskQueue;
use crate::worker::{outcome_from_result, Outcome, TaskProcessor};

pub struct MetadataProcessor {
    books: Arc<BookRepository>,
    provider: Arc<dyn MetadataProvider>,
    cover_fetcher: Arc<dyn CoverFetcher>,
    queue: Arc<TaskQueue>,
    config: PipelineConfig,
}

impl MetadataProcessor {
    pub fn new(
        books: Arc<BookRepository>,
        provider: Arc<dyn MetadataProvider>,
        cover_fetcher: Arc<dyn CoverFetcher>,
        queue: Arc<TaskQueue>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            books,
            provider,
            cover_fetcher,
            queue,
            config,
        }
    }

    async fn handle(&self, task: &Task) -> Result<()> {
        let Some(book_id) = task.payload.book_id() else {
            return Err(Error::InvalidPayload(
                "METADATA task missing a book id".to_string(),
            ));
        };

        let Some(mut book) = self.books.get(book_id).await? else {
            info!(%book_id, "metadata task for missing book, no-op");
            return Ok(());
        };

        let fetched = self.provider.fetch(&book).await?;
        let cover_path = fetched.cover_path.clone();
        let mut changed = false;
        if let Some(title) = fetched.title {
            if book.title != title {
                book.title = title;
                changed = true;
            }
        }
        macro_rules! merge {
            ($field:ident) => {
                if fetched.$field.is_some() && book.$field != fetched.$field {
                    book.$field = fetched.$field;
                    changed = true;
                }
            };
        }
        merge!(author);
        merge!(series);
        merge!(series_index);
        merge!(language);
        merge!(genre);
        merge!(isbn);
        merge!(publication_date);

        if changed {
            book.mark_updated();
            self.books.update(&book).await?;
            info!(book_id = %book.id, "enriched book metadata");
        }

        if self.config.embed_metadata_enabled {
            self.embed(&book, cover_path).await?;
        }

        if self.config.needs_conversion(&book.file_format) {
            self.queue.add_task(TaskPayload::convert(book.id)).await?;
        } else if self.config.organize_enabled {
            self.queue.add_task(TaskPayload::organize(book.id)).await?;
        }
        Ok(())
    }

    /// Assemble the recognized field map from the book's current state and
    /// call out to the provider's embed routine, fetching a cover first if
    /// one is available. A cover fetch failure is swallowed: embedding
    /// proceeds without `cover_data` rather than failing the task.
    async fn embed(&self, book: &crate::model::Book, cover_path: Option<String>) -> Result<()> {
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), book.title.clone());
        if let Some(v) = &book.author {
            fields.insert("author".to_string(), v.clone());
        }
        if let Some(v) = &book.series {
            fields.insert("series".to_string(), v.clone());
        }
        if let Some(v) = book.series_index {
            fields.insert("series_index".to_string(), v.to_string());
        }
        if let Some(v) = &book.language {
            fields.insert("language".to_string(), v.clone());
        }
        if let Some(v) = &book.genre {
            fields.insert("genre".to_string(), v.clone());
        }
        if let Some(v) = &book.isbn {
            fields.insert("isbn".to_string(), v.clone());
        }
        if let Some(v) = book.publication_date {
            fields.insert("publication_date".to_string(), v.format("%Y-%m-%d").to_string());
        }

        let cover_data = match cover_path {
            Some(url) => match self.cover_fetcher.fetch_cover(&url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(book_id = %book.id, error = %e, "cover fetch failed, embedding without cover");
                    None
                }
            },
            None => None,
        };

        self.provider
            .embed(&book.file_path, &EmbedFields { fields, cover_data })
            .await
    }
}

#[async_trait]
impl TaskProcessor for MetadataProcessor {
    fn task_kind(&self) -> TaskKind {
        TaskKind::Metadata
    }

    async fn process(&self, task: &Task) -> Outcome {
        outcome_from_result(self.handle(task).await)
    }
}
