//! `ORGANIZE`: move a book into its final, templated, deduplicated location.
//!
//! Grounded on `kobold.services.organization_service.OrganizationJobService`,
//! including its zombie-recovery path: if the source file is already gone but
//! a matching file sits at the expected destination, the job is treated as
//! already completed by a prior attempt. If the destination exists but its
//! content hash does not match, that mismatch is logged — but the task still
//! fails, since the source is genuinely missing and we cannot blindly adopt
//! whatever file happens to be there.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::books::BookRepository;
use crate::error::{Error, Result};
use crate::model::{Task, TaskKind};
use crate::organizer::{hash_file, LibraryOrganizer};
use crate::worker::{outcome_from_result, Outcome, TaskProcessor};

pub struct OrganizeProcessor {
    books: Arc<BookRepository>,
    organizer: Arc<LibraryOrganizer>,
}

impl OrganizeProcessor {
    pub fn new(books: Arc<BookRepository>, organizer: Arc<LibraryOrganizer>) -> Self {
        Self { books, organizer }
    }

    async fn handle(&self, task: &Task) -> Result<()> {
        if !self.organizer.is_enabled() {
            return Ok(());
        }

        let Some(book_id) = task.payload.book_id() else {
            return Err(Error::InvalidPayload(
                "ORGANIZE task missing a book id".to_string(),
            ));
        };

        let Some(mut book) = self.books.get(book_id).await? else {
            info!(%book_id, "organize task for missing book, no-op");
            return Ok(());
        };

        if !book.file_path.exists() {
            let expected = self.organizer.organize_path(&book);
            if expected.exists() {
                let existing_hash = hash_file(&expected)?;
                if existing_hash == book.file_hash {
                    info!(book_id = %book.id, path = %expected.display(), "organize task recovered: already in place from a prior attempt");
                    book.file_path = expected;
                    book.mark_updated();
                    self.books.update(&book).await?;
                    return Ok(());
                }
                warn!(
                    book_id = %book.id,
                    expected = %expected.display(),
                    "source missing and file at expected path has a different hash"
                );
            }
            return Err(Error::FileNotFound(book.file_path.clone()));
        }

        self.organizer.organize(&mut book)?;
        self.books.update(&book).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskProcessor for OrganizeProcessor {
    fn task_kind(&self) -> TaskKind {
        TaskKind::Organize
    }

    async fn process(&self, task: &Task) -> Outcome {
        outcome_from_result(self.handle(task).await)
    }
}
