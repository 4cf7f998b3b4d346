//! Integration tests for the pipeline stage processors, against a real
//! (ephemeral, per-test) Postgres schema migrated by `#[sqlx::test]`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tempfile::tempdir;

use shelfkeeper_core::books::BookRepository;
use shelfkeeper_core::collaborators::{Converter, CoverFetcher, EmbedFields, FetchedMetadata, MetadataProvider};
use shelfkeeper_core::error::Result;
use shelfkeeper_core::model::{IngestEvent, Task, TaskId, TaskKind, TaskPayload, TaskStatus};
use shelfkeeper_core::organizer::hash_file;
use shelfkeeper_core::pipeline_config::PipelineConfig;
use shelfkeeper_core::queue::TaskQueue;
use shelfkeeper_core::stages::{ConvertProcessor, IngestProcessor, MetadataProcessor, OrganizeProcessor};
use shelfkeeper_core::worker::{Outcome, TaskProcessor};
use shelfkeeper_core::{Book, LibraryOrganizer};

fn task_of(payload: TaskPayload) -> Task {
    Task {
        id: TaskId::new(),
        payload,
        status: TaskStatus::Processing,
        retry_count: 0,
        max_retries: 3,
        created_at: chrono::Utc::now(),
        started_at: None,
        completed_at: None,
        next_retry_at: None,
        error_message: None,
    }
}

fn config() -> PipelineConfig {
    PipelineConfig::default()
}

struct StubProvider {
    metadata: FetchedMetadata,
}

#[async_trait]
impl MetadataProvider for StubProvider {
    async fn fetch(&self, _book: &Book) -> Result<FetchedMetadata> {
        Ok(self.metadata.clone())
    }

    async fn embed(&self, _path: &Path, _fields: &EmbedFields) -> Result<()> {
        Ok(())
    }
}

struct FailingCoverFetcher;

#[async_trait]
impl CoverFetcher for FailingCoverFetcher {
    async fn fetch_cover(&self, _cover_path: &str) -> Result<Option<Vec<u8>>> {
        Err(shelfkeeper_core::Error::Internal("cover host unreachable".to_string()))
    }
}

struct StubConverter;

#[async_trait]
impl Converter for StubConverter {
    async fn convert(&self, book: &Book, output_path: &Path) -> Result<()> {
        std::fs::write(output_path, format!("kepub of {}", book.title))?;
        Ok(())
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn ingest_add_creates_book_and_enqueues_metadata(pool: PgPool) {
    let dir = tempdir().unwrap();
    let src = dir.path().join("book.epub");
    std::fs::write(&src, b"hello world").unwrap();

    let books = Arc::new(BookRepository::new(pool.clone()));
    let queue = Arc::new(TaskQueue::new(pool));
    let processor = IngestProcessor::new(books.clone(), queue.clone(), config());

    let task = task_of(TaskPayload::ingest(IngestEvent::Add, src.clone()));
    assert!(matches!(processor.process(&task).await, Outcome::Completed));

    let found = books.find_by_path(&src.to_string_lossy()).await.unwrap().unwrap();
    assert_eq!(found.title, "book");

    let next = queue.fetch_next_task().await.unwrap().unwrap();
    assert_eq!(next.kind(), TaskKind::Metadata);
}

#[sqlx::test(migrations = "./migrations")]
async fn ingest_add_same_content_at_new_path_is_treated_as_duplicate(pool: PgPool) {
    let dir = tempdir().unwrap();
    let original = dir.path().join("a.epub");
    std::fs::write(&original, b"same bytes").unwrap();

    let books = Arc::new(BookRepository::new(pool.clone()));
    let queue = Arc::new(TaskQueue::new(pool));
    let processor = IngestProcessor::new(books.clone(), queue.clone(), config());

    let first = task_of(TaskPayload::ingest(IngestEvent::Add, original.clone()));
    processor.process(&first).await;
    let _ = queue.fetch_next_task().await.unwrap();

    let duplicate = dir.path().join("b.epub");
    std::fs::write(&duplicate, b"same bytes").unwrap();
    let second = task_of(TaskPayload::ingest(IngestEvent::Add, duplicate.clone()));
    assert!(matches!(processor.process(&second).await, Outcome::Completed));

    assert!(!duplicate.exists(), "duplicate content should be discarded");
    assert!(original.exists());
}

#[sqlx::test(migrations = "./migrations")]
async fn ingest_delete_marks_book_deleted(pool: PgPool) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gone.epub");
    std::fs::write(&path, b"content").unwrap();

    let books = Arc::new(BookRepository::new(pool.clone()));
    let queue = Arc::new(TaskQueue::new(pool));
    let processor = IngestProcessor::new(books.clone(), queue.clone(), config());

    let add = task_of(TaskPayload::ingest(IngestEvent::Add, path.clone()));
    processor.process(&add).await;

    let delete = task_of(TaskPayload::ingest(IngestEvent::Delete, path.clone()));
    assert!(matches!(processor.process(&delete).await, Outcome::Completed));

    let book = books.find_any_by_path(&path.to_string_lossy()).await.unwrap().unwrap();
    assert!(book.is_deleted);
    assert!(books.find_by_path(&path.to_string_lossy()).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn metadata_merges_fields_and_embeds_without_cover_on_fetch_failure(pool: PgPool) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("book.epub");
    std::fs::write(&path, b"content").unwrap();

    let books = Arc::new(BookRepository::new(pool.clone()));
    let queue = Arc::new(TaskQueue::new(pool));
    let book = Book::new_ingested(
        "book".to_string(),
        path,
        hash_file(&dir.path().join("book.epub")).unwrap(),
        7,
        "epub".to_string(),
    );
    books.insert(&book).await.unwrap();

    let provider = Arc::new(StubProvider {
        metadata: FetchedMetadata {
            author: Some("Jane Austen".to_string()),
            cover_path: Some("https://example.invalid/cover.jpg".to_string()),
            ..Default::default()
        },
    });
    let mut pipeline_config = config();
    pipeline_config.convert_enabled = false;
    let processor = MetadataProcessor::new(
        books.clone(),
        provider,
        Arc::new(FailingCoverFetcher),
        queue.clone(),
        pipeline_config,
    );

    let task = task_of(TaskPayload::metadata(book.id));
    assert!(matches!(processor.process(&task).await, Outcome::Completed));

    let updated = books.get(book.id).await.unwrap().unwrap();
    assert_eq!(updated.author.as_deref(), Some("Jane Austen"));

    let next = queue.fetch_next_task().await.unwrap().unwrap();
    assert_eq!(next.kind(), TaskKind::Organize);
}

#[sqlx::test(migrations = "./migrations")]
async fn convert_skips_non_epub_and_still_enqueues_organize(pool: PgPool) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("book.pdf");
    std::fs::write(&path, b"pdf bytes").unwrap();

    let books = Arc::new(BookRepository::new(pool.clone()));
    let queue = Arc::new(TaskQueue::new(pool));
    let book = Book::new_ingested(
        "book".to_string(),
        path,
        hash_file(&dir.path().join("book.pdf")).unwrap(),
        9,
        "pdf".to_string(),
    );
    books.insert(&book).await.unwrap();

    let processor = ConvertProcessor::new(books.clone(), Arc::new(StubConverter), queue.clone(), config());
    let task = task_of(TaskPayload::convert(book.id));
    assert!(matches!(processor.process(&task).await, Outcome::Completed));

    let unchanged = books.get(book.id).await.unwrap().unwrap();
    assert!(unchanged.kepub_path.is_none());

    let next = queue.fetch_next_task().await.unwrap().unwrap();
    assert_eq!(next.kind(), TaskKind::Organize);
}

#[sqlx::test(migrations = "./migrations")]
async fn convert_runs_converter_for_epub_and_records_kepub_path(pool: PgPool) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("book.epub");
    std::fs::write(&path, b"epub bytes").unwrap();

    let books = Arc::new(BookRepository::new(pool.clone()));
    let queue = Arc::new(TaskQueue::new(pool));
    let book = Book::new_ingested(
        "book".to_string(),
        path,
        hash_file(&dir.path().join("book.epub")).unwrap(),
        10,
        "epub".to_string(),
    );
    books.insert(&book).await.unwrap();

    let processor = ConvertProcessor::new(books.clone(), Arc::new(StubConverter), queue.clone(), config());
    let task = task_of(TaskPayload::convert(book.id));
    assert!(matches!(processor.process(&task).await, Outcome::Completed));

    let updated = books.get(book.id).await.unwrap().unwrap();
    assert!(updated.kepub_path.is_some());
    assert!(updated.kepub_path.unwrap().exists());
}

#[sqlx::test(migrations = "./migrations")]
async fn organize_recovers_zombie_state_when_move_already_happened(pool: PgPool) {
    let dir = tempdir().unwrap();
    let library = dir.path().join("library");
    let source = dir.path().join("incoming.epub");
    std::fs::write(&source, b"hello").unwrap();
    let hash = hash_file(&source).unwrap();

    let books = Arc::new(BookRepository::new(pool));
    let mut book = Book::new_ingested("Emma".to_string(), source.clone(), hash.clone(), 5, "epub".to_string());
    book.author = Some("Jane Austen".to_string());
    books.insert(&book).await.unwrap();

    let organizer = Arc::new(LibraryOrganizer::new(library.clone(), "{author}/{title}", true));
    let expected = organizer.organize_path(&book);
    std::fs::create_dir_all(expected.parent().unwrap()).unwrap();
    std::fs::rename(&source, &expected).unwrap();

    let processor = OrganizeProcessor::new(books.clone(), organizer);
    let task = task_of(TaskPayload::organize(book.id));
    assert!(matches!(processor.process(&task).await, Outcome::Completed));

    let updated = books.get(book.id).await.unwrap().unwrap();
    assert_eq!(updated.file_path, expected);
}

#[sqlx::test(migrations = "./migrations")]
async fn organize_fails_when_source_and_destination_are_both_missing(pool: PgPool) {
    let dir = tempdir().unwrap();
    let source = dir.path().join("gone.epub");

    let books = Arc::new(BookRepository::new(pool));
    let book = Book::new_ingested(
        "Emma".to_string(),
        source,
        "deadbeef".repeat(8),
        5,
        "epub".to_string(),
    );
    books.insert(&book).await.unwrap();

    let organizer = Arc::new(LibraryOrganizer::new(
        dir.path().join("library"),
        "{title}",
        true,
    ));
    let processor = OrganizeProcessor::new(books.clone(), organizer);
    let task = task_of(TaskPayload::organize(book.id));
    assert!(matches!(processor.process(&task).await, Outcome::Retry { .. }));
}
