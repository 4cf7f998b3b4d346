//! Boundary traits the pipeline stages depend on but do not implement.
//! Production adapters (a real filesystem watcher, a metadata provider, an
//! ebook converter, a cover-image fetcher) are out of scope (spec §1, §6);
//! these traits exist so stage processors can be built and tested against
//! fakes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::model::Book;

/// Metadata pulled from an external source (an ISBN lookup service, an
/// embedded OPF, etc.) for a freshly ingested book. `cover_path`, if present,
/// is a URL the METADATA stage may hand to a `CoverFetcher` when embedding is
/// enabled.
#[derive(Debug, Clone, Default)]
pub struct FetchedMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub series: Option<String>,
    pub series_index: Option<i32>,
    pub language: Option<String>,
    pub genre: Option<String>,
    pub isbn: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub cover_path: Option<String>,
}

/// The field map (and, if fetched, cover bytes) handed to
/// `MetadataProvider::embed`.
#[derive(Debug, Clone, Default)]
pub struct EmbedFields {
    pub fields: HashMap<String, String>,
    pub cover_data: Option<Vec<u8>>,
}

/// Looks up descriptive metadata for a book, and embeds it into the file
/// itself. Implemented out of scope of this crate.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch(&self, book: &Book) -> Result<FetchedMetadata>;

    /// Write `fields` (and `cover_data`, if present) into the file at `path`.
    async fn embed(&self, path: &Path, fields: &EmbedFields) -> Result<()>;
}

/// Converts an ebook to the kepub format Kobo e-readers expect. Implemented
/// out of scope of this crate.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Produce a kepub at `output_path` from the source at `book.file_path`.
    async fn convert(&self, book: &Book, output_path: &Path) -> Result<()>;
}

/// Retrieves cover art bytes from a URL. Implemented out of scope of this
/// crate; a non-200 response should surface as `Ok(None)`, not an error, so
/// the METADATA stage can fall back to embedding without a cover.
#[async_trait]
pub trait CoverFetcher: Send + Sync {
    async fn fetch_cover(&self, cover_path: &str) -> Result<Option<Vec<u8>>>;
}

/// Watches the filesystem for new or removed ebook files and reports them.
/// Implemented out of scope of this crate; the worker only consumes the
/// `INGEST` tasks such a watcher would enqueue.
#[async_trait]
pub trait Watcher: Send + Sync {
    async fn poll_events(&self) -> Result<Vec<WatchEvent>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(PathBuf),
    Removed(PathBuf),
}
