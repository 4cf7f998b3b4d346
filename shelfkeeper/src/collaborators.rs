//! Minimal default collaborators so the binary can run end to end without a
//! real watcher, metadata source, or converter wired up yet. Production
//! adapters for these boundaries are out of scope of this service.

use std::path::Path;

use async_trait::async_trait;
use shelfkeeper_core::collaborators::{
    Converter, CoverFetcher, EmbedFields, FetchedMetadata, MetadataProvider,
};
use shelfkeeper_core::error::Result;
use shelfkeeper_core::Book;

/// Fetches no metadata and embeds nothing; `METADATA` tasks pass through
/// unchanged until a real provider is configured.
pub struct NullMetadataProvider;

#[async_trait]
impl MetadataProvider for NullMetadataProvider {
    async fn fetch(&self, _book: &Book) -> Result<FetchedMetadata> {
        Ok(FetchedMetadata::default())
    }

    async fn embed(&self, _path: &Path, _fields: &EmbedFields) -> Result<()> {
        Ok(())
    }
}

/// Never finds a cover. A placeholder until a real cover source is wired in.
pub struct NullCoverFetcher;

#[async_trait]
impl CoverFetcher for NullCoverFetcher {
    async fn fetch_cover(&self, _cover_path: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Copies the source file to the kepub output path verbatim. A placeholder
/// until a real kepub converter is wired in.
pub struct PassthroughConverter;

#[async_trait]
impl Converter for PassthroughConverter {
    async fn convert(&self, book: &Book, output_path: &Path) -> Result<()> {
        tokio::fs::copy(&book.file_path, output_path).await?;
        Ok(())
    }
}
