//! Postgres-backed repository for `Book` rows.
//!
//! Grounded on `database::postgres::PostgresDatabase`'s per-entity
//! repository fields.

use sqlx::{PgPool, Row};

use crate::error::Result;
use crate::model::{Book, BookId};

pub struct BookRepository {
    pool: PgPool,
}

impl BookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, book: &Book) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO books (
                id, title, author, series, series_index, language, genre,
                publication_date, isbn, file_path, file_hash, file_size,
                file_format, kepub_path, is_deleted, deleted_at, updated_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(book.id.0)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.series)
        .bind(book.series_index)
        .bind(&book.language)
        .bind(&book.genre)
        .bind(book.publication_date)
        .bind(&book.isbn)
        .bind(book.file_path.to_string_lossy().to_string())
        .bind(&book.file_hash)
        .bind(book.file_size)
        .bind(&book.file_format)
        .bind(book.kepub_path.as_ref().map(|p| p.to_string_lossy().to_string()))
        .bind(book.is_deleted)
        .bind(book.deleted_at)
        .bind(book.updated_at)
        .bind(book.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update(&self, book: &Book) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE books SET
                title = $2, author = $3, series = $4, series_index = $5,
                language = $6, genre = $7, publication_date = $8, isbn = $9,
                file_path = $10, file_hash = $11, file_size = $12, file_format = $13,
                kepub_path = $14, is_deleted = $15, deleted_at = $16, updated_at = $17
            WHERE id = $1
            "#,
        )
        .bind(book.id.0)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.series)
        .bind(book.series_index)
        .bind(&book.language)
        .bind(&book.genre)
        .bind(book.publication_date)
        .bind(&book.isbn)
        .bind(book.file_path.to_string_lossy().to_string())
        .bind(&book.file_hash)
        .bind(book.file_size)
        .bind(&book.file_format)
        .bind(book.kepub_path.as_ref().map(|p| p.to_string_lossy().to_string()))
        .bind(book.is_deleted)
        .bind(book.deleted_at)
        .bind(book.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: BookId) -> Result<Option<Book>> {
        let row = sqlx::query("SELECT * FROM books WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_book).transpose()
    }

    /// Look up a non-deleted book by its content fingerprint. `(file_hash,
    /// file_size)` is a functional key (spec §3 invariant).
    pub async fn find_by_hash_and_size(&self, hash: &str, size: i64) -> Result<Option<Book>> {
        let row = sqlx::query(
            "SELECT * FROM books WHERE file_hash = $1 AND file_size = $2 AND NOT is_deleted",
        )
        .bind(hash)
        .bind(size)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_book).transpose()
    }

    pub async fn find_by_path(&self, path: &str) -> Result<Option<Book>> {
        let row = sqlx::query("SELECT * FROM books WHERE file_path = $1 AND NOT is_deleted")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_book).transpose()
    }

    /// Same as `find_by_path` but does not filter out soft-deleted rows,
    /// used by the ingest stage to detect a book reappearing at its old
    /// path after a soft delete.
    pub async fn find_any_by_path(&self, path: &str) -> Result<Option<Book>> {
        let row = sqlx::query("SELECT * FROM books WHERE file_path = $1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_book).transpose()
    }
}

fn row_to_book(row: sqlx::postgres::PgRow) -> Result<Book> {
    let file_path: String = row.try_get("file_path")?;
    let kepub_path: Option<String> = row.try_get("kepub_path")?;
    Ok(Book {
        id: BookId(row.try_get("id")?),
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        series: row.try_get("series")?,
        series_index: row.try_get("series_index")?,
        language: row.try_get("language")?,
        genre: row.try_get("genre")?,
        publication_date: row.try_get("publication_date")?,
        isbn: row.try_get("isbn")?,
        file_path: file_path.into(),
        file_hash: row.try_get("file_hash")?,
        file_size: row.try_get("file_size")?,
        file_format: row.try_get("file_format")?,
        kepub_path: kepub_path.map(Into::into),
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
        updated_at: row.try_get("updated_at")?,
        created_at: row.try_get("created_at")?,
    })
}
