//! Persistent entities: `Book` and `Task`. See spec §3.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque 128-bit book identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BookId(pub Uuid);

impl BookId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque 128-bit task identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persistent entity representing one ebook file currently or formerly
/// present in the library.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: Option<String>,
    pub series: Option<String>,
    pub series_index: Option<i32>,
    pub language: Option<String>,
    pub genre: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub isbn: Option<String>,
    pub file_path: PathBuf,
    pub file_hash: String,
    pub file_size: i64,
    pub file_format: String,
    pub kepub_path: Option<PathBuf>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Book {
    /// Construct a freshly ingested book. `title` defaults to the filename
    /// stem by convention of the caller (see `stages::ingest`).
    pub fn new_ingested(
        title: String,
        file_path: PathBuf,
        file_hash: String,
        file_size: i64,
        file_format: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: BookId::new(),
            title,
            author: None,
            series: None,
            series_index: None,
            language: None,
            genre: None,
            publication_date: None,
            isbn: None,
            file_path,
            file_hash,
            file_size,
            file_format,
            kepub_path: None,
            is_deleted: false,
            deleted_at: None,
            updated_at: now,
            created_at: now,
        }
    }

    pub fn mark_updated(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_undeleted(&mut self) {
        self.is_deleted = false;
        self.deleted_at = None;
        self.updated_at = Utc::now();
    }
}

/// The four pipeline stages, tagged by a stable wire-format string (spec §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Ingest,
    Metadata,
    Convert,
    Organize,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Ingest => "INGEST",
            TaskKind::Metadata => "METADATA",
            TaskKind::Convert => "CONVERT",
            TaskKind::Organize => "ORGANIZE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INGEST" => Ok(TaskKind::Ingest),
            "METADATA" => Ok(TaskKind::Metadata),
            "CONVERT" => Ok(TaskKind::Convert),
            "ORGANIZE" => Ok(TaskKind::Organize),
            other => Err(Error::UnknownTaskType(other.to_string())),
        }
    }
}

/// `ADD` or `DELETE`, as reported by the (out-of-scope) filesystem watcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum IngestEvent {
    #[serde(rename = "ADD")]
    Add,
    #[serde(rename = "DELETE")]
    Delete,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestPayload {
    pub event: IngestEvent,
    pub path: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BookTaskPayload {
    pub book_id: BookId,
}

/// Structured payload for a task, closed over the four known stages (spec §6,
/// §9 "opaque structured payloads" redesign note).
#[derive(Clone, Debug)]
pub enum TaskPayload {
    Ingest(IngestPayload),
    Metadata(BookTaskPayload),
    Convert(BookTaskPayload),
    Organize(BookTaskPayload),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Ingest(_) => TaskKind::Ingest,
            TaskPayload::Metadata(_) => TaskKind::Metadata,
            TaskPayload::Convert(_) => TaskKind::Convert,
            TaskPayload::Organize(_) => TaskKind::Organize,
        }
    }

    pub fn ingest(event: IngestEvent, path: PathBuf) -> Self {
        TaskPayload::Ingest(IngestPayload { event, path })
    }

    pub fn metadata(book_id: BookId) -> Self {
        TaskPayload::Metadata(BookTaskPayload { book_id })
    }

    pub fn convert(book_id: BookId) -> Self {
        TaskPayload::Convert(BookTaskPayload { book_id })
    }

    pub fn organize(book_id: BookId) -> Self {
        TaskPayload::Organize(BookTaskPayload { book_id })
    }

    /// The book this task's payload references, if any (`INGEST` references a
    /// path, not yet a book).
    pub fn book_id(&self) -> Option<BookId> {
        match self {
            TaskPayload::Ingest(_) => None,
            TaskPayload::Metadata(p) | TaskPayload::Convert(p) | TaskPayload::Organize(p) => {
                Some(p.book_id)
            }
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        let value = match self {
            TaskPayload::Ingest(p) => serde_json::to_value(p)?,
            TaskPayload::Metadata(p) | TaskPayload::Convert(p) | TaskPayload::Organize(p) => {
                serde_json::to_value(p)?
            }
        };
        Ok(value)
    }

    pub fn from_parts(kind: TaskKind, value: serde_json::Value) -> Result<Self> {
        Ok(match kind {
            TaskKind::Ingest => TaskPayload::Ingest(serde_json::from_value(value)?),
            TaskKind::Metadata => TaskPayload::Metadata(serde_json::from_value(value)?),
            TaskKind::Convert => TaskPayload::Convert(serde_json::from_value(value)?),
            TaskKind::Organize => TaskPayload::Organize(serde_json::from_value(value)?),
        })
    }
}

/// Lifecycle states of a `Task` (spec §3 invariants).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLetter,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::DeadLetter
        )
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::DeadLetter => "dead_letter",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "dead_letter" => Ok(TaskStatus::DeadLetter),
            other => Err(Error::Internal(format!("unknown task status: {other}"))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

pub const DEFAULT_MAX_RETRIES: i32 = 3;
pub const STALE_TASK_MINUTES: i64 = 15;

/// A durable unit of work: a type tag, a structured payload, a retry budget,
/// and a status (spec §3).
#[derive(Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}
