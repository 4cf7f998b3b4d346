//! Core durable task pipeline for the shelfkeeper ebook library service:
//! a Postgres-backed task queue, a single-worker dispatch loop, and the
//! four pipeline stage processors (`INGEST` → `METADATA` → `CONVERT` →
//! `ORGANIZE`) that turn a raw file on disk into an organized library entry.

pub mod books;
pub mod collaborators;
pub mod error;
pub mod model;
pub mod organizer;
pub mod path_template;
pub mod pipeline_config;
pub mod queue;
pub mod stages;
pub mod worker;

pub use error::{Error, Result};
pub use model::{Book, BookId, Task, TaskId, TaskKind, TaskPayload, TaskStatus};
pub use organizer::LibraryOrganizer;
pub use pipeline_config::PipelineConfig;
pub use queue::TaskQueue;
pub use worker::{ProcessorRegistry, Worker};
