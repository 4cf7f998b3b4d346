//! The four pipeline stage processors (spec §4.5): `INGEST` → `METADATA` →
//! `CONVERT` → `ORGANIZE`. Each is a thin [`crate::worker::TaskProcessor`]
//! wired with only the collaborators it needs, grounded on
//! `kobold.task_registry.create_tasks`'s per-task construction.

pub mod convert;
pub mod ingest;
pub mod metadata;
pub mod organize;

pub use convert::ConvertProcessor;
pub use ingest::IngestProcessor;
pub use metadata::MetadataProcessor;
pub use organize::OrganizeProcessor;
