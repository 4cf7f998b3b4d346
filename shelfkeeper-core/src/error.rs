use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("source file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("could not generate a unique path for {0} after 1000 attempts")]
    ExhaustedUniqueNames(PathBuf),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
