//! Environment-driven configuration, grounded on
//! `ferrex-server::infra::config::Config::from_env`.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub library_root: String,
    pub path_template: String,
    pub organize_enabled: bool,
    pub convert_enabled: bool,
    pub embed_metadata_enabled: bool,
    pub worker_poll_interval_secs: f64,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/shelfkeeper".to_string()),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| num_cpus::get() as u32),
            db_min_connections: env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            library_root: env::var("SHELFKEEPER_LIBRARY_ROOT")
                .unwrap_or_else(|_| "./library".to_string()),
            path_template: env::var("ORGANIZE_TEMPLATE")
                .unwrap_or_else(|_| "{author}/{series}/{title}".to_string()),
            organize_enabled: env::var("ORGANIZE_LIBRARY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            convert_enabled: env::var("CONVERT_EPUB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            embed_metadata_enabled: env::var("EMBED_METADATA")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            worker_poll_interval_secs: env::var("WORKER_POLL_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5.0),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}
