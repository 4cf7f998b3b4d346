mod collaborators;
mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shelfkeeper_core::books::BookRepository;
use shelfkeeper_core::queue::TaskQueue;
use shelfkeeper_core::stages::{ConvertProcessor, IngestProcessor, MetadataProcessor, OrganizeProcessor};
use shelfkeeper_core::worker::{ProcessorRegistry, Worker};
use shelfkeeper_core::{LibraryOrganizer, PipelineConfig};

use crate::collaborators::{NullCoverFetcher, NullMetadataProvider, PassthroughConverter};
use crate::config::Config;

/// Command line arguments for the shelfkeeper worker. Each flag overrides the
/// corresponding environment variable / `.env` entry when given.
#[derive(Parser, Debug)]
#[command(name = "shelfkeeper")]
#[command(about = "Durable task-queue worker that ingests, converts, and organizes ebooks")]
struct Args {
    /// Root directory books are organized into (overrides SHELFKEEPER_LIBRARY_ROOT)
    #[arg(long, env = "SHELFKEEPER_LIBRARY_ROOT")]
    library_root: Option<String>,

    /// Path template used to organize books (overrides ORGANIZE_TEMPLATE)
    #[arg(long, env = "ORGANIZE_TEMPLATE")]
    organize_template: Option<String>,

    /// Worker poll interval in seconds (overrides WORKER_POLL_INTERVAL)
    #[arg(long, env = "WORKER_POLL_INTERVAL")]
    poll_interval: Option<f64>,

    /// Log level / tracing filter (overrides RUST_LOG)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env();

    if let Some(library_root) = args.library_root {
        config.library_root = library_root;
    }
    if let Some(organize_template) = args.organize_template {
        config.path_template = organize_template;
    }
    if let Some(poll_interval) = args.poll_interval {
        config.worker_poll_interval_secs = poll_interval;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .init();

    info!(database_url = %redact(&config.database_url), "starting shelfkeeper");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .max_lifetime(Duration::from_secs(1800))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let queue = Arc::new(TaskQueue::new(pool.clone()));
    let books = Arc::new(BookRepository::new(pool.clone()));
    let organizer = Arc::new(LibraryOrganizer::new(
        config.library_root.clone(),
        config.path_template.clone(),
        config.organize_enabled,
    ));

    let pipeline_config = PipelineConfig {
        organize_enabled: config.organize_enabled,
        convert_enabled: config.convert_enabled,
        embed_metadata_enabled: config.embed_metadata_enabled,
        ..PipelineConfig::default()
    };

    let registry = ProcessorRegistry::new()
        .register(Arc::new(IngestProcessor::new(
            books.clone(),
            queue.clone(),
            pipeline_config.clone(),
        )))
        .register(Arc::new(MetadataProcessor::new(
            books.clone(),
            Arc::new(NullMetadataProvider),
            Arc::new(NullCoverFetcher),
            queue.clone(),
            pipeline_config.clone(),
        )))
        .register(Arc::new(ConvertProcessor::new(
            books.clone(),
            Arc::new(PassthroughConverter),
            queue.clone(),
            pipeline_config.clone(),
        )))
        .register(Arc::new(OrganizeProcessor::new(books.clone(), organizer)));

    let worker = Worker::with_poll_interval(
        queue.clone(),
        registry,
        Duration::from_secs_f64(config.worker_poll_interval_secs),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    worker.run(shutdown_rx).await;
    Ok(())
}

fn redact(database_url: &str) -> String {
    match database_url.rsplit_once('@') {
        Some((_, host)) => format!("***@{host}"),
        None => database_url.to_string(),
    }
}
