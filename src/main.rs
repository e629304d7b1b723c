use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

use newsroom::api::{self, ApiState, NewsService};
use newsroom::config::{Config, DEFAULT_CONFIG_PATH};
use newsroom::feed::{FeedDirectory, HttpFetcher, Pipeline, SyndicationParser};
use newsroom::scheduler::Scheduler;
use newsroom::storage::{Database, StoreError};

#[derive(Parser, Debug)]
#[command(
    name = "newsroom",
    version,
    about = "Periodically ingests RSS/Atom feeds and serves the latest entries over HTTP"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run a single ingestion cycle, print its summary and exit
    #[arg(long)]
    once: bool,

    /// Reset database (delete and recreate)
    #[arg(long)]
    reset_db: bool,
}

/// Delete a file-backed database along with its WAL side files.
fn reset_database(path: &str) -> Result<()> {
    if path == ":memory:" {
        return Ok(());
    }
    for suffix in ["", "-wal", "-shm"] {
        let file = format!("{path}{suffix}");
        if Path::new(&file).exists() {
            std::fs::remove_file(&file)
                .with_context(|| format!("Failed to delete database file '{file}'"))?;
        }
    }
    println!("Database reset.");
    Ok(())
}

/// Resolves when the process receives Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Start at info so config warnings are visible, then switch to the
    // configured level. RUST_LOG overrides both.
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if !from_env {
        filter_handle
            .reload(EnvFilter::new(&config.log_level))
            .context("Failed to apply log_level")?;
    }

    config.validate().context("Configuration rejected")?;

    if args.reset_db {
        reset_database(&config.database_path)?;
    }

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db.with_default_limit(config.default_news_limit),
        Err(StoreError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of newsroom appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to open database"),
    };

    let directory = Arc::new(FeedDirectory::new(&config.feeds));
    let fetcher = HttpFetcher::new(tracing::info_span!("fetcher"))
        .context("Failed to build HTTP client")?;
    let pipeline = Pipeline::new(
        Arc::new(fetcher),
        Arc::new(SyndicationParser::new(tracing::info_span!("parser"))),
        Arc::new(db.clone()),
        Arc::clone(&directory),
        tracing::info_span!("pipeline"),
    );
    let scheduler = Scheduler::new(
        Arc::new(pipeline),
        directory.urls().to_vec(),
        config.scheduler_config(),
        tracing::info_span!("scheduler"),
    );

    if args.once {
        let summary = scheduler.run_cycle().await;
        let stored = db.count_entries().await.context("Failed to count entries")?;
        println!(
            "Processed {} feeds: {} succeeded, {} failed, {} new entries in {:.1}s ({} stored)",
            summary.total,
            summary.succeeded,
            summary.failed,
            summary.entries_saved,
            summary.elapsed.as_secs_f64(),
            stored
        );
        db.close().await;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_address))?;
    let router = api::create_router(ApiState {
        news: NewsService::new(Arc::new(db.clone())),
        feeds: scheduler.urls().len(),
        interval: scheduler.interval(),
    });
    let server_shutdown = CancellationToken::new();
    let server = tokio::spawn(api::serve(listener, router, server_shutdown.clone()));

    scheduler.start().context("Failed to start scheduler")?;

    shutdown_signal().await;

    // Stop producers first, then the server, and release the database last
    scheduler.stop();
    server_shutdown.cancel();
    scheduler.wait().await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "API server failed"),
        Err(e) => tracing::error!(error = %e, "API server task aborted"),
    }
    db.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
