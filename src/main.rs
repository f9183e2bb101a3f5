//! Media Uploadr - media upload service for the portfolio CMS

use clap::Parser;
use media_uploadr::metrics::server::MetricsServer;
use media_uploadr::{config::Config, server::UploadServer, storage::build_backend};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Media Uploadr - multipart uploads to S3-compatible storage or a CDN
#[derive(Parser, Debug)]
#[command(name = "media-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Media Uploadr v{}", media_uploadr::VERSION);

    let config = Config::load(&args.config)?;
    info!(path = ?args.config, provider = %config.storage.provider, "Loaded configuration");

    let backend = build_backend(&config.storage)?;

    let mut metrics_server = if config.metrics.enabled {
        let mut server = MetricsServer::new(format!("0.0.0.0:{}", config.metrics.port));
        server.start().await?;
        Some(server)
    } else {
        None
    };

    let server = UploadServer::bind(&config, backend).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    if let Some(metrics_server) = metrics_server.as_mut() {
        metrics_server.shutdown().await;
    }

    Ok(())
}
