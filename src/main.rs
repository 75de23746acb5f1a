//! Host binary for the news ingest service.
//!
//! Loads configuration, wires the pipeline together and runs the poller until
//! Ctrl-C. On Unix, `SIGHUP` re-reads the config file and applies a changed
//! poll interval to the running poller.
//!
//! ## Usage
//!
//! ```sh
//! CRYPTOPANIC_API_KEY=... awful_news_ingest --subjects SOL,ETH -d ./news_data
//! ```

use awful_news_ingest::cli::Cli;
use awful_news_ingest::config::NewsConfig;
use awful_news_ingest::cursor::{Cursor, FileCache};
use awful_news_ingest::extract::ContentExtractor;
use awful_news_ingest::extract::session::RenderSession;
use awful_news_ingest::poller::NewsPoller;
use awful_news_ingest::sink::{FileMemoryStore, NewsSink, ZeroEmbedder};
use awful_news_ingest::sources::ListingSource;
use awful_news_ingest::sources::cryptopanic::CryptoPanicClient;
use awful_news_ingest::utils::ensure_writable_dir;
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "awful_news_ingest starting up");

    let args = Cli::parse();
    debug!(config = ?args.config, subjects = ?args.subjects, "Parsed CLI arguments");

    let config = match NewsConfig::resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    // Early check: ensure data dir is writable
    if let Err(e) = ensure_writable_dir(&config.store.data_dir).await {
        error!(
            path = %config.store.data_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let source = CryptoPanicClient::new(&config.api.base_url, config.api_key()?)?
        .with_filter(config.api.filter.clone())
        .with_kind(config.api.kind.clone());
    let source_tag = source.name().to_string();

    let extractor = ContentExtractor::new(RenderSession::new(config.render.clone()));

    let store = FileMemoryStore::open(&config.store.data_dir).await?;
    let sink = NewsSink::new(
        Arc::new(store),
        Arc::new(ZeroEmbedder {
            dimensions: config.store.embedding_dimensions,
        }),
        &config.store.agent_name,
        source_tag,
    );
    let cursor = Cursor::new(Arc::new(FileCache::new(config.cache_path())));

    let (interval_tx, interval_rx) = watch::channel(config.poll_interval());
    let poller = Arc::new(NewsPoller::new(
        Arc::new(source),
        Arc::new(extractor),
        sink,
        cursor,
        config.poll_settings(),
        interval_rx,
    ));

    poller.start().await;
    wait_for_shutdown(&args, &interval_tx).await;
    poller.stop().await;

    info!(elapsed = ?start_time.elapsed(), "awful_news_ingest shut down");
    Ok(())
}

/// Block until Ctrl-C, applying interval reloads on SIGHUP meanwhile.
#[cfg(unix)]
async fn wait_for_shutdown(args: &Cli, interval: &watch::Sender<Duration>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGHUP handler; config reload disabled");
            wait_for_ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = wait_for_ctrl_c() => return,
            _ = hangup.recv() => reload_interval(args, interval),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_args: &Cli, _interval: &watch::Sender<Duration>) {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received; shutting down"),
        Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C; shutting down"),
    }
}

fn reload_interval(args: &Cli, interval: &watch::Sender<Duration>) {
    let next = match NewsConfig::resolve(args) {
        Ok(config) => config.poll_interval(),
        Err(e) => {
            warn!(error = %e, "Failed to reload configuration; keeping current interval");
            return;
        }
    };

    let changed = interval.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
    if changed {
        info!(interval = ?next, "Poll interval updated");
    } else {
        debug!(interval = ?next, "Poll interval unchanged after reload");
    }
}
