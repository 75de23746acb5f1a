//! Command-line interface definitions for the news ingest service.
//!
//! Every option can also be given through an environment variable. Options
//! left unset fall back to the config file, then to the built-in defaults
//! (see [`NewsConfig`](crate::config::NewsConfig)).

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the news ingest service.
///
/// # Examples
///
/// ```sh
/// # Poll SOL and ETH every five minutes
/// CRYPTOPANIC_API_KEY=... awful_news_ingest --subjects SOL,ETH --poll-interval 300
///
/// # Everything from a file, Chrome from a custom location
/// awful_news_ingest -c ./config.yaml --chrome /usr/bin/chromium --no-sandbox
/// ```
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long, env = "NEWS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds between poll cycles
    #[arg(short = 'i', long, env = "NEWS_POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Comma-separated subjects (currency codes) to poll
    #[arg(short, long, env = "NEWS_CURRENCIES", value_delimiter = ',')]
    pub subjects: Vec<String>,

    /// Maximum items expanded per subject per cycle
    #[arg(short = 'n', long, env = "NEWS_MAX_PER_CURRENCY")]
    pub max_per_subject: Option<usize>,

    /// CryptoPanic API key
    #[arg(long, env = "CRYPTOPANIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Directory for stored memories and the watermark cache
    #[arg(short, long, env = "NEWS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Chrome/Chromium executable used for page rendering
    #[arg(long, env = "CHROME_PATH")]
    pub chrome: Option<PathBuf>,

    /// Launch Chrome without its sandbox (needed as root in containers)
    #[arg(long)]
    pub no_sandbox: bool,

    /// Skip items at or before the watermark after a clean cycle
    #[arg(long)]
    pub incremental: bool,
}
