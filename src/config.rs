//! Service configuration.
//!
//! Values come from three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. An optional YAML file (`--config` / `NEWS_CONFIG`)
//! 3. Command-line flags and their environment variables
//!
//! # Example file
//!
//! ```yaml
//! poll_interval_secs: 600
//! subjects: [SOL, ETH]
//! max_per_subject: 5
//! api:
//!   filter: rising
//! render:
//!   navigation_timeout_secs: 30
//!   no_sandbox: true
//! store:
//!   data_dir: ./news_data
//!   room_key: "news-{subject}"
//! ```

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::extract::session::RenderConfig;
use crate::poller::PollSettings;
use crate::sink::{DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_ROOM_KEY};
use crate::sources::cryptopanic::{DEFAULT_BASE_URL, DEFAULT_FILTER, DEFAULT_KIND};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub poll_interval_secs: u64,
    pub subjects: Vec<String>,
    pub max_per_subject: usize,
    /// Skip listing entries at or before the stored watermark once a cycle
    /// has completed cleanly.
    pub incremental: bool,
    pub api: ApiConfig,
    pub render: RenderConfig,
    pub store: StoreConfig,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 600,
            subjects: vec!["SOL".to_string()],
            max_per_subject: 5,
            incremental: false,
            api: ApiConfig::default(),
            render: RenderConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub filter: String,
    pub kind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_token: None,
            filter: DEFAULT_FILTER.to_string(),
            kind: DEFAULT_KIND.to_string(),
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("filter", &self.filter)
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Room key template. `{subject}` is replaced with the item's subject.
    pub room_key: String,
    pub agent_name: String,
    pub embedding_dimensions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./news_data"),
            room_key: DEFAULT_ROOM_KEY.to_string(),
            agent_name: "news-agent".to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl NewsConfig {
    /// Read a YAML config file. An empty file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Build the effective configuration: defaults, then the file named by
    /// the CLI (if any), then the CLI/env overrides. The result is validated.
    #[instrument(level = "info", skip_all, fields(file = ?cli.config))]
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.normalize();
        config.validate()?;
        debug!(?config, "Resolved configuration");
        Ok(config)
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(secs) = cli.poll_interval {
            self.poll_interval_secs = secs;
        }
        if !cli.subjects.is_empty() {
            self.subjects = cli.subjects.clone();
        }
        if let Some(max) = cli.max_per_subject {
            self.max_per_subject = max;
        }
        if let Some(key) = &cli.api_key {
            self.api.auth_token = Some(key.clone());
        }
        if let Some(dir) = &cli.data_dir {
            self.store.data_dir = dir.clone();
        }
        if let Some(chrome) = &cli.chrome {
            self.render.chrome_executable = Some(chrome.clone());
        }
        if cli.no_sandbox {
            self.render.no_sandbox = true;
        }
        if cli.incremental {
            self.incremental = true;
        }
    }

    /// Trim subjects and drop blank entries.
    pub fn normalize(&mut self) {
        self.subjects = self
            .subjects
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_key()?;
        if self.subjects.is_empty() {
            return Err(ConfigError::NoSubjects);
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if self.max_per_subject == 0 {
            return Err(ConfigError::Invalid {
                field: "max_per_subject",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.store.room_key.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "store.room_key",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api
            .auth_token
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            subjects: self.subjects.clone(),
            max_per_subject: self.max_per_subject,
            incremental: self.incremental,
            room_key: self.store.room_key.clone(),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.store.data_dir.join("cache.json")
    }
}
