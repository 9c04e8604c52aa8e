use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::ClassificationPolicy;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "reddit_downloader.toml";

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error in {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Config file already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Paths {
    pub output_directory: String,
    pub log_directory: String,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            output_directory: "output".to_string(),
            log_directory: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Pools {
    /// 0 means one slot per logical CPU
    pub max_download_concurrency: usize,
}

impl Default for Pools {
    fn default() -> Self {
        Self {
            max_download_concurrency: 0,
        }
    }
}

impl Pools {
    /// Concurrency ceiling with 0 resolved to the host's CPU count
    pub fn ceiling(&self) -> usize {
        match self.max_download_concurrency {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Network {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            user_agent: format!("reddit_downloader/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_secs: 30,
            probe_timeout_secs: 15,
            fetch_timeout_secs: 300,
        }
    }
}

impl Network {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Lookback window of a "top" listing
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListingTime {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl ListingTime {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingTime::Hour => "hour",
            ListingTime::Day => "day",
            ListingTime::Week => "week",
            ListingTime::Month => "month",
            ListingTime::Year => "year",
            ListingTime::All => "all",
        }
    }
}

impl fmt::Display for ListingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Listing {
    pub time: ListingTime,
    /// Maximum number of posts fetched per subreddit
    pub limit: usize,
}

impl Default for Listing {
    fn default() -> Self {
        Self {
            time: ListingTime::Month,
            limit: 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_terminal: bool,
    pub log_to_file: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "line".to_string(),
            log_to_terminal: true,
            log_to_file: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub paths: Paths,
    pub pools: Pools,
    pub network: Network,
    pub listing: Listing,
    pub logging: Logging,
    pub classification: ClassificationPolicy,
}

impl AppConfig {
    /// Reject values the rest of the program cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.listing.limit == 0 {
            return Err(ConfigError::Invalid {
                field: "listing.limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.network.fetch_timeout_secs == 0 || self.network.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "network",
                reason: "timeouts must be greater than zero".to_string(),
            });
        }
        if !matches!(self.logging.log_format.as_str(), "json" | "line") {
            return Err(ConfigError::Invalid {
                field: "logging.log_format",
                reason: format!("expected \"json\" or \"line\", got \"{}\"", self.logging.log_format),
            });
        }
        Ok(())
    }
}

// Config manager to load and hold the configuration of one run
#[derive(Debug, Clone)]
pub struct ConfigManager {
    app_config: AppConfig,
    config_path: PathBuf,
    loaded_from_file: bool,
}

impl ConfigManager {
    // Load the config file, falling back to defaults when it does not exist
    pub fn load(config_path: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_path = config_path.as_ref().to_path_buf();

        let (app_config, loaded_from_file) = if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            let config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::Toml {
                path: config_path.display().to_string(),
                source,
            })?;
            (config, true)
        } else {
            (AppConfig::default(), false)
        };

        app_config.validate()?;

        Ok(Self {
            app_config,
            config_path,
            loaded_from_file,
        })
    }

    // Get app config
    pub fn get_app_config(&self) -> &AppConfig {
        &self.app_config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn loaded_from_file(&self) -> bool {
        self.loaded_from_file
    }

    // Write a config file with default values; never overwrites
    pub fn write_default(config_path: impl AsRef<Path>) -> ConfigResult<()> {
        let config_path = config_path.as_ref();
        if config_path.exists() {
            return Err(ConfigError::AlreadyExists(config_path.display().to_string()));
        }

        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(&AppConfig::default())?;
        fs::write(config_path, toml_string)?;
        Ok(())
    }
}
