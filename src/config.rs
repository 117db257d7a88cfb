//! Configuration management for marketscrape using the prefer crate.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default number of pooled SQLite connections.
pub const DEFAULT_POOL_MAX_SIZE: u32 = 10;

/// Store settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Maximum pooled connections.
    pub pool_max_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to the platform data dir, e.g. ~/.local/share/marketscrape/
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("marketscrape");

        Self {
            data_dir,
            database_filename: "marketscrape.db".to_string(),
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target directory for data.
    #[serde(default)]
    pub target: Option<String>,
    /// Database filename.
    #[serde(default)]
    pub database: Option<String>,
    /// Maximum pooled connections.
    #[serde(default)]
    pub pool_max_size: Option<u32>,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers marketscrape config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("marketscrape").await {
            Ok(pref_config) => {
                let target: Option<String> = pref_config.get("target").ok();
                let database: Option<String> = pref_config.get("database").ok();
                let pool_max_size: Option<u32> = pref_config.get("pool_max_size").ok();

                Config {
                    target,
                    database,
                    pool_max_size,
                }
            }
            Err(_) => {
                tracing::debug!("No marketscrape config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            let path = shellexpand::tilde(target);
            settings.data_dir = PathBuf::from(path.as_ref());
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(size) = self.pool_max_size {
            // r2d2 rejects an empty pool
            settings.pool_max_size = size.max(1);
        }
    }
}

/// Load settings from configuration.
pub async fn load_settings() -> Settings {
    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    settings
}
