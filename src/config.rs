//! Configuration module for the similarity search system.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `DS_` and use double underscores
//! to separate nested levels:
//! - `DS_SEARCH__DEFAULT_K=5` sets `search.default_k`
//! - `DS_STORAGE__BUCKET=reference_images` sets `storage.bucket`
//! - `DS_LOGGING__LEVEL=debug` sets `logging.level`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::similarity::RefreshPolicy;
use crate::vector::DEFAULT_PARALLEL_SCAN_THRESHOLD;

/// Directory holding the workspace configuration.
const CONFIG_DIR: &str = ".dermasim";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace root directory (where .dermasim is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Similarity search settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Record store and display resource settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Retrieval evaluation settings
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    /// Number of matches returned when the caller does not specify k
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Reference set size at which distance scans run in parallel
    #[serde(default = "default_parallel_scan_threshold")]
    pub parallel_scan_threshold: usize,

    /// Maximum index age in seconds before the next load rebuilds it.
    /// Zero disables refresh: the index lives until an explicit reload.
    #[serde(default)]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Storage namespace holding the reference images
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// File extension appended to an item id to name its image
    #[serde(default = "default_image_extension")]
    pub image_extension: String,

    /// Base URL used to build public image URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// JSON dump of the reference table used by the CLI
    #[serde(default = "default_dump_path")]
    pub dump_path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EvaluationConfig {
    /// Diagnosis treated as the positive class in the binary breakdown
    #[serde(default = "default_positive_label")]
    pub positive_label: String,

    /// Report the share of queries with at least this many correct matches
    #[serde(default = "default_match_thresholds")]
    pub match_thresholds: Vec<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// One of: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_k() -> usize {
    9
}
fn default_parallel_scan_threshold() -> usize {
    DEFAULT_PARALLEL_SCAN_THRESHOLD
}
fn default_bucket() -> String {
    "HAM10000_for_comparison".to_string()
}
fn default_image_extension() -> String {
    "jpg".to_string()
}
fn default_public_base_url() -> String {
    "http://127.0.0.1:54321".to_string()
}
fn default_dump_path() -> PathBuf {
    PathBuf::from(".dermasim/reference.json")
}
fn default_positive_label() -> String {
    "mel".to_string()
}
fn default_match_thresholds() -> Vec<usize> {
    vec![3, 5, 6, 8]
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            search: SearchConfig::default(),
            storage: StorageConfig::default(),
            evaluation: EvaluationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            parallel_scan_threshold: default_parallel_scan_threshold(),
            refresh_interval_secs: 0,
        }
    }
}

impl SearchConfig {
    /// Staleness policy derived from `refresh_interval_secs`.
    pub fn refresh_policy(&self) -> RefreshPolicy {
        match self.refresh_interval_secs {
            0 => RefreshPolicy::Never,
            secs => RefreshPolicy::MaxAge(Duration::from_secs(secs)),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            image_extension: default_image_extension(),
            public_base_url: default_public_base_url(),
            dump_path: default_dump_path(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            positive_label: default_positive_label(),
            match_thresholds: default_match_thresholds(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Parsed level, falling back to INFO for unknown names.
    pub fn tracing_level(&self) -> tracing::Level {
        self.level.parse().unwrap_or(tracing::Level::INFO)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::figment(config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: impl AsRef<Path>) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path.as_ref()))
            // Double underscore separates nesting levels; single underscores
            // stay part of the field name.
            .merge(Env::prefixed("DS_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the workspace config by looking for a .dermasim directory
    /// from the current directory up to the filesystem root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .dermasim is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Check if configuration is properly initialized
    pub fn check_init() -> Result<(), String> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        if !config_path.exists() {
            return Err("No configuration file found".to_string());
        }

        match std::fs::read_to_string(&config_path) {
            Ok(content) => {
                if let Err(e) = toml::from_str::<Settings>(&content) {
                    return Err(format!(
                        "Configuration file is corrupted: {e}\nRun 'dermasim init --force' to regenerate."
                    ));
                }
            }
            Err(e) => {
                return Err(format!("Cannot read configuration file: {e}"));
            }
        }

        Ok(())
    }

    /// Dump path resolved against the workspace root when relative.
    pub fn resolved_dump_path(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) if self.storage.dump_path.is_relative() => {
                root.join(&self.storage.dump_path)
            }
            _ => self.storage.dump_path.clone(),
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(
        dir: impl AsRef<Path>,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = dir.as_ref().join(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = r#"# dermasim configuration file

# Version of the configuration schema
version = 1

[search]
# Matches returned when the caller does not pass k
default_k = 9

# Reference set size at which the distance scan runs on all cores
parallel_scan_threshold = 16384

# Rebuild the index on the next request once it is older than this many
# seconds. 0 keeps the index until an explicit reload.
refresh_interval_secs = 0

[storage]
# Storage namespace holding the reference images
bucket = "HAM10000_for_comparison"

# Image file name is "<trimmed id>.<image_extension>"
image_extension = "jpg"

# Base URL of the object storage service
public_base_url = "http://127.0.0.1:54321"

# JSON dump of the reference table (relative to the workspace root)
dump_path = ".dermasim/reference.json"

[evaluation]
# Diagnosis treated as the positive class in the binary breakdown
positive_label = "mel"

# Report the share of queries with at least N correct matches
match_thresholds = [3, 5, 6, 8]

[logging]
# error, warn, info, debug or trace
level = "info"
"#;

        std::fs::write(&config_path, template)?;
        Ok(config_path)
    }
}
