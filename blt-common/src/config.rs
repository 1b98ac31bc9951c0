//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`BLT_ROOT_FOLDER`)
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file is never fatal: a warning is logged and
//! compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "BLT_ROOT_FOLDER";

/// Environment variable carrying the Socrata application token
pub const SOCRATA_TOKEN_ENV: &str = "BLT_SOCRATA_APP_TOKEN";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "blt.db";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Folder holding the SQLite database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub registries: RegistryConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Replacement for the embedded coefficient tables
    #[serde(default)]
    pub coefficients_path: Option<PathBuf>,
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// EnvFilter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// External registry endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub geosearch_url: String,
    pub socrata_base_url: String,
    /// Energy benchmarking dataset id
    pub energy_dataset: String,
    /// Tax-lot structure dataset id
    pub structure_dataset: String,
    pub app_token: Option<String>,
    pub request_timeout_secs: u64,
    /// Minimum spacing between requests to one host
    pub min_request_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            geosearch_url: "https://geosearch.planninglabs.nyc/v2/search".to_string(),
            socrata_base_url: "https://data.cityofnewyork.us/resource".to_string(),
            energy_dataset: "5zyy-y8am".to_string(),
            structure_dataset: "64uk-42ks".to_string(),
            app_token: None,
            request_timeout_secs: 30,
            min_request_interval_ms: 100,
        }
    }
}

/// Bounded retry for transient upstream failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

/// Pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Geocoding matches below this confidence are rejected
    pub geocode_confidence_threshold: f64,
    /// Buildings processed at once by the batch runner
    pub concurrency: usize,
    /// Stored records younger than this are served from the store
    pub staleness_hours: i64,
    /// Emission factor for categories absent from a period table.
    /// `None` excludes such categories from the limit.
    pub missing_factor_default: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            geocode_confidence_threshold: 0.8,
            concurrency: 8,
            staleness_hours: 24,
            missing_factor_default: None,
        }
    }
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub config_path: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            // ~/.local/share/blt (or /var/lib/blt for system-wide)
            dirs::data_local_dir()
                .map(|d| d.join("blt"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/blt"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("blt"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/blt"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("blt"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\blt"))
        } else {
            PathBuf::from("./blt_data")
        };

        Self {
            root_folder,
            log_level: default_log_level(),
            config_path: default_config_path(),
        }
    }
}

/// `~/.config/blt/blt-ingest.toml` or the platform equivalent
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("blt").join("blt-ingest.toml"))
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))
}

/// Load config, falling back to defaults when the file is missing or invalid
pub fn load_or_default(path: Option<&Path>) -> TomlConfig {
    let Some(path) = path else {
        debug!("No config path available, using compiled defaults");
        return TomlConfig::default();
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return TomlConfig::default();
    }

    match load_toml_config(path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            config
        }
        Err(e) => {
            warn!("{}; using compiled defaults", e);
            TomlConfig::default()
        }
    }
}

/// Write config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;

    Ok(())
}

/// Resolve the Socrata application token: environment first, then TOML
pub fn resolve_app_token(toml_config: &TomlConfig) -> Option<String> {
    if let Ok(token) = std::env::var(SOCRATA_TOKEN_ENV) {
        if is_valid_key(&token) {
            info!("Socrata app token loaded from environment variable");
            return Some(token);
        }
    }

    match toml_config.registries.app_token.as_ref() {
        Some(token) if is_valid_key(token) => {
            info!("Socrata app token loaded from TOML config");
            Some(token.clone())
        }
        _ => {
            warn!("No Socrata app token configured; requests are subject to shared rate limits");
            None
        }
    }
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Root folder resolution across CLI, environment, TOML and defaults
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(toml_config: &TomlConfig) -> Self {
        Self {
            cli_arg: None,
            toml_root: toml_config.root_folder.clone(),
        }
    }

    pub fn with_cli_arg(mut self, cli_arg: Option<PathBuf>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            return path.clone();
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder and locates the database inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }
}
