//! Configuration for the recognition system.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.datapool/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `DATAPOOL_` and use double
//! underscores to separate nested levels:
//! - `DATAPOOL_RECOGNITION__WORKER_THREADS=8` sets `recognition.worker_threads`
//! - `DATAPOOL_WATCH__DEBOUNCE_MS=500` sets `watch.debounce_ms`
//! - `DATAPOOL_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_DIR: &str = ".datapool";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "DATAPOOL_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to write configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Configuration file is corrupted: {0}\nRun 'datapool init --force' to regenerate.")]
    Corrupted(#[from] toml::de::Error),

    #[error("Configuration file already exists at {}. Use --force to overwrite", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("No configuration file found")]
    NotInitialized,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory containing `.datapool`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    /// Pattern recognizers installed between the built-in ones
    #[serde(default)]
    pub recognizers: IndexMap<String, RecognizerConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Level for every target without an override
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-component overrides; `registry = "debug"` applies to the
    /// `datapool::registry` target
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecognitionConfig {
    /// Background threads running folder scans and aggregate recomputes
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// How long a folder task lets triggers pile up before scanning
    #[serde(default = "default_coalesce_ms")]
    pub coalesce_ms: u64,

    /// Automatic rescans after a scan had failing children
    #[serde(default = "default_max_auto_retries")]
    pub max_auto_retries: u32,

    /// Sweeps without lookup before an entry is held weakly
    #[serde(default = "default_idle_sweeps")]
    pub idle_sweeps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Quiet period before a content change is applied
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Glob patterns (relative paths) never mirrored
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RecognizerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Higher runs first; ties keep name order
    #[serde(default)]
    pub priority: i32,

    /// File name globs claimed as primaries
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Extensions of same-base siblings grouped with the primary
    #[serde(default)]
    pub secondary_extensions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,

    /// Facet names: open, edit, instance
    #[serde(default)]
    pub facets: Vec<String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_worker_threads() -> usize {
    num_cpus::get().clamp(1, 4)
}
fn default_coalesce_ms() -> u64 {
    20
}
fn default_max_auto_retries() -> u32 {
    3
}
fn default_idle_sweeps() -> u32 {
    3
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        ".git/**".to_string(),
        ".datapool/**".to_string(),
        "target/**".to_string(),
        "node_modules/**".to_string(),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            logging: LoggingConfig::default(),
            recognition: RecognitionConfig::default(),
            watch: WatchConfig::default(),
            recognizers: default_recognizers(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            coalesce_ms: default_coalesce_ms(),
            max_auto_retries: default_max_auto_retries(),
            idle_sweeps: default_idle_sweeps(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

fn default_recognizers() -> IndexMap<String, RecognizerConfig> {
    let mut recognizers = IndexMap::new();

    recognizers.insert(
        "text".to_string(),
        RecognizerConfig {
            enabled: true,
            priority: 0,
            patterns: vec!["*.txt".to_string(), "*.md".to_string()],
            secondary_extensions: Vec::new(),
            type_name: Some("text".to_string()),
            mime: Some("text/plain".to_string()),
            facets: vec!["open".to_string(), "edit".to_string()],
        },
    );

    recognizers.insert(
        "rust".to_string(),
        RecognizerConfig {
            enabled: true,
            priority: 0,
            patterns: vec!["*.rs".to_string()],
            secondary_extensions: Vec::new(),
            type_name: Some("rust-source".to_string()),
            mime: Some("text/x-rust".to_string()),
            facets: vec!["open".to_string(), "edit".to_string()],
        },
    );

    recognizers
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        let mut settings = Self::figment(&config_path)
            .extract::<Settings>()
            .map_err(Box::new)?;

        if settings.workspace_root.is_none() {
            settings.workspace_root = Self::workspace_root();
        }
        Ok(settings)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::figment(path.as_ref())
            .extract::<Settings>()
            .map_err(Box::new)?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path))
            // Double underscore separates nested levels, single underscore
            // stays part of the field name
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Enabled recognizers in installation order: higher priority first,
    /// ties by name.
    pub fn enabled_recognizers(&self) -> Vec<(&str, &RecognizerConfig)> {
        let mut enabled: Vec<(&str, &RecognizerConfig)> = self
            .recognizers
            .iter()
            .filter(|(_, config)| config.enabled)
            .map(|(name, config)| (name.as_str(), config))
            .collect();
        enabled.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then_with(|| a.0.cmp(b.0)));
        enabled
    }

    /// Find `.datapool/settings.toml` searching from the current directory up
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Directory containing `.datapool`, searching upward from the current directory
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Check that a readable, parseable configuration file exists
    pub fn check_init() -> Result<(), ConfigError> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        if !config_path.exists() {
            return Err(ConfigError::NotInitialized);
        }

        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str::<Settings>(&content)?;
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Write a default settings file below `dir`
    pub fn init_config_file(dir: impl AsRef<Path>, force: bool) -> Result<PathBuf, ConfigError> {
        let config_path = dir.as_ref().join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err(ConfigError::AlreadyExists { path: config_path });
        }

        let settings = Settings {
            workspace_root: Some(dir.as_ref().to_path_buf()),
            ..Settings::default()
        };
        settings.save(&config_path)?;

        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.logging.default, "warn");
        assert!(settings.recognition.worker_threads > 0);
        assert!(settings.recognizers.contains_key("text"));
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[recognition]
worker_threads = 4
coalesce_ms = 5

[watch]
debounce_ms = 50

[recognizers.form]
priority = 10
patterns = ["*.form"]
secondary_extensions = ["java"]
facets = ["open", "instance"]

[recognizers.text]
enabled = false
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.recognition.worker_threads, 4);
        assert_eq!(settings.recognition.coalesce_ms, 5);
        assert_eq!(settings.watch.debounce_ms, 50);
        assert_eq!(settings.recognizers["form"].secondary_extensions, vec!["java"]);
        assert!(!settings.recognizers["text"].enabled);

        let names: Vec<&str> = settings
            .enabled_recognizers()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["form", "rust"]);
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let mut settings = Settings::default();
        settings.recognition.worker_threads = 2;
        settings.watch.debounce_ms = 900;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.recognition.worker_threads, 2);
        assert_eq!(loaded.watch.debounce_ms, 900);
    }

    #[test]
    fn test_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
[logging.modules]
registry = "debug"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();

        assert_eq!(settings.logging.modules["registry"], "debug");
        assert_eq!(
            crate::logging::directives(&settings.logging),
            "warn,datapool::registry=debug"
        );
        // Default values should still be present
        assert_eq!(settings.logging.default, "warn");
        assert_eq!(settings.recognition.max_auto_retries, 3);
        assert!(!settings.watch.ignore_patterns.is_empty());
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[recognition]\nidle_sweeps = 7\nmax_auto_retries = 1\n").unwrap();

        unsafe {
            std::env::set_var("DATAPOOL_RECOGNITION__IDLE_SWEEPS", "11");
        }

        let settings = Settings::load_from(&config_path).unwrap();

        // Environment variable should override config file
        assert_eq!(settings.recognition.idle_sweeps, 11);
        // Config file value should be used when no env var
        assert_eq!(settings.recognition.max_auto_retries, 1);

        unsafe {
            std::env::remove_var("DATAPOOL_RECOGNITION__IDLE_SWEEPS");
        }
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();

        let path = Settings::init_config_file(temp_dir.path(), false).unwrap();
        assert!(path.exists());

        assert!(matches!(
            Settings::init_config_file(temp_dir.path(), false),
            Err(ConfigError::AlreadyExists { .. })
        ));
        assert!(Settings::init_config_file(temp_dir.path(), true).is_ok());
    }
}
