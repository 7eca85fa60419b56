//! Configuration for the view reloader.
//!
//! Settings are layered:
//! - Default values
//! - TOML configuration file (`.viewreload/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `VR_` and use double
//! underscores to separate nested levels:
//! - `VR_WATCHER__BACKEND=evented` sets `watcher.backend`
//! - `VR_WATCHER__POLL_INTERVAL_MS=250` sets `watcher.poll_interval_ms`
//! - `VR_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = ".viewreload";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// View lookup locations registered at startup
    #[serde(default)]
    pub view_paths: Vec<PathBuf>,

    /// Watcher backend and polling settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which directory watcher implementation builds each generation.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WatcherBackend {
    /// Walk directories and compare modification times on each poll
    #[default]
    Polling,
    /// Receive OS notifications through `notify`
    Evented,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    #[serde(default)]
    pub backend: WatcherBackend,

    /// How often the CLI polls `updated()`
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// File extensions to watch (without the dot). Empty watches every file.
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `reloader = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 { 1 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_log_level() -> String { "warn".to_string() }

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            view_paths: Vec::new(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backend: WatcherBackend::default(),
            poll_interval_ms: default_poll_interval_ms(),
            extensions: Vec::new(),
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

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            // Double underscore separates nesting levels; single underscores
            // stay inside field names.
            .merge(Env::prefixed("VR_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
    }

    /// Find the nearest `.viewreload/settings.toml`, searching upwards from
    /// the current directory
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(SETTINGS_FILE))
    }

    /// Directory containing `.viewreload`, if any
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file under `root`
    pub fn init_config_file(
        root: impl AsRef<Path>,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.as_ref().join(CONFIG_DIR).join(SETTINGS_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
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
        assert!(settings.view_paths.is_empty());
        assert_eq!(settings.watcher.backend, WatcherBackend::Polling);
        assert_eq!(settings.watcher.poll_interval_ms, 1000);
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2
view_paths = ["app/views", "engines/admin/app/views"]

[watcher]
backend = "evented"
poll_interval_ms = 250
extensions = ["erb", "haml"]

[logging.modules]
reloader = "debug"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(
            settings.view_paths,
            vec![
                PathBuf::from("app/views"),
                PathBuf::from("engines/admin/app/views")
            ]
        );
        assert_eq!(settings.watcher.backend, WatcherBackend::Evented);
        assert_eq!(settings.watcher.poll_interval_ms, 250);
        assert_eq!(settings.watcher.extensions, vec!["erb", "haml"]);
        assert_eq!(settings.logging.modules["reloader"], "debug");
    }

    #[test]
    fn test_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        fs::write(&config_path, "[watcher]\nbackend = \"evented\"\n").unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.watcher.backend, WatcherBackend::Evented);
        // Untouched values keep their defaults
        assert_eq!(settings.version, 1);
        assert_eq!(settings.watcher.poll_interval_ms, 1000);
        assert!(settings.watcher.extensions.is_empty());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.watcher.backend, WatcherBackend::Polling);
    }

    #[test]
    fn test_invalid_backend_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[watcher]\nbackend = \"inotify\"\n").unwrap();

        assert!(Settings::load_from(&config_path).is_err());
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.view_paths.push(PathBuf::from("app/views"));
        settings.watcher.poll_interval_ms = 50;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.view_paths, vec![PathBuf::from("app/views")]);
        assert_eq!(loaded.watcher.poll_interval_ms, 50);
    }

    #[test]
    fn test_init_config_file() {
        let temp_dir = TempDir::new().unwrap();

        let path = Settings::init_config_file(temp_dir.path(), false).unwrap();
        assert!(path.ends_with(".viewreload/settings.toml"));
        assert!(path.exists());

        // Refuses to overwrite without force
        assert!(Settings::init_config_file(temp_dir.path(), false).is_err());
        assert!(Settings::init_config_file(temp_dir.path(), true).is_ok());
    }
}
