//! Configuration for the document store
//!
//! Selects the persistence backend and where its cache file lives.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable that overrides the configured backend.
pub const BACKEND_ENV: &str = "REGISTRY_STORE_BACKEND";

/// Project-level config file name, looked up in the project root.
pub const PROJECT_CONFIG_FILE: &str = ".registry-store.toml";

/// Which persistence strategy backs the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Whole-store JSON file, rewritten after every mutation
    #[default]
    Snapshot,
    /// In-memory SQLite engine, exported to disk on close
    Sqlite,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Snapshot => write!(f, "snapshot"),
            BackendKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "snapshot" | "json" => Ok(BackendKind::Snapshot),
            "sqlite" | "sql" => Ok(BackendKind::Sqlite),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Active backend
    pub backend: BackendKind,
    /// Directory holding the cache files; relative paths resolve against
    /// the working directory (or the project root for `load_standard`)
    pub cache_dir: PathBuf,
    /// Snapshot backend file name inside `cache_dir`
    pub snapshot_file: String,
    /// SQLite image file name inside `cache_dir`
    pub sqlite_file: String,
    /// Indent the snapshot file
    pub pretty_snapshot: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            cache_dir: PathBuf::from(".cache"),
            snapshot_file: "localdb.json".to_string(),
            sqlite_file: "registry.sqlite".to_string(),
            pretty_snapshot: true,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.cache_dir.join(&self.snapshot_file)
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.cache_dir.join(&self.sqlite_file)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json_str)?)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a single TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = read_config(path)?;
        let config = Self::from_toml(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from standard locations
    ///
    /// Layers, later keys overriding earlier ones: defaults, user
    /// (`<config_dir>/registry-store/config.toml`), project
    /// (`<root>/.registry-store.toml`), then `REGISTRY_STORE_BACKEND`.
    /// A relative `cache_dir` is resolved against the project root.
    pub fn load_standard(project_root: Option<&Path>) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            layers.push(dir.join("registry-store").join("config.toml"));
        }
        if let Some(root) = project_root {
            layers.push(root.join(PROJECT_CONFIG_FILE));
        }

        let mut merged = toml::Table::new();
        for path in layers.iter().filter(|p| p.is_file()) {
            let text = read_config(path)?;
            let table: toml::Table = toml::from_str(&text)?;
            tracing::debug!(path = %path.display(), "loaded store config layer");
            merged.extend(table);
        }

        let mut config: StoreConfig = toml::Value::Table(merged).try_into()?;
        config = config.with_backend_override(std::env::var(BACKEND_ENV).ok().as_deref())?;
        if let Some(root) = project_root {
            if config.cache_dir.is_relative() {
                config.cache_dir = root.join(&config.cache_dir);
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply a backend name taken from the environment, if any
    pub fn with_backend_override(mut self, value: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.backend = value.parse()?;
        }
        Ok(self)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, name) in [
            ("snapshot_file", &self.snapshot_file),
            ("sqlite_file", &self.sqlite_file),
        ] {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
            }
            if name.contains('/') || name.contains('\\') {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a bare file name, got {:?}",
                    field, name
                )));
            }
        }

        if self.snapshot_file == self.sqlite_file {
            return Err(ConfigError::Invalid(
                "snapshot_file and sqlite_file must differ".to_string(),
            ));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cache_dir must not be empty".to_string()));
        }

        Ok(())
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Configuration loading or validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Cannot serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
