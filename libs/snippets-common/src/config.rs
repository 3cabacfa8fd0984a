// Service configuration for the snippet runner
// Loaded once at startup from config/snippets.json

use crate::error::ConfigError;
use crate::profile::{Defaults, LanguageTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/snippets.json";
pub const CONFIG_PATH_ENV: &str = "SNIPPETS_CONFIG";

const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_CROP_LENGTH: usize = 2000;
const DEFAULT_MEMORY_LIMIT_MB: u64 = 128;
const DEFAULT_FOLDER: &str = "_storage/snippets";

/// One entry of the language table, as written in the config file.
/// `image` and `command` are optional here only so that a missing value
/// is reported with the language name instead of a serde error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_crop")]
    pub crop: usize,
    #[serde(default = "default_memory")]
    pub memory: u64,
    /// Parent of the per-job working directories
    #[serde(default = "default_folder")]
    pub folder: PathBuf,
    /// Download token; usually supplied through SNIPPETS_TOKEN instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub keep_workdirs: bool,
    #[serde(default)]
    pub languages: BTreeMap<String, LanguageEntry>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_crop() -> usize {
    DEFAULT_CROP_LENGTH
}

fn default_memory() -> u64 {
    DEFAULT_MEMORY_LIMIT_MB
}

fn default_folder() -> PathBuf {
    PathBuf::from(DEFAULT_FOLDER)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECONDS,
            crop: DEFAULT_CROP_LENGTH,
            memory: DEFAULT_MEMORY_LIMIT_MB,
            folder: default_folder(),
            token: None,
            keep_workdirs: false,
            languages: BTreeMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Load and validate the configuration at `config_path`
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }

        let content = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;

        Self::from_json(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: config_path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Load from SNIPPETS_CONFIG, or config/snippets.json when unset
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path))
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig =
            serde_json::from_str(content).map_err(|source| ConfigError::Parse {
                path: PathBuf::new(),
                source,
            })?;

        // Reject incomplete language entries at load time, not at the first job
        config.language_table()?;

        Ok(config)
    }

    pub fn defaults(&self) -> Defaults {
        Defaults {
            timeout_seconds: self.timeout,
            memory_limit_mb: self.memory,
            crop_length: self.crop,
        }
    }

    /// Build the validated language table used by the resolver
    pub fn language_table(&self) -> Result<LanguageTable, ConfigError> {
        LanguageTable::new(self.defaults(), &self.languages)
    }
}
