use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Root for audit logs and the engine log. Empty means `$HOME/.hostpilot`.
    pub state_root: PathBuf,
    pub catalog_path: PathBuf,
    pub model: ModelSettings,
    pub host: HostSettings,
    pub timeouts: TimeoutSettings,
    pub max_candidates: usize,
    pub name_match_threshold: f64,
    pub log_filter: String,
    pub context_max_turns: usize,
    pub context_max_chars: usize,
    pub pull_ui_before_run: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            state_root: PathBuf::new(),
            catalog_path: PathBuf::from("scripts/manifest.json"),
            model: ModelSettings::default(),
            host: HostSettings::default(),
            timeouts: TimeoutSettings::default(),
            max_candidates: 5,
            name_match_threshold: 0.82,
            log_filter: "info".to_string(),
            context_max_turns: 8,
            context_max_chars: 6000,
            pull_ui_before_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelSettings {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostSettings {
    pub base_url: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:50051".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub model_seconds: u64,
    pub catalog_seconds: u64,
    pub host_validation_seconds: u64,
    pub execution_seconds: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            model_seconds: 60,
            catalog_seconds: 10,
            host_validation_seconds: 5,
            execution_seconds: 300,
        }
    }
}

impl TimeoutSettings {
    pub fn model(&self) -> Duration {
        Duration::from_secs(self.model_seconds)
    }

    pub fn catalog(&self) -> Duration {
        Duration::from_secs(self.catalog_seconds)
    }

    pub fn host_validation(&self) -> Duration {
        Duration::from_secs(self.host_validation_seconds)
    }

    pub fn execution(&self) -> Duration {
        Duration::from_secs(self.execution_seconds)
    }
}

impl EngineSettings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.catalog_path.as_os_str().is_empty() {
            return Err(ConfigError::Settings(
                "`catalog_path` must be non-empty".to_string(),
            ));
        }
        let timeouts = [
            ("timeouts.model_seconds", self.timeouts.model_seconds),
            ("timeouts.catalog_seconds", self.timeouts.catalog_seconds),
            (
                "timeouts.host_validation_seconds",
                self.timeouts.host_validation_seconds,
            ),
            ("timeouts.execution_seconds", self.timeouts.execution_seconds),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Settings(format!("`{field}` must be > 0")));
            }
        }
        if !(self.name_match_threshold > 0.0 && self.name_match_threshold <= 1.0) {
            return Err(ConfigError::Settings(
                "`name_match_threshold` must be in (0, 1]".to_string(),
            ));
        }
        if self.max_candidates == 0 {
            return Err(ConfigError::Settings(
                "`max_candidates` must be >= 1".to_string(),
            ));
        }
        if self.model.model.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`model.model` must be non-empty".to_string(),
            ));
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`log_filter` must be non-empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Relative catalog paths resolve against the directory holding the config file.
    pub fn resolve_catalog_path(&self, config_dir: Option<&Path>) -> PathBuf {
        if self.catalog_path.is_absolute() {
            return self.catalog_path.clone();
        }
        match config_dir {
            Some(dir) => dir.join(&self.catalog_path),
            None => self.catalog_path.clone(),
        }
    }
}
