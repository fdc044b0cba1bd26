use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestration::QueueConfig;

pub const CONFIG_ENV_VAR: &str = "PORTER_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the home directory")]
    NoHomeDir,
    #[error("failed to read config '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemon: DaemonSection,
    pub queue: QueueSection,
    pub auto_file: AutoFileSection,
    pub rename: RenameSection,
    pub screenshots: ScreenshotsSection,
    pub llm: LlmSection,
    pub notifications: NotificationsSection,
    pub logging: LoggingSection,
    pub undo: UndoSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    pub socket_path: PathBuf,
    pub database_path: PathBuf,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/porter.sock"),
            database_path: PathBuf::from("~/.local/share/porter/porter.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub default_timeout_seconds: u64,
    pub buffer_capacity: usize,
    pub history_retention_days: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_retries: 3,
            retry_delay_seconds: 5,
            default_timeout_seconds: 30,
            buffer_capacity: 100,
            history_retention_days: 7,
        }
    }
}

impl QueueSection {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.max_concurrent,
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_seconds),
            task_timeout: Duration::from_secs(self.default_timeout_seconds),
            buffer_capacity: self.buffer_capacity,
            ..QueueConfig::default()
        }
    }

    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(self.history_retention_days * 24 * 60 * 60)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CategoryConfig {
    fn new(name: &str, path: &str, extensions: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            path: PathBuf::from(path),
            extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
            description: None,
        }
    }

    pub fn matches_extension(&self, extension: &str) -> bool {
        self.extensions
            .iter()
            .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFileSection {
    pub destination_root: PathBuf,
    pub categories: Vec<CategoryConfig>,
    pub use_llm_classification: bool,
    pub auto_move: bool,
    pub auto_rename: bool,
    pub settle_delay_ms: u64,
}

impl Default for AutoFileSection {
    fn default() -> Self {
        Self {
            destination_root: PathBuf::from("~/Documents/Sorted"),
            categories: vec![
                CategoryConfig::new("documents", "~/Documents", &["pdf", "doc", "docx", "txt", "md"]),
                CategoryConfig::new("images", "~/Pictures", &["png", "jpg", "jpeg", "gif", "webp"]),
                CategoryConfig::new("archives", "~/Downloads/Archives", &["zip", "tar", "gz", "7z"]),
            ],
            use_llm_classification: true,
            auto_move: true,
            auto_rename: false,
            settle_delay_ms: 3000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePosition {
    #[default]
    Prefix,
    Suffix,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameSection {
    pub naming_convention: String,
    pub include_date: bool,
    pub date_position: DatePosition,
    pub max_length: usize,
    pub preserve_extension: bool,
}

impl Default for RenameSection {
    fn default() -> Self {
        Self {
            naming_convention: "kebab-case".to_string(),
            include_date: false,
            date_position: DatePosition::Prefix,
            max_length: 50,
            preserve_extension: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    pub rename: bool,
    pub use_vision: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_provider: Option<String>,
    pub settle_delay_ms: u64,
}

impl Default for ScreenshotsSection {
    fn default() -> Self {
        Self {
            destination: None,
            rename: true,
            use_vision: true,
            vision_provider: None,
            settle_delay_ms: 2000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub default_provider: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            default_provider: "ollama".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsSection {
    pub enabled: bool,
    pub show_previews: bool,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            show_previews: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub recent_capacity: usize,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            recent_capacity: 1000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoSection {
    pub retention_hours: u64,
}

impl Default for UndoSection {
    fn default() -> Self {
        Self {
            retention_hours: 24,
        }
    }
}

impl UndoSection {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 60 * 60)
    }
}

impl DaemonConfig {
    /// `explicit`, else `$PORTER_CONFIG`, else `~/.config/porter/config.toml`.
    pub fn resolve_path(explicit: Option<&Path>) -> ConfigResult<PathBuf> {
        if let Some(path) = explicit {
            return Ok(expand_tilde(path));
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
            return Ok(expand_tilde(Path::new(&path)));
        }
        Ok(dirs::home_dir()
            .ok_or(ConfigError::NoHomeDir)?
            .join(".config")
            .join("porter")
            .join("config.toml"))
    }

    pub fn load(explicit: Option<&Path>) -> ConfigResult<Self> {
        Self::load_from(&Self::resolve_path(explicit)?)
    }

    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let config = match fs::read_to_string(path) {
            Ok(raw) => toml::from_str::<Self>(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found; using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        config.finish()
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        toml::from_str::<Self>(raw)
            .map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?
            .finish()
    }

    fn finish(mut self) -> ConfigResult<Self> {
        self.expand_paths();
        self.validate()?;
        Ok(self)
    }

    fn expand_paths(&mut self) {
        self.daemon.socket_path = expand_tilde(&self.daemon.socket_path);
        self.daemon.database_path = expand_tilde(&self.daemon.database_path);
        self.auto_file.destination_root = expand_tilde(&self.auto_file.destination_root);
        for category in &mut self.auto_file.categories {
            category.path = expand_tilde(&category.path);
        }
        if let Some(destination) = self.screenshots.destination.take() {
            self.screenshots.destination =
                Some(expand_tilde(&destination)).filter(|path| !path.as_os_str().is_empty());
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.queue.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.queue.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue.buffer_capacity must be at least 1".to_string(),
            ));
        }
        if let Some(category) = self.auto_file.categories.iter().find(|c| c.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "auto_file category with path '{}' has no name",
                category.path.display()
            )));
        }
        Ok(())
    }
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(raw) = path.to_str() else {
        return path.to_path_buf();
    };
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| path.to_path_buf());
    }
    match (raw.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
