//! Configuration loader and validator for the studio tracker.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub backend: Backend,
    #[serde(default)]
    pub rest: Option<Rest>,
    pub storage: Storage,
    #[serde(default)]
    pub board: Board,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Sqlite,
    Rest,
}

/// Which gateway to talk to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub kind: BackendKind,
    /// Overrides the default `<data_dir>/claybook.db` for the sqlite backend.
    /// `DATABASE_URL` takes precedence over this.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Hosted backend endpoint and key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rest {
    pub url: String,
    pub api_key: String,
}

/// Object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Storage {
    pub bucket: String,
    #[serde(default)]
    pub public_base_url: Option<String>,
}

/// Stage board presentation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Board {
    pub include_empty_groups: bool,
}

impl Default for Board {
    fn default() -> Self {
        Self {
            include_empty_groups: true,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.storage.bucket.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.bucket must be non-empty"));
    }

    if cfg.backend.kind == BackendKind::Rest {
        let Some(rest) = cfg.rest.as_ref() else {
            return Err(ConfigError::Invalid(
                "rest section is required when backend.kind is rest",
            ));
        };
        if rest.url.trim().is_empty() {
            return Err(ConfigError::Invalid("rest.url must be non-empty"));
        }
        if reqwest::Url::parse(rest.url.trim()).is_err() {
            return Err(ConfigError::Invalid("rest.url must be an absolute URL"));
        }
        if rest.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("rest.api_key must be non-empty"));
        }
    }

    Ok(())
}

/// Returns the example YAML shipped with the tool.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

backend:
  kind: sqlite

rest:
  url: "https://YOUR_PROJECT.supabase.co"
  api_key: "YOUR_ANON_KEY"

storage:
  bucket: "piece-photos"

board:
  include_empty_groups: true
"#
}
