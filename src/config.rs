//! Configuration loading and validation.
//!
//! All settings live in a single `config.toml`; credentials never do.
//! The LLM key and the third-party API token are read from the
//! environment variables the config names, so a checked-in config file
//! stays secret-free.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// LLM gateway settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Session store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Third-party capability credentials.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Background janitor settings.
    #[serde(default)]
    pub janitor: JanitorConfig,
}

/// LLM gateway settings.
#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible endpoint base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    /// Model identifier.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Global bound on in-flight completions.
    #[serde(default = "default_llm_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-call timeout in seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_env: default_llm_api_key_env(),
            model: default_llm_model(),
            max_concurrency: default_llm_max_concurrency(),
            call_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// Session store settings.
#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    /// Data directory root. Defaults to the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// The resolved data root: configured value, else the platform
    /// project data directory, else `./data`.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "maestro", "maestro")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    /// Where rotated log files go.
    pub fn logs_dir(&self) -> PathBuf {
        self.resolved_data_dir().join("logs")
    }
}

/// Capability client credentials.
#[derive(Debug, Deserialize)]
pub struct ProvidersConfig {
    /// Environment variable holding the opaque third-party API token
    /// shared by the mail/calendar/docs clients.
    #[serde(default = "default_provider_token_env")]
    pub token_env: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            token_env: default_provider_token_env(),
        }
    }
}

impl ProvidersConfig {
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }
}

/// Background janitor settings.
#[derive(Debug, Deserialize)]
pub struct JanitorConfig {
    /// Seconds between approval-expiry sweeps.
    #[serde(default = "default_approval_sweep_secs")]
    pub approval_sweep_secs: u64,

    /// Seconds between draft-retention sweeps.
    #[serde(default = "default_retention_sweep_secs")]
    pub retention_sweep_secs: u64,

    /// Terminal drafts older than this many days are deleted.
    #[serde(default = "default_draft_retention_days")]
    pub draft_retention_days: i64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            approval_sweep_secs: default_approval_sweep_secs(),
            retention_sweep_secs: default_retention_sweep_secs(),
            draft_retention_days: default_draft_retention_days(),
        }
    }
}

impl JanitorConfig {
    pub fn approval_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.approval_sweep_secs)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_secs)
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com".to_owned()
}

fn default_llm_api_key_env() -> String {
    "MAESTRO_LLM_API_KEY".to_owned()
}

fn default_llm_model() -> String {
    "gpt-4o".to_owned()
}

fn default_llm_max_concurrency() -> usize {
    4
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_provider_token_env() -> String {
    "MAESTRO_GOOGLE_TOKEN".to_owned()
}

fn default_approval_sweep_secs() -> u64 {
    60
}

fn default_retention_sweep_secs() -> u64 {
    24 * 60 * 60
}

fn default_draft_retention_days() -> i64 {
    30
}

impl Config {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.llm.base_url)
            .map_err(|e| ConfigError::Invalid(format!("llm.base_url: {e}")))?;
        if self.llm.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "llm.max_concurrency must be at least 1".to_owned(),
            ));
        }
        if self.janitor.draft_retention_days <= 0 {
            return Err(ConfigError::Invalid(
                "janitor.draft_retention_days must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.llm.base_url, "https://api.openai.com");
        assert_eq!(config.llm.max_concurrency, 4);
        assert_eq!(config.llm.call_timeout(), Duration::from_secs(60));
        assert_eq!(config.janitor.draft_retention_days, 30);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/config.toml")).expect("defaults");
        assert_eq!(config.llm.model, "gpt-4o");
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[llm]\nmodel = \"gpt-4o-mini\"\n\n[janitor]\ndraft_retention_days = 7\n",
        )
        .expect("write");

        let config = Config::load(&path).expect("load");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.base_url, "https://api.openai.com", "default kept");
        assert_eq!(config.janitor.draft_retention_days, 7);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm]\nbase_url = \"not a url\"\n").expect("write");
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm]\nmax_concurrency = 0\n").expect("write");
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_resolved_data_dir_prefers_configured() {
        let store = StoreConfig {
            data_dir: Some(PathBuf::from("/tmp/maestro-data")),
        };
        assert_eq!(store.resolved_data_dir(), PathBuf::from("/tmp/maestro-data"));
    }
}
