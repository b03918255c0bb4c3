//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use refetch_core::SinkFormat;
use refetch_core::pipeline::{DEFAULT_COMPRESSION_LEVEL, DEFAULT_LOCAL_BATCH, DEFAULT_REMOTE_BATCH};
use serde::Deserialize;

/// Global configuration for refetch
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub batch: BatchConfig,
    pub reddit: RedditConfig,
    pub http: HttpSection,
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root holding `data/` and `log/`
    pub base_dir: PathBuf,
    /// `zstd`, `gzip` or `plain`
    pub format: String,
    pub compression_level: i32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            format: "zstd".to_string(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl OutputConfig {
    pub fn sink_format(&self) -> Result<SinkFormat> {
        SinkFormat::from_name(&self.format)
            .with_context(|| format!("unknown output format {:?}", self.format))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub local: usize,
    pub remote: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            local: DEFAULT_LOCAL_BATCH,
            remote: DEFAULT_REMOTE_BATCH,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    #[serde(deserialize_with = "deserialize_env_path")]
    pub auth_file: PathBuf,
    /// Overrides the credential file's user agent
    #[serde(deserialize_with = "deserialize_env_var")]
    pub user_agent: Option<String>,
    pub auth_url: String,
    pub api_url: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        let endpoints = refetch_reddit::Endpoints::default();
        Self {
            auth_file: PathBuf::from("auth/AUTH.json"),
            user_agent: None,
            auth_url: endpoints.auth_url,
            api_url: endpoints.api_url,
        }
    }
}

impl RedditConfig {
    pub fn endpoints(&self) -> refetch_reddit::Endpoints {
        refetch_reddit::Endpoints {
            auth_url: self.auth_url.clone(),
            api_url: self.api_url.clone(),
        }
    }
}

/// `[http]` section, seconds on disk
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub read_timeout: u64,
    pub connect_timeout: u64,
    pub max_retries: u32,
}

impl Default for HttpSection {
    fn default() -> Self {
        let d = refetch_core::HttpConfig::default();
        Self {
            read_timeout: d.read_timeout.as_secs(),
            connect_timeout: d.connect_timeout.as_secs(),
            max_retries: d.max_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub default: usize,
    pub max: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        // Each worker holds its own API session; Reddit rate limits per account
        Self { default: 1, max: 8 }
    }
}

impl WorkersConfig {
    /// Requested worker count clamped to `1..=max`
    pub fn resolve(&self, requested: Option<usize>) -> usize {
        let n = requested.unwrap_or(self.default);
        if n > self.max {
            log::warn!("{n} workers requested, capped at {}", self.max);
        }
        n.clamp(1, self.max.max(1))
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

fn deserialize_env_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    expand_env_var(&s)
        .map(PathBuf::from)
        .ok_or_else(|| serde::de::Error::custom(format!("environment variable in {s} is not set")))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./refetch.toml (current directory)
    /// 2. ~/.config/refetch/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("refetch.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "refetch") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn http_config(&self) -> refetch_core::HttpConfig {
        refetch_core::HttpConfig {
            read_timeout: std::time::Duration::from_secs(self.http.read_timeout),
            connect_timeout: std::time::Duration::from_secs(self.http.connect_timeout),
            max_retries: self.http.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.output.base_dir, PathBuf::from("."));
        assert_eq!(config.output.sink_format().unwrap(), SinkFormat::Zstd);
        assert_eq!(config.batch.local, 1000);
        assert_eq!(config.batch.remote, 100);
        assert_eq!(config.reddit.auth_file, PathBuf::from("auth/AUTH.json"));
        assert_eq!(config.workers.default, 1);
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("REFETCH_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${REFETCH_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("REFETCH_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[output]
base_dir = "/srv/reddit"
format = "gzip"
compression_level = 6

[batch]
local = 500
remote = 50

[reddit]
auth_file = "/etc/refetch/AUTH.json"
user_agent = "archiver/2.0"

[http]
read_timeout = 60
max_retries = 3

[workers]
default = 4
max = 8
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.output.base_dir, PathBuf::from("/srv/reddit"));
        assert_eq!(config.output.sink_format().unwrap(), SinkFormat::Gzip);
        assert_eq!(config.batch.local, 500);
        assert_eq!(config.batch.remote, 50);
        assert_eq!(config.reddit.user_agent.as_deref(), Some("archiver/2.0"));
        assert_eq!(config.reddit.api_url, "https://oauth.reddit.com");
        assert_eq!(config.http.read_timeout, 60);
        assert_eq!(config.http.connect_timeout, 30);
        assert_eq!(config.workers.resolve(None), 4);
        assert_eq!(config.workers.resolve(Some(32)), 8);
        assert_eq!(config.workers.resolve(Some(0)), 1);
    }

    #[test]
    fn unknown_format_is_error() {
        let config: Config = toml::from_str("[output]\nformat = \"bz2\"").unwrap();
        assert!(config.output.sink_format().is_err());
    }

    #[test]
    fn auth_file_env_expansion() {
        std::env::set_var("REFETCH_TEST_AUTH", "/run/secrets/auth.json");
        let config: Config = toml::from_str("[reddit]\nauth_file = \"${REFETCH_TEST_AUTH}\"").unwrap();
        assert_eq!(config.reddit.auth_file, PathBuf::from("/run/secrets/auth.json"));
        std::env::remove_var("REFETCH_TEST_AUTH");
    }
}
