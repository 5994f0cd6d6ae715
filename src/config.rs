use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::queue::RetryPosition;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_key: default_api_key(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_api_key() -> String {
    "test-api-key".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_throttle_backoff_ms")]
    pub throttle_backoff_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub retry_position: RetryPosition,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            window_secs: default_window_secs(),
            throttle_backoff_ms: default_throttle_backoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_position: RetryPosition::default(),
        }
    }
}

fn default_requests_per_minute() -> usize {
    60
}
fn default_window_secs() -> u64 {
    60
}
fn default_throttle_backoff_ms() -> u64 {
    5_000
}
fn default_poll_interval_ms() -> u64 {
    100
}

impl QueueConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn throttle_backoff(&self) -> Duration {
        Duration::from_millis(self.throttle_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
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

/// Read and validate a TOML config file, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    finish(config, |key| std::env::var(key).ok())
}

/// Defaults plus environment overrides, for running without a config file.
pub fn default_config() -> Result<Config> {
    finish(Config::default(), |key| std::env::var(key).ok())
}

fn finish(mut config: Config, env: impl Fn(&str) -> Option<String>) -> Result<Config> {
    apply_env(&mut config, env)?;
    validate(&config)?;
    Ok(config)
}

/// `CTXQ_BIND` replaces the bind address, `PORT` then replaces only the
/// port, `MCP_API_KEY` replaces the shared secret.
fn apply_env(config: &mut Config, env: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(bind) = env("CTXQ_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = env("PORT") {
        let port: u16 = port
            .parse()
            .with_context(|| format!("PORT must be a port number, got '{}'", port))?;
        let host = config
            .server
            .bind
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.server.bind = format!("{}:{}", host, port);
    }
    if let Some(key) = env("MCP_API_KEY") {
        config.server.api_key = key;
    }
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.server.api_key.is_empty() {
        anyhow::bail!("server.api_key must not be empty");
    }

    if config.queue.requests_per_minute == 0 {
        anyhow::bail!("queue.requests_per_minute must be > 0");
    }

    if config.queue.window_secs == 0 {
        anyhow::bail!("queue.window_secs must be > 0");
    }

    if config.queue.throttle_backoff_ms == 0 {
        anyhow::bail!("queue.throttle_backoff_ms must be > 0");
    }

    if config.queue.poll_interval_ms == 0 {
        anyhow::bail!("queue.poll_interval_ms must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = finish(Config::default(), env_from(&[])).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:8000");
        assert_eq!(cfg.server.api_key, "test-api-key");
        assert_eq!(cfg.queue.requests_per_minute, 60);
        assert_eq!(cfg.queue.throttle_backoff(), Duration::from_secs(5));
        assert_eq!(cfg.queue.poll_interval(), Duration::from_millis(100));
        assert_eq!(cfg.queue.retry_position, RetryPosition::Back);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctxq.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "127.0.0.1:9000"

[queue]
requests_per_minute = 5
retry_position = "front"
"#,
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.queue.requests_per_minute, 5);
        assert_eq!(cfg.queue.retry_position, RetryPosition::Front);
        assert_eq!(cfg.queue.window_secs, 60);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_env_overrides() {
        let cfg = finish(
            Config::default(),
            env_from(&[("PORT", "9100"), ("MCP_API_KEY", "s3cret")]),
        )
        .unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9100");
        assert_eq!(cfg.server.api_key, "s3cret");

        let cfg = finish(
            Config::default(),
            env_from(&[("CTXQ_BIND", "127.0.0.1:1"), ("PORT", "2")]),
        )
        .unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:2");
    }

    #[test]
    fn test_invalid_port() {
        let err = finish(Config::default(), env_from(&[("PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_validation() {
        let mut cfg = Config::default();
        cfg.queue.requests_per_minute = 0;
        assert!(finish(cfg, env_from(&[])).is_err());

        let mut cfg = Config::default();
        cfg.queue.throttle_backoff_ms = 0;
        let err = finish(cfg, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains("throttle_backoff_ms"));

        let mut cfg = Config::default();
        cfg.server.api_key.clear();
        let err = finish(cfg, env_from(&[])).unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }
}
