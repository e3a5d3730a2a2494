//! Node configuration.
//!
//! Merge precedence, lowest to highest: built-in defaults, TOML config file,
//! environment variables, CLI flags. Secrets come from the environment in
//! production; the file form exists for local development.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub auth: FileAuthConfig,
    #[serde(default)]
    pub sync: FileSyncConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRedisConfig {
    pub url: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileAuthConfig {
    pub jwt_secret: Option<String>,
    pub guest_validator_url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileSyncConfig {
    pub presence_ttl_secs: Option<u64>,
    pub room_lock_ttl_secs: Option<u64>,
    pub handoff_timeout_secs: Option<u64>,
    pub sweeper_interval_secs: Option<u64>,
    pub room_grace_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileCorsConfig {
    pub allowed_origins: Option<Vec<String>>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub redis_url: Option<String>,
    pub jwt_secret: Option<String>,
    pub guest_validator_url: Option<String>,
    pub presence_ttl_secs: Option<u64>,
    pub room_lock_ttl_secs: Option<u64>,
    pub handoff_timeout_secs: Option<u64>,
    pub sweeper_interval_secs: Option<u64>,
    pub room_grace_secs: Option<u64>,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            server_host: std::env::var("SERVER_HOST").ok(),
            server_port: parse_var("SERVER_PORT"),
            redis_url: std::env::var("REDIS_URL").ok(),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
            guest_validator_url: std::env::var("GUEST_VALIDATOR_URL").ok(),
            presence_ttl_secs: parse_var("PRESENCE_TTL_SECS"),
            room_lock_ttl_secs: parse_var("ROOM_LOCK_TTL_SECS"),
            handoff_timeout_secs: parse_var("HANDOFF_TIMEOUT_SECS"),
            sweeper_interval_secs: parse_var("SWEEPER_INTERVAL_SECS"),
            room_grace_secs: parse_var("ROOM_GRACE_SECS"),
            cors_allowed_origins: parse_csv_var("CORS_ALLOWED_ORIGINS"),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.parse().ok())
}

fn parse_csv_var(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|raw| {
        raw.split(',')
            .filter_map(|part| {
                let trimmed = part.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect()
    })
}

/// CLI overrides (highest precedence).
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Fully resolved node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub redis_url: String,
    pub jwt_secret: String,
    pub guest_validator_url: String,
    pub presence_ttl: Duration,
    pub room_lock_ttl: Duration,
    pub handoff_timeout: Duration,
    pub sweeper_interval: Duration,
    pub room_grace: Duration,
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Merge defaults, file, environment, and CLI into the final config.
    pub fn resolve(file: FileConfig, env: EnvConfig, cli: &CliOverrides) -> Result<Self> {
        let redis_url = env
            .redis_url
            .or(file.redis.map(|redis| redis.url))
            .context("REDIS_URL (or [redis].url) is required")?;
        let jwt_secret = env
            .jwt_secret
            .or(file.auth.jwt_secret)
            .context("JWT_SECRET (or [auth].jwt_secret) is required")?;
        if jwt_secret.is_empty() {
            bail!("JWT_SECRET must not be empty");
        }
        let guest_validator_url = env
            .guest_validator_url
            .or(file.auth.guest_validator_url)
            .context("GUEST_VALIDATOR_URL (or [auth].guest_validator_url) is required")?;

        Ok(Self {
            server_host: cli
                .host
                .clone()
                .or(env.server_host)
                .or(file.server.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: cli
                .port
                .or(env.server_port)
                .or(file.server.port)
                .unwrap_or(8090),
            redis_url,
            jwt_secret,
            guest_validator_url,
            presence_ttl: seconds(
                env.presence_ttl_secs.or(file.sync.presence_ttl_secs),
                60,
            ),
            room_lock_ttl: seconds(
                env.room_lock_ttl_secs.or(file.sync.room_lock_ttl_secs),
                5,
            ),
            handoff_timeout: seconds(
                env.handoff_timeout_secs.or(file.sync.handoff_timeout_secs),
                10,
            ),
            sweeper_interval: seconds(
                env.sweeper_interval_secs
                    .or(file.sync.sweeper_interval_secs),
                30,
            ),
            room_grace: seconds(env.room_grace_secs.or(file.sync.room_grace_secs), 300),
            cors_allowed_origins: env
                .cors_allowed_origins
                .or(file.cors.allowed_origins)
                .unwrap_or_default(),
        })
    }

    pub fn load(cli: &CliOverrides) -> Result<Self> {
        let file = match &cli.config_path {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, EnvConfig::gather(), cli)
    }
}

fn seconds(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}
