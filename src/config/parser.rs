use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::media::DEFAULT_MAX_UPLOAD_BYTES;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub tenor: TenorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub min_connections: Option<u32>,
    #[serde(default = "default_db_timeout_secs")]
    pub timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn db_type(&self) -> DbType {
        let url = self.connection_string();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DbType::Postgres
        } else {
            DbType::Sqlite
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> Option<String> {
        if let DbType::Sqlite = self.db_type() {
            let url = self.connection_string();
            Some(url.strip_prefix("sqlite://").unwrap_or(&url).to_string())
        } else {
            None
        }
    }

    pub fn max_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.max_connections,
            DbType::Sqlite => Some(1),
        }
    }

    pub fn min_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.min_connections,
            DbType::Sqlite => Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TenorConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_tenor_base_url")]
    pub base_url: String,
}

impl Default for TenorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_tenor_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_guild_ttl_secs")]
    pub guild_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            guild_ttl_secs: default_guild_ttl_secs(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_env_overrides();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.bot_token.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "auth.bot_token cannot be empty".to_string(),
            ));
        }
        if looks_like_placeholder_bot_token(&self.auth.bot_token) {
            return Err(ConfigError::InvalidConfig(
                "auth.bot_token is still using a placeholder value; set a real Discord bot token"
                    .to_string(),
            ));
        }

        if self.database.connection_string().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database connection string cannot be empty".to_string(),
            ));
        }

        if self.database.timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "database.timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.media.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "media.max_upload_bytes must be greater than zero".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::InvalidConfig(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }

        if url::Url::parse(&self.tenor.base_url).is_err() {
            return Err(ConfigError::InvalidConfig(format!(
                "tenor.base_url is not a valid URL: {}",
                self.tenor.base_url
            )));
        }

        Ok(())
    }

    fn normalize(&mut self) {
        self.auth.bot_token = sanitize_bot_token(&self.auth.bot_token);
        self.tenor.api_key = self
            .tenor
            .api_key
            .take()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("STARBOARD_AUTH_BOT_TOKEN") {
            self.auth.bot_token = value;
        }
        if let Ok(value) = std::env::var("STARBOARD_TENOR_API_KEY") {
            self.tenor.api_key = Some(value);
        }
        if let Ok(value) = std::env::var("STARBOARD_DATABASE_URL") {
            self.database.url = Some(value);
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_db_timeout_secs() -> u64 {
    60
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_tenor_base_url() -> String {
    "https://tenor.googleapis.com/v2".to_string()
}

fn default_guild_ttl_secs() -> u64 {
    900
}

fn sanitize_bot_token(token: &str) -> String {
    let trimmed = token.trim();
    let without_prefix = trimmed
        .strip_prefix("Bot ")
        .or_else(|| trimmed.strip_prefix("bot "))
        .unwrap_or(trimmed);
    without_prefix.trim().to_string()
}

fn looks_like_placeholder_bot_token(token: &str) -> bool {
    let lower = token.trim().to_ascii_lowercase();
    lower == "your_discord_bot_token"
        || lower == "your_bot_token_here"
        || lower == "your_bot_token"
        || lower == "your-token-here"
        || lower == "changeme"
}
