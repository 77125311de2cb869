use std::{env, fmt::Debug, path::{Path, PathBuf}, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
    choice::{DEFAULT_LABEL_WIDTH, MAX_LABEL_WIDTH},
    fieldset::RenamePolicy,
    locale::Locale,
};

pub const LINE_CHANNEL_ACCESS_TOKEN: &str = "LINE_CHANNEL_ACCESS_TOKEN";
pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const COLLECTOR_URL: &str = "COLLECTOR_URL";
pub const GEMINI_MODEL: &str = "GEMINI_MODEL";
pub const GEMINI_API_BASE: &str = "GEMINI_API_BASE";
pub const LINE_API_BASE: &str = "LINE_API_BASE";
pub const COLLECTOR_TIMEOUT_SECS: &str = "COLLECTOR_TIMEOUT_SECS";
pub const COLLECTOR_RETRIES: &str = "COLLECTOR_RETRIES";
pub const LABEL_WIDTH: &str = "LABEL_WIDTH";
pub const RENAME_COLLISION: &str = "RENAME_COLLISION";
pub const LOCALE: &str = "LOCALE";
pub const IMAGE_DIR: &str = "IMAGE_DIR";

const DEFAULT_COLLECTOR_TIMEOUT_SECS: u64 = 30;

/// Key/value configuration source.
#[async_trait]
pub trait ConfigManagerType: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Option<String>;
}

#[derive(Debug)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

/// Process environment, seeded from a `.env` file when one exists.
#[derive(Clone, Debug)]
pub struct EnvConfigManager;

impl EnvConfigManager {
    pub fn new(env_file: impl AsRef<Path>) -> Box<Self> {
        let env_file = env_file.as_ref();
        if env_file.exists() {
            match dotenvy::from_path(env_file) {
                Ok(()) => info!("Loaded .env from {}", env_file.display()),
                Err(e) => warn!("could not parse {}: {}", env_file.display(), e),
            }
        } else {
            info!("no .env at {}, using the process environment", env_file.display());
        }

        Box::new(Self)
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

/// In-memory configuration, used by tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Box<Self> {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Box::new(Self { map })
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required setting `{0}` is missing")]
    Missing(&'static str),

    #[error("setting `{key}` has an invalid value `{value}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the bot needs at start-up, resolved from a [`ConfigManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub line_access_token: String,
    pub line_api_base: Option<String>,
    pub gemini_api_key: String,
    pub gemini_model: Option<String>,
    pub gemini_api_base: Option<String>,
    pub collector_url: Url,
    pub collector_timeout: Duration,
    pub collector_retries: u32,
    pub label_width: usize,
    pub rename_policy: RenamePolicy,
    pub locale: Locale,
    pub image_dir: Option<PathBuf>,
}

impl BotConfig {
    pub async fn load(config: &ConfigManager) -> Result<Self, ConfigError> {
        let cfg = &*config.0;

        let collector_url = required(cfg, COLLECTOR_URL).await?;
        let collector_url = Url::parse(&collector_url).map_err(|e| ConfigError::Invalid {
            key: COLLECTOR_URL,
            value: collector_url.clone(),
            reason: e.to_string(),
        })?;

        let timeout_secs = parsed(cfg, COLLECTOR_TIMEOUT_SECS, DEFAULT_COLLECTOR_TIMEOUT_SECS).await?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: COLLECTOR_TIMEOUT_SECS,
                value: "0".into(),
                reason: "timeout must be at least one second".into(),
            });
        }

        let rename_policy = match optional(cfg, RENAME_COLLISION).await.as_deref() {
            None => RenamePolicy::default(),
            Some(v) if v.eq_ignore_ascii_case("reject") => RenamePolicy::Reject,
            Some(v) if v.eq_ignore_ascii_case("overwrite") => RenamePolicy::Overwrite,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: RENAME_COLLISION,
                    value: other.to_string(),
                    reason: "expected `reject` or `overwrite`".into(),
                });
            }
        };

        let locale = match optional(cfg, LOCALE).await {
            None => Locale::default(),
            Some(v) => v.parse().map_err(|reason| ConfigError::Invalid {
                key: LOCALE,
                value: v.clone(),
                reason,
            })?,
        };

        Ok(Self {
            line_access_token: required(cfg, LINE_CHANNEL_ACCESS_TOKEN).await?,
            line_api_base: optional(cfg, LINE_API_BASE).await,
            gemini_api_key: required(cfg, GEMINI_API_KEY).await?,
            gemini_model: optional(cfg, GEMINI_MODEL).await,
            gemini_api_base: optional(cfg, GEMINI_API_BASE).await,
            collector_url,
            collector_timeout: Duration::from_secs(timeout_secs),
            collector_retries: parsed(cfg, COLLECTOR_RETRIES, 0).await?,
            label_width: parsed(cfg, LABEL_WIDTH, DEFAULT_LABEL_WIDTH)
                .await?
                .clamp(1, MAX_LABEL_WIDTH),
            rename_policy,
            locale,
            image_dir: optional(cfg, IMAGE_DIR).await.map(PathBuf::from),
        })
    }
}

/// Non-blank value of `key`, trimmed.
async fn optional(cfg: &dyn ConfigManagerType, key: &str) -> Option<String> {
    cfg.get(key)
        .await
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn required(cfg: &dyn ConfigManagerType, key: &'static str) -> Result<String, ConfigError> {
    optional(cfg, key).await.ok_or(ConfigError::Missing(key))
}

async fn parsed<T>(cfg: &dyn ConfigManagerType, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(cfg, key).await {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: v.clone(),
            reason: e.to_string(),
        }),
    }
}
