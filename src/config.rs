use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::infrastructure::bus::DEFAULT_BUS_HISTORY;
use crate::infrastructure::cache_layer::{CacheSettings, SOCIAL_GRAPH_NAMESPACE};
use crate::infrastructure::security::JwtSettings;
use crate::services::recommendation::RecommendationSettings;

pub const SOCIAL_GRAPH_DEFAULT_ADDRESS: &str = ":8091";
pub const FEED_DEFAULT_ADDRESS: &str = ":8092";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Development" => Ok(Environment::Development),
            "Production" => Ok(Environment::Production),
            other => Err(AppError::Configuration(format!(
                "ENVIRONMENT must be Development or Production, got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("Development"),
            Environment::Production => f.write_str("Production"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listening_address: String,
    pub environment: Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
    pub scan_batch: usize,
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            namespace: SOCIAL_GRAPH_NAMESPACE.to_string(),
            ttl: Duration::from_secs(self.ttl_secs),
            scan_batch: self.scan_batch,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub min_likes: u64,
    pub page_size: usize,
    pub max_page_size: usize,
}

impl FeedConfig {
    pub fn settings(&self) -> RecommendationSettings {
        RecommendationSettings {
            default_min_likes: self.min_likes,
            default_page_size: self.page_size,
            max_page_size: self.max_page_size,
        }
    }
}

/// Retention of the in-process broker's inspection records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub history: usize,
}

/// Plain settings read straight from the environment. Secrets are loaded
/// separately through a [`SecretProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub feed: FeedConfig,
    pub bus: BusConfig,
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> AppResult<T> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Configuration(format!("{} is not a valid value: {}", name, raw))),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env(default_address: &str) -> AppResult<Self> {
        Self::from_lookup(default_address, |name| env::var(name).ok())
    }

    pub fn from_lookup(
        default_address: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> AppResult<Self> {
        let environment = match lookup("ENVIRONMENT") {
            Some(raw) => raw.trim().parse()?,
            None => Environment::Development,
        };

        Ok(Self {
            server: ServerConfig {
                listening_address: lookup("LISTENING_ADDRESS")
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| default_address.to_string()),
                environment,
            },
            cache: CacheConfig {
                capacity: parse_or(&lookup, "CACHE_CAPACITY", 10_000)?,
                ttl_secs: parse_or(&lookup, "CACHE_TTL_SECS", 300)?,
                scan_batch: parse_or(&lookup, "CACHE_SCAN_BATCH", 100)?,
            },
            feed: FeedConfig {
                min_likes: parse_or(&lookup, "FEED_MIN_LIKES", 10)?,
                page_size: parse_or(&lookup, "FEED_PAGE_SIZE", 10)?,
                max_page_size: parse_or(&lookup, "FEED_MAX_PAGE_SIZE", 100)?,
            },
            bus: BusConfig {
                history: parse_or(&lookup, "BUS_HISTORY", DEFAULT_BUS_HISTORY)?,
            },
        })
    }

    /// Socket address to bind; a leading `:` means all interfaces
    pub fn server_address(&self) -> String {
        let address = self.server.listening_address.trim();
        if address.starts_with(':') {
            format!("0.0.0.0{}", address)
        } else {
            address.to_string()
        }
    }
}

/// Source of credentials and connection strings
#[async_trait]
pub trait SecretProvider: Send + Sync + fmt::Debug {
    async fn get_secret(&self, name: &str) -> AppResult<String>;
}

/// Reads `SECRET_<NAME>` environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvSecretProvider;

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn get_secret(&self, name: &str) -> AppResult<String> {
        let var = format!("SECRET_{}", name);
        env::var(&var)
            .ok()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::Configuration(format!("missing secret {}", var)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticSecretProvider {
    secrets: HashMap<String, String>,
}

impl StaticSecretProvider {
    pub fn new<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            secrets: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn get_secret(&self, name: &str) -> AppResult<String> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::Configuration(format!("missing secret {}", name)))
    }
}

#[derive(Clone)]
pub struct Secrets {
    pub database_url: String,
    pub bus_url: String,
    pub cache_url: String,
    pub jwt: JwtSettings,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("database_url", &"<redacted>")
            .field("bus_url", &"<redacted>")
            .field("cache_url", &"<redacted>")
            .field("jwt", &self.jwt)
            .finish()
    }
}

impl Secrets {
    /// Every secret is required; the first missing one aborts startup
    pub async fn load(provider: &dyn SecretProvider) -> AppResult<Self> {
        Ok(Self {
            database_url: provider.get_secret("DATABASE_URL").await?,
            bus_url: provider.get_secret("BUS_URL").await?,
            cache_url: provider.get_secret("CACHE_URL").await?,
            jwt: JwtSettings {
                secret: provider.get_secret("JWT_SECRET").await?,
                issuer: provider.get_secret("JWT_ISSUER").await?,
                audience: provider.get_secret("JWT_AUDIENCE").await?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(FEED_DEFAULT_ADDRESS, lookup(&[])).unwrap();
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.server_address(), "0.0.0.0:8092");
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.feed.settings().default_min_likes, 10);
        assert_eq!(config.bus.history, DEFAULT_BUS_HISTORY);
    }

    #[test]
    fn test_rejects_unknown_environment() {
        let err = Config::from_lookup(
            SOCIAL_GRAPH_DEFAULT_ADDRESS,
            lookup(&[("ENVIRONMENT", "Staging")]),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_explicit_address_and_tunables() {
        let config = Config::from_lookup(
            SOCIAL_GRAPH_DEFAULT_ADDRESS,
            lookup(&[
                ("LISTENING_ADDRESS", "127.0.0.1:9000"),
                ("ENVIRONMENT", "Production"),
                ("CACHE_SCAN_BATCH", "25"),
                ("BUS_HISTORY", "64"),
            ]),
        )
        .unwrap();
        assert_eq!(config.server_address(), "127.0.0.1:9000");
        assert_eq!(config.cache.settings().scan_batch, 25);
        assert_eq!(config.bus.history, 64);
        assert!(Config::from_lookup(":1", lookup(&[("FEED_PAGE_SIZE", "ten")])).is_err());
    }

    #[tokio::test]
    async fn test_missing_secret_is_fatal() {
        let provider = StaticSecretProvider::new([("DATABASE_URL", "memory://")]);
        let err = Secrets::load(&provider).await.unwrap_err();
        assert!(err.to_string().contains("BUS_URL"));
    }
}
