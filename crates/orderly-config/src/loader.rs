//! Configuration loader with layered sources.

use crate::AppConfig;
use config::{Config, ConfigError, Environment, File};
use orderly_core::OrderlyError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Uncommitted local overrides
    /// 4. Environment variables with `ORDERLY__` prefix
    pub fn new(config_dir: impl Into<String>) -> Result<Self, OrderlyError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, OrderlyError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), OrderlyError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads configuration from the specified directory.
    fn load_config(config_dir: &str) -> Result<AppConfig, OrderlyError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment = std::env::var("ORDERLY_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        info!(environment = %environment, "Loading configuration");

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{}/{}.toml", config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ORDERLY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let app_config: AppConfig = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(config_error_to_orderly_error)?;

        validate_config(&app_config)?;

        Ok(app_config)
    }
}

/// Validates the configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), OrderlyError> {
    if config.database.url.is_empty() {
        return Err(OrderlyError::Configuration("Database URL is required".to_string()));
    }

    if config.database.max_connections == 0 {
        return Err(OrderlyError::Configuration(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if config.database.min_connections > config.database.max_connections {
        return Err(OrderlyError::Configuration(format!(
            "database.min_connections ({}) exceeds max_connections ({})",
            config.database.min_connections, config.database.max_connections
        )));
    }

    if config.redis.enabled && config.redis.url.is_empty() {
        return Err(OrderlyError::Configuration(
            "Redis URL is required when redis is enabled".to_string(),
        ));
    }

    if config.query.timeout_ms == 0 {
        return Err(OrderlyError::Configuration("query.timeout_ms must be greater than zero".to_string()));
    }

    if config.query.backoff_base_ms > config.query.backoff_max_ms {
        return Err(OrderlyError::Configuration(
            "query.backoff_base_ms must not exceed query.backoff_max_ms".to_string(),
        ));
    }

    if config.cache.namespace.is_empty() || config.cache.namespace.contains(['*', '?', '[']) {
        return Err(OrderlyError::Configuration(
            "cache.namespace must be non-empty and free of glob characters".to_string(),
        ));
    }

    if config.cache.local_ttl_cap_secs > config.cache.default_ttl_secs {
        warn!(
            local_ttl_cap_secs = config.cache.local_ttl_cap_secs,
            default_ttl_secs = config.cache.default_ttl_secs,
            "Local cache cap exceeds the default TTL; the TTL will bound local entries"
        );
    }

    Ok(())
}

fn config_error_to_orderly_error(err: ConfigError) -> OrderlyError {
    OrderlyError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.query.retries, 3);
        assert_eq!(config.query.timeout_ms, 10_000);
        assert_eq!(config.query.cache_ttl_secs, 300);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_inverted_pool_bounds() {
        let mut config = AppConfig::default();
        config.database.min_connections = 50;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("min_connections"));
    }

    #[test]
    fn test_rejects_glob_namespace() {
        let mut config = AppConfig::default();
        config.cache.namespace = "orderly:*".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_backoff_base_above_max() {
        let mut config = AppConfig::default();
        config.query.backoff_base_ms = 10_000;
        assert!(validate_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_loads_default_toml() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
[query]
retries = 5
timeout_ms = 2500

[cache]
namespace = "shops"
"#
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path().to_string_lossy()).unwrap();
        let config = loader.get().await;
        assert_eq!(config.query.retries, 5);
        assert_eq!(config.query.timeout_ms, 2500);
        assert_eq!(config.query.slow_query_threshold_ms, 1_000);
        assert_eq!(config.cache.namespace, "shops");
        assert_eq!(config.redis.pool_size, 10);
    }
}
