use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use idmapper_core::{MapperError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "idmapper.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub resolver: ResolverConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Endpoint of the identifier-history authority; resolution is disabled when unset
    pub base_url: Option<String>,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub batch_timeout_secs: u64,
    pub concurrency: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            batch_size: 100,
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            batch_timeout_secs: 30,
            concurrency: 4,
        }
    }
}

impl ResolverConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_resolution_passes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_resolution_passes: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            file_name: "idmapper.log".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, falling back to defaults when the file does not exist,
    /// then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                MapperError::config(format!("Failed to read config file '{}': {}", path.display(), e))
            })?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MapperError::config(format!("Invalid configuration: {}", e)))
    }

    /// Overlay values from the environment. `lookup` is injected so tests need not touch process state.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("IDMAPPER_AUTHORITY_URL") {
            self.resolver.base_url = Some(url);
        }
        if let Some(value) = lookup("IDMAPPER_BATCH_SIZE") {
            self.resolver.batch_size = parse_env("IDMAPPER_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("IDMAPPER_MAX_ATTEMPTS") {
            self.resolver.max_attempts = parse_env("IDMAPPER_MAX_ATTEMPTS", &value)?;
        }
        if let Some(dir) = lookup("IDMAPPER_LOG_DIR") {
            self.logging.directory = dir;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolver.batch_size == 0 {
            return Err(MapperError::config("resolver.batch_size must be greater than zero"));
        }
        if self.resolver.max_attempts == 0 {
            return Err(MapperError::config("resolver.max_attempts must be at least 1"));
        }
        if self.resolver.concurrency == 0 {
            return Err(MapperError::config("resolver.concurrency must be greater than zero"));
        }
        if self.engine.max_resolution_passes == 0 {
            return Err(MapperError::config("engine.max_resolution_passes must be at least 1"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MapperError::config(format!("{} has invalid value '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [resolver]
            base_url = "https://authority.example.org/resolve"
            batch_size = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.resolver.base_url.as_deref(), Some("https://authority.example.org/resolve"));
        assert_eq!(config.resolver.batch_size, 25);
        assert_eq!(config.resolver.max_attempts, 3);
        assert_eq!(config.engine.max_resolution_passes, 10);
        assert_eq!(config.logging.directory, "logs");
    }

    #[test]
    fn test_env_overrides_win() {
        let env: HashMap<&str, &str> = [("IDMAPPER_BATCH_SIZE", "7"), ("IDMAPPER_AUTHORITY_URL", "http://localhost:9000")]
            .into_iter()
            .collect();
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.resolver.batch_size, 7);
        assert_eq!(config.resolver.base_url.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_invalid_env_value_is_configuration_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(|key| (key == "IDMAPPER_MAX_ATTEMPTS").then(|| "many".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), idmapper_core::ErrorKind::Configuration);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = AppConfig::default();
        config.resolver.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.resolver.concurrency, 4);
    }
}
