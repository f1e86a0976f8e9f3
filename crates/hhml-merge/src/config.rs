//! Configuration management

use serde::{Deserialize, Serialize};

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/hhml";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Ingestion Configuration Constants
// ============================================================================

/// Provider recorded in the ledger when none is given.
pub const DEFAULT_PROVIDER: &str = "equibase";

/// Files staged at once.
pub const DEFAULT_STAGE_CONCURRENCY: usize = 4;

/// Merge transactions in flight at once.
pub const DEFAULT_MERGE_CONCURRENCY: usize = 2;

/// Retries for a merge that lost a uniqueness race.
pub const DEFAULT_MERGE_MAX_RETRIES: u32 = 3;

/// Base delay between merge retries; attempt `n` waits `n * backoff`.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;

/// Parser output sits next to the provider file: `<file>.rows.jsonl`.
pub const DEFAULT_ROWS_EXTENSION: &str = "rows.jsonl";

/// Merge service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ingest: IngestSettings,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Batch ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    pub provider: String,
    pub stage_concurrency: usize,
    pub merge_concurrency: usize,
    pub merge_max_retries: u32,
    pub retry_backoff_ms: u64,
    pub rows_extension: String,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            ingest: IngestSettings {
                provider: std::env::var("INGEST_PROVIDER")
                    .unwrap_or_else(|_| DEFAULT_PROVIDER.to_string()),
                stage_concurrency: env_or("INGEST_STAGE_CONCURRENCY", DEFAULT_STAGE_CONCURRENCY),
                merge_concurrency: env_or("INGEST_MERGE_CONCURRENCY", DEFAULT_MERGE_CONCURRENCY),
                merge_max_retries: env_or("INGEST_MERGE_MAX_RETRIES", DEFAULT_MERGE_MAX_RETRIES),
                retry_backoff_ms: env_or("INGEST_RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS),
                rows_extension: std::env::var("INGEST_ROWS_EXTENSION")
                    .unwrap_or_else(|_| DEFAULT_ROWS_EXTENSION.to_string()),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        self.ingest.validate()
    }
}

impl IngestSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.provider.trim().is_empty() {
            anyhow::bail!("Ingest provider cannot be empty");
        }

        if self.stage_concurrency == 0 || self.merge_concurrency == 0 {
            anyhow::bail!("Ingest concurrency limits must be greater than 0");
        }

        if self.rows_extension.trim_matches('.').is_empty() {
            anyhow::bail!("Ingest rows extension cannot be empty");
        }

        if self.merge_concurrency > self.stage_concurrency {
            tracing::warn!(
                merge_concurrency = self.merge_concurrency,
                stage_concurrency = self.stage_concurrency,
                "More merge slots than staging slots; merges will idle"
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            ingest: IngestSettings::default(),
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            stage_concurrency: DEFAULT_STAGE_CONCURRENCY,
            merge_concurrency: DEFAULT_MERGE_CONCURRENCY,
            merge_max_retries: DEFAULT_MERGE_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            rows_extension: DEFAULT_ROWS_EXTENSION.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ingest.provider, "equibase");
        assert_eq!(config.ingest.rows_extension, "rows.jsonl");
    }

    #[test]
    fn test_pool_bounds_validated() {
        let mut config = Config::default();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let settings = IngestSettings {
            merge_concurrency: 0,
            ..IngestSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
