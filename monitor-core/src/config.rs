use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Directory holding the optional `default` and `{RUN_MODE}` config files.
pub const CONFIG_DIR: &str = "config";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration: i64,
}

/// Knobs of the check engine and the event fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksConfig {
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub ping_retry_delay_ms: u64,
    pub event_buffer: usize,
}

impl ChecksConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn ping_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ping_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub checks: ChecksConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Configuration built from defaults only, ignoring the environment.
    pub fn defaults() -> Result<Self, config::ConfigError> {
        Self::builder()?.build()?.try_deserialize()
    }

    /// Defaults, then `config/default.*`, then `config/{RUN_MODE}.*`, then
    /// `MONITOR__*` variables and the legacy overrides below.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());
        let mut cfg = Self::with_files(Self::builder()?, Path::new(CONFIG_DIR), &run_mode)
            .add_source(config::Environment::with_prefix("MONITOR").separator("__"));

        if let Ok(username) = env::var("DATABASE_USERNAME") {
            cfg = cfg.set_override("database.username", username)?;
        }
        if let Ok(password) = env::var("DATABASE_PASSWORD") {
            cfg = cfg.set_override("database.password", password)?;
        }
        if let Ok(database) = env::var("DATABASE_NAME") {
            cfg = cfg.set_override("database.database", database)?;
        }
        if let Ok(secret) = env::var("JWT_SECRET") {
            cfg = cfg.set_override("auth.jwt_secret", secret)?;
        }
        if let Ok(port) = env::var("PORT") {
            cfg = cfg.set_override("server.port", port.parse::<u16>().unwrap_or(8080))?;
        }

        cfg.build()?.try_deserialize()
    }

    fn with_files(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        dir: &Path,
        run_mode: &str,
    ) -> config::ConfigBuilder<config::builder::DefaultState> {
        builder
            .add_source(config::File::from(dir.join("default")).required(false))
            .add_source(config::File::from(dir.join(run_mode)).required(false))
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError>
    {
        config::Config::builder()
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("database.username", "monitor")?
            .set_default("database.password", "password")?
            .set_default("database.database", "monitor")?
            .set_default("database.max_connections", 10)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("auth.jwt_secret", "your-secret-key")?
            .set_default("auth.jwt_expiration", 86400)?
            .set_default("checks.http_timeout_secs", 10)?
            .set_default(
                "checks.user_agent",
                concat!("monitor/", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("checks.ping_retry_delay_ms", 1000)?
            .set_default("checks.event_buffer", 100)?
            .set_default("storage.backend", "memory")
    }
}
