//! Server configuration, read from the environment once at startup.

use std::path::PathBuf;
use std::time::Duration;

use keyward::logger::LogConfig;
use thiserror::Error;

/// Number of confirmed identity mismatches after which a license is blocked.
pub const DEFAULT_MISMATCH_THRESHOLD: i32 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Decision parameters handed to the verification engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub mismatch_threshold: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            mismatch_threshold: DEFAULT_MISMATCH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub port: u16,
    pub use_tls: bool,
    pub tls_cert: PathBuf,
    pub tls_key: PathBuf,
    /// Bearer token for the operator API. `None` disables those routes.
    pub admin_token: Option<String>,
    /// Upper bound for waiting on a pooled connection or the SQLite write lock.
    pub store_timeout: Duration,
    pub pool_size: u32,
    pub engine: EngineConfig,
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            database_url: "licenses.db".into(),
            bind_addr: "0.0.0.0".into(),
            port: 5200,
            use_tls: false,
            tls_cert: PathBuf::from("cert.pem"),
            tls_key: PathBuf::from("key.pem"),
            admin_token: None,
            store_timeout: Duration::from_millis(5000),
            pool_size: 4,
            engine: EngineConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any key/value source; missing keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ServerConfig::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(port) = lookup("PORT") {
            config.port = parse("PORT", "a port number", port)?;
        }
        config.use_tls = lookup("USE_TLS").is_some_and(|v| v == "true");
        if let Some(cert) = lookup("TLS_CERT") {
            config.tls_cert = PathBuf::from(cert);
        }
        if let Some(key) = lookup("TLS_KEY") {
            config.tls_key = PathBuf::from(key);
        }
        config.admin_token = lookup("ADMIN_TOKEN").filter(|t| !t.is_empty());
        if let Some(ms) = lookup("STORE_TIMEOUT_MS") {
            let ms: u64 = parse("STORE_TIMEOUT_MS", "a positive number of milliseconds", ms)?;
            if ms == 0 {
                return Err(invalid("STORE_TIMEOUT_MS", "a positive number of milliseconds", "0"));
            }
            config.store_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = lookup("DB_POOL_SIZE") {
            let size: u32 = parse("DB_POOL_SIZE", "a positive integer", size)?;
            if size == 0 {
                return Err(invalid("DB_POOL_SIZE", "a positive integer", "0"));
            }
            config.pool_size = size;
        }
        if let Some(threshold) = lookup("IP_MISMATCH_THRESHOLD") {
            let threshold: i32 = parse("IP_MISMATCH_THRESHOLD", "a positive integer", threshold)?;
            if threshold < 1 {
                return Err(invalid(
                    "IP_MISMATCH_THRESHOLD",
                    "a positive integer",
                    &threshold.to_string(),
                ));
            }
            config.engine.mismatch_threshold = threshold;
        }

        config.log.to_file = lookup("SERVER_LOG").is_some_and(|v| v == "true");
        config.log.filter = lookup("RUST_LOG");

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(
    name: &'static str,
    expected: &'static str,
    value: String,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        expected,
        value,
    })
}

fn invalid(name: &'static str, expected: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        expected,
        value: value.to_string(),
    }
}
