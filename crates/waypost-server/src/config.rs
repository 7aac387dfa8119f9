use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // HTTP server
    #[serde(default = "default_http_host")]
    pub http_host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Request body ceiling in bytes for the ingest endpoint
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Maximum points accepted in one ingest call
    #[serde(default = "default_max_batch_points")]
    pub max_batch_points: usize,

    // PostgreSQL
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_pool_size")]
    pub postgres_pool_size: usize,

    // Auth
    /// Shared bearer token presented by devices
    #[serde(default = "default_device_token")]
    pub device_token: String,

    /// Bearer token for the operator audit endpoints
    #[serde(default = "default_admin_token")]
    pub admin_token: String,

    // Policy and contract
    /// Path to a JSON policy document; conservative defaults when unset
    #[serde(default)]
    pub policy_path: Option<String>,

    /// Path to a JSON metric contract; empty catalog when unset
    #[serde(default)]
    pub contract_path: Option<String>,

    /// Client-side policy cache lifetime in seconds
    #[serde(default = "default_policy_refresh_after_s")]
    pub policy_refresh_after_s: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_max_batch_points() -> usize {
    500
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "waypost".to_string()
}

fn default_postgres_username() -> String {
    "waypost".to_string()
}

fn default_postgres_password() -> String {
    "waypost".to_string()
}

fn default_postgres_pool_size() -> usize {
    8
}

fn default_device_token() -> String {
    "change-me-in-production".to_string()
}

fn default_admin_token() -> String {
    "change-me-in-production-too".to_string()
}

fn default_policy_refresh_after_s() -> u64 {
    300
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("WAYPOST"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        std::env::remove_var("WAYPOST_LOG_LEVEL");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.max_batch_points, 500);
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        std::env::set_var("WAYPOST_LOG_LEVEL", "debug");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "debug");

        std::env::remove_var("WAYPOST_LOG_LEVEL");
    }
}
