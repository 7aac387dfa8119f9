use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// This device's identity
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Bearer token presented to the server
    #[serde(default = "default_device_token")]
    pub device_token: String,

    // Server endpoints
    #[serde(default = "default_ingest_url")]
    pub ingest_url: String,

    #[serde(default = "default_policy_url")]
    pub policy_url: String,

    // Local queue
    /// SQLite file backing the store-and-forward queue
    #[serde(default = "default_queue_path")]
    pub queue_path: String,

    /// Disk quota for the queue file in bytes
    #[serde(default = "default_queue_max_disk_bytes")]
    pub queue_max_disk_bytes: u64,

    // Timers
    /// Seconds between flush passes over the queue
    #[serde(default = "default_flush_interval_s")]
    pub flush_interval_s: u64,

    /// Fallback policy refresh interval when the server gives no window
    #[serde(default = "default_policy_refresh_s")]
    pub policy_refresh_s: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_s")]
    pub request_timeout_s: u64,

    /// In-call retry budget before the queue takes over
    #[serde(default = "default_transport_max_attempts")]
    pub transport_max_attempts: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_device_id() -> String {
    "dev-unnamed".to_string()
}

fn default_device_token() -> String {
    "change-me-in-production".to_string()
}

fn default_ingest_url() -> String {
    "http://localhost:8080/v1/ingest".to_string()
}

fn default_policy_url() -> String {
    "http://localhost:8080/v1/policy".to_string()
}

fn default_queue_path() -> String {
    "/var/lib/waypost/queue.db".to_string()
}

fn default_queue_max_disk_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_flush_interval_s() -> u64 {
    30
}

fn default_policy_refresh_s() -> u64 {
    300
}

fn default_request_timeout_s() -> u64 {
    15
}

fn default_transport_max_attempts() -> u32 {
    3
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("WAYPOST_AGENT"))
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

        std::env::remove_var("WAYPOST_AGENT_DEVICE_ID");

        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.device_id, "dev-unnamed");
        assert_eq!(config.flush_interval_s, 30);
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        std::env::set_var("WAYPOST_AGENT_DEVICE_ID", "greenhouse-7");

        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.device_id, "greenhouse-7");

        std::env::remove_var("WAYPOST_AGENT_DEVICE_ID");
    }
}
