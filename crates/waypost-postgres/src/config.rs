use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "waypost".to_string()
}

fn default_user() -> String {
    "waypost".to_string()
}

fn default_password() -> String {
    "waypost".to_string()
}

fn default_pool_size() -> usize {
    8
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: default_user(),
            password: default_password(),
            pool_size: default_pool_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: PostgresConfig = serde_json::from_str(r#"{"host":"db.internal"}"#).unwrap();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 5432);
        assert_eq!(config.pool_size, 8);
    }
}
