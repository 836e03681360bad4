//! Chat Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:5000";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "chat";

/// Chat Controller configuration.
///
/// Only `REDIS_URL` is required; everything else has a default. The Redis
/// URL never appears in Debug output since it may embed credentials.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL (presence, message log and unread counters).
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: SecretString,

    /// HTTP/WebSocket server bind address (default: "0.0.0.0:5000").
    pub http_bind_address: String,

    /// Unique identifier for this controller instance.
    pub instance_id: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("http_bind_address", &self.http_bind_address)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("REDIS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?
                .clone(),
        );

        let http_bind_address = vars
            .get("CHAT_HTTP_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDRESS.to_string());

        http_bind_address.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue(format!(
                "CHAT_HTTP_BIND_ADDRESS is not a valid socket address: {e}"
            ))
        })?;

        // Generate instance ID when not pinned via environment
        let instance_id = vars.get("CHAT_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            http_bind_address,
            instance_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "REDIS_URL".to_string(),
            "redis://localhost:6379".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = base_vars();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.redis_url.expose_secret(), "redis://localhost:6379");
        assert_eq!(config.http_bind_address, DEFAULT_HTTP_BIND_ADDRESS);
        // Instance ID should be auto-generated
        assert!(config.instance_id.starts_with("chat-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert(
            "CHAT_HTTP_BIND_ADDRESS".to_string(),
            "127.0.0.1:8080".to_string(),
        );
        vars.insert("CHAT_INSTANCE_ID".to_string(), "chat-custom-001".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.http_bind_address, "127.0.0.1:8080");
        assert_eq!(config.instance_id, "chat-custom-001");
    }

    #[test]
    fn test_from_vars_missing_redis_url() {
        let mut vars = base_vars();
        vars.remove("REDIS_URL");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "REDIS_URL"));
    }

    #[test]
    fn test_from_vars_invalid_bind_address() {
        let mut vars = base_vars();
        vars.insert(
            "CHAT_HTTP_BIND_ADDRESS".to_string(),
            "not-an-address".to_string(),
        );

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let vars = base_vars();
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("redis://"));
    }
}
