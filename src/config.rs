//! Engine and Server Configuration
//!
//! All tunables that used to be compiled-in constants. Values can come from
//! a YAML file, `DURABLE_*` environment variables, or CLI flags (applied by
//! the binary, in that order of increasing precedence).
//!
//! # Example YAML Format
//!
//! ```yaml
//! port: 8080
//! engine:
//!   store_ttl_secs: 3600
//!   queue_capacity: 128
//!   token_validity_secs: 86400
//!   step_timeout_secs: 30
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default lifetime of stored workflows and steps.
pub const DEFAULT_STORE_TTL_SECS: u64 = 60 * 60;

/// Default capacity of the execution queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Default validity window of read tokens.
pub const DEFAULT_TOKEN_VALIDITY_SECS: u64 = 24 * 60 * 60;

/// Default per-call timeout for outbound step requests.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;

/// Default per-call timeout for callback delivery.
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 30;

/// Upper bound for every duration setting (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Upper bound for the execution queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// User agent sent with every callback.
pub const DEFAULT_USER_AGENT: &str = "durable.io";

/// Settings consumed by [`crate::execution::Engine`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Time-to-live of every store entry, refreshed on write
    pub store_ttl_secs: u64,

    /// Number of steps that can wait for the worker before enqueue blocks
    pub queue_capacity: usize,

    /// How long a read token stays valid after issue
    pub token_validity_secs: u64,

    /// Timeout applied to each outbound step call
    pub step_timeout_secs: u64,

    /// Timeout applied to each callback delivery
    pub callback_timeout_secs: u64,

    /// How long enqueue waits for queue space; `None` waits until space or shutdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enqueue_timeout_secs: Option<u64>,

    /// User agent of callback requests
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_ttl_secs: DEFAULT_STORE_TTL_SECS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            token_validity_secs: DEFAULT_TOKEN_VALIDITY_SECS,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            callback_timeout_secs: DEFAULT_CALLBACK_TIMEOUT_SECS,
            enqueue_timeout_secs: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn store_ttl(&self) -> Duration {
        Duration::from_secs(self.store_ttl_secs)
    }

    pub fn token_validity(&self) -> Duration {
        Duration::from_secs(self.token_validity_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn enqueue_timeout(&self) -> Option<Duration> {
        self.enqueue_timeout_secs.map(Duration::from_secs)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.store_ttl_secs == 0 {
            return Err(Error::Config("store_ttl_secs must be at least 1".into()));
        }
        if self.token_validity_secs == 0 {
            return Err(Error::Config(
                "token_validity_secs must be at least 1".into(),
            ));
        }
        if self.step_timeout_secs == 0 || self.callback_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be at least 1 second".into()));
        }
        if self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(Error::Config(format!(
                "queue_capacity must be at most {}",
                MAX_QUEUE_CAPACITY
            )));
        }

        let durations = [
            ("store_ttl_secs", Some(self.store_ttl_secs)),
            ("token_validity_secs", Some(self.token_validity_secs)),
            ("step_timeout_secs", Some(self.step_timeout_secs)),
            ("callback_timeout_secs", Some(self.callback_timeout_secs)),
            ("enqueue_timeout_secs", self.enqueue_timeout_secs),
        ];
        for (name, value) in durations {
            if value.is_some_and(|secs| secs > MAX_DURATION_SECS) {
                return Err(Error::Config(format!(
                    "{} must be at most {}",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        Ok(())
    }
}

/// Settings for the HTTP server binary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads a configuration from a YAML file.
    ///
    /// Missing keys fall back to their defaults; the result is validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        config.engine.validate()?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Applies `DURABLE_HOST` / `DURABLE_PORT` overrides from the environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("DURABLE_HOST") {
            debug!("Host overridden by environment: {}", host);
            self.host = host;
        }
        if let Some(port) = lookup("DURABLE_PORT") {
            self.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid DURABLE_PORT value: {}", port)))?;
            debug!("Port overridden by environment: {}", self.port);
        }
        Ok(())
    }

    /// Address the server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_compiled_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.store_ttl(), Duration::from_secs(3600));
        assert_eq!(config.queue_capacity, 128);
        assert_eq!(config.token_validity(), Duration::from_secs(86400));
        assert_eq!(config.enqueue_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = EngineConfig {
            queue_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let config = EngineConfig {
            store_ttl_secs: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_values() {
        let cases = [
            EngineConfig {
                store_ttl_secs: u64::MAX,
                ..EngineConfig::default()
            },
            EngineConfig {
                token_validity_secs: MAX_DURATION_SECS + 1,
                ..EngineConfig::default()
            },
            EngineConfig {
                step_timeout_secs: u64::MAX,
                ..EngineConfig::default()
            },
            EngineConfig {
                enqueue_timeout_secs: Some(u64::MAX),
                ..EngineConfig::default()
            },
            EngineConfig {
                queue_capacity: usize::MAX,
                ..EngineConfig::default()
            },
        ];

        for config in cases {
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{:?}", config);
        }

        let at_limit = EngineConfig {
            store_ttl_secs: MAX_DURATION_SECS,
            queue_capacity: MAX_QUEUE_CAPACITY,
            ..EngineConfig::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_load_partial_yaml() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("durable.yaml");
        fs::write(
            &path,
            "port: 9090\nengine:\n  queue_capacity: 4\n  enqueue_timeout_secs: 2\n",
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.engine.queue_capacity, 4);
        assert_eq!(config.engine.enqueue_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.engine.store_ttl_secs, DEFAULT_STORE_TTL_SECS);
    }

    #[test]
    fn test_load_invalid_values() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "engine:\n  queue_capacity: 0\n").unwrap();

        assert!(ServerConfig::load(&path).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = ServerConfig::load("/nonexistent/durable.yaml");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> =
            [("DURABLE_PORT", "7000"), ("DURABLE_HOST", "127.0.0.1")].into();
        let mut config = ServerConfig::default();
        config
            .apply_vars(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.bind_addr(), "127.0.0.1:7000");
    }

    #[test]
    fn test_env_invalid_port() {
        let mut config = ServerConfig::default();
        let result = config.apply_vars(|key| (key == "DURABLE_PORT").then(|| "abc".to_string()));
        assert!(result.is_err());
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
