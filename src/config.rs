//! Configuration management for the rate limiter.

use std::time::Duration;

use http::HeaderName;
use serde::{Deserialize, Serialize};

use crate::error::{QuotaError, Result};
use crate::ratelimit::{
    window_from_secs, FailurePolicy, IdentifierStrategy, LimitPolicy, DEFAULT_KEY_PREFIX,
    DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW,
};

/// Prefix for environment variable overrides, e.g. `QUOTA_STORE__HOST`.
pub const ENV_PREFIX: &str = "QUOTA";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Event store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Default limits and admission behaviour
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Shared store connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Full connection URL; takes precedence over the individual fields
    #[serde(default)]
    pub url: Option<String>,

    /// Store host
    #[serde(default = "default_host")]
    pub host: String,

    /// Store port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logical database number
    #[serde(default)]
    pub db: u32,

    /// Optional password
    #[serde(default)]
    pub password: Option<String>,

    /// Namespace for window record keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Bound on each store call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            db: 0,
            password: None,
            key_prefix: default_key_prefix(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_timeout_ms() -> u64 {
    250
}

impl StoreConfig {
    /// The Redis connection URL.
    pub fn redis_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match &self.password {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// The per-call store timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Default limit policy and admission behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests allowed per window
    #[serde(default = "default_requests")]
    pub default_requests: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub default_window_secs: f64,

    /// Outcome when the store is unavailable
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Header to take the identifier from instead of the client address
    #[serde(default)]
    pub identifier_header: Option<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_requests: default_requests(),
            default_window_secs: default_window_secs(),
            failure_policy: FailurePolicy::default(),
            identifier_header: None,
        }
    }
}

fn default_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

fn default_window_secs() -> f64 {
    DEFAULT_WINDOW.as_secs_f64()
}

impl QuotaConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: QuotaConfig = serde_yaml::from_str(yaml)
            .map_err(|e| QuotaError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load layered configuration: defaults, then an optional file, then
    /// `QUOTA_`-prefixed environment variables (`__` separates sections).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: QuotaConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| QuotaError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working limiter.
    pub fn validate(&self) -> Result<()> {
        self.default_policy()?.validate_as_default()?;
        if self.store.timeout_ms == 0 {
            return Err(QuotaError::Configuration(
                "store.timeout_ms must be positive".to_string(),
            ));
        }
        self.strategy()?;
        Ok(())
    }

    /// The default limit policy.
    pub fn default_policy(&self) -> Result<LimitPolicy> {
        LimitPolicy::new(
            self.limits.default_requests,
            window_from_secs(self.limits.default_window_secs)?,
        )
    }

    /// The identifier derivation strategy.
    pub fn strategy(&self) -> Result<IdentifierStrategy> {
        match &self.limits.identifier_header {
            Some(name) => HeaderName::from_bytes(name.as_bytes())
                .map(IdentifierStrategy::Header)
                .map_err(|e| {
                    QuotaError::Configuration(format!(
                        "invalid identifier_header {:?}: {}",
                        name, e
                    ))
                }),
            None => Ok(IdentifierStrategy::ClientAddress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QuotaConfig::default();
        assert_eq!(config.store.redis_url(), "redis://localhost:6379/0");
        assert_eq!(config.store.key_prefix, "rate_limit:");
        assert_eq!(config.store.timeout(), Duration::from_millis(250));
        assert_eq!(config.limits.failure_policy, FailurePolicy::Closed);

        let policy = config.default_policy().unwrap();
        assert_eq!(policy.max_requests(), 100);
        assert_eq!(policy.window(), Duration::from_secs(60));
        assert_eq!(policy, LimitPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_url_with_password() {
        let store = StoreConfig {
            host: "cache.internal".to_string(),
            port: 6380,
            db: 2,
            password: Some("s3cret".to_string()),
            ..StoreConfig::default()
        };
        assert_eq!(store.redis_url(), "redis://:s3cret@cache.internal:6380/2");

        let store = StoreConfig {
            url: Some("rediss://example:6379/1".to_string()),
            ..store
        };
        assert_eq!(store.redis_url(), "rediss://example:6379/1");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
store:
  host: redis.example
  key_prefix: "api:"
  timeout_ms: 100
limits:
  default_requests: 10
  default_window_secs: 1.5
  failure_policy: open
  identifier_header: x-api-key
"#;
        let config = QuotaConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.host, "redis.example");
        assert_eq!(config.store.port, 6379);
        assert_eq!(config.store.key_prefix, "api:");
        assert_eq!(config.limits.failure_policy, FailurePolicy::Open);
        assert_eq!(
            config.default_policy().unwrap().window(),
            Duration::from_millis(1500)
        );
        assert!(matches!(
            config.strategy().unwrap(),
            IdentifierStrategy::Header(ref h) if h.as_str() == "x-api-key"
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for yaml in [
            "limits:\n  default_requests: 0\n",
            "limits:\n  default_window_secs: 0\n",
            "limits:\n  default_window_secs: -3\n",
            "store:\n  timeout_ms: 0\n",
            "limits:\n  identifier_header: \"bad header\"\n",
            "limits:\n  failure_policy: sometimes\n",
        ] {
            let err = QuotaConfig::from_yaml(yaml).unwrap_err();
            assert!(matches!(err, QuotaError::Configuration(_)), "{}", yaml);
        }
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = QuotaConfig::load(None).unwrap();
        assert_eq!(config.store.port, 6379);
        assert_eq!(config.limits.default_requests, 100);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = QuotaConfig::from_file("/nonexistent/quota.yaml").unwrap_err();
        assert!(matches!(err, QuotaError::Io(_)));
    }
}
