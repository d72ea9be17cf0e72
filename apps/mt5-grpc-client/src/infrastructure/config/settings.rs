//! Client Configuration Settings
//!
//! Configuration types for the terminal client, loaded from environment
//! variables with defaults for everything except the account credentials.

use std::time::Duration;

use crate::domain::connection::Credentials;

/// Default gateway endpoint.
const DEFAULT_ENDPOINT: &str = "https://mt5.mrpc.pro:443";

/// gRPC endpoint settings.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// Gateway URL.
    pub url: String,
    /// Timeout for establishing the TCP/TLS connection.
    pub connect_timeout: Duration,
    /// TCP keepalive interval.
    pub tcp_keepalive: Duration,
    /// HTTP/2 keepalive ping interval.
    pub http2_keepalive_interval: Duration,
    /// HTTP/2 keepalive ping timeout.
    pub keepalive_timeout: Duration,
    /// Whether to negotiate TLS with native roots.
    pub use_tls: bool,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENDPOINT.to_string(),
            connect_timeout: Duration::from_secs(10),
            tcp_keepalive: Duration::from_secs(60),
            http2_keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(20),
            use_tls: true,
        }
    }
}

/// Default deadlines applied when a caller supplies none.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSettings {
    /// Deadline for trading and other default-class calls.
    pub default_timeout: Duration,
    /// Deadline for lightweight query calls.
    pub query_timeout: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(3),
        }
    }
}

/// Retry and reconnect backoff settings.
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    /// Initial backoff delay.
    pub delay_initial: Duration,
    /// Maximum backoff delay.
    pub delay_max: Duration,
    /// Backoff multiplier.
    pub delay_multiplier: f64,
    /// Maximum retries before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(200),
            delay_max: Duration::from_secs(3),
            delay_multiplier: 2.0,
            max_attempts: 8,
        }
    }
}

/// Subscription channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Capacity of each subscription's data channel.
    pub data_capacity: usize,
    /// Capacity of each subscription's error channel.
    pub error_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            data_capacity: 100,
            error_capacity: 10,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Account credentials.
    pub credentials: Credentials,
    /// Gateway endpoint settings.
    pub endpoint: EndpointSettings,
    /// Default call deadlines.
    pub timeouts: TimeoutSettings,
    /// Backoff settings.
    pub retry: RetrySettings,
    /// Subscription channel settings.
    pub stream: StreamSettings,
}

impl ClientConfig {
    /// Configuration with defaults for everything but credentials.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            endpoint: EndpointSettings::default(),
            timeouts: TimeoutSettings::default(),
            retry: RetrySettings::default(),
            stream: StreamSettings::default(),
        }
    }

    /// Set the gateway URL. TLS follows the URL scheme.
    #[must_use]
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.endpoint.use_tls = url.starts_with("https://");
        self.endpoint.url = url;
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials are missing, empty, or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let login = require_env("MT5_USER")?;
        let login = login
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidValue("MT5_USER".to_string()))?;
        let password = require_env("MT5_PASSWORD")?;
        let server = require_env("MT5_SERVER_NAME")?;

        let credentials = Credentials::new(login, password, server)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        let endpoint_defaults = EndpointSettings::default();
        let endpoint = EndpointSettings {
            url: std::env::var("MT5_GRPC_ENDPOINT").unwrap_or(endpoint_defaults.url),
            connect_timeout: parse_env_duration_secs(
                "MT5_CONNECT_TIMEOUT_SECS",
                endpoint_defaults.connect_timeout,
            ),
            use_tls: parse_env_bool("MT5_USE_TLS", endpoint_defaults.use_tls),
            ..endpoint_defaults
        };

        let timeouts = TimeoutSettings {
            default_timeout: parse_env_duration_secs(
                "MT5_DEFAULT_TIMEOUT_SECS",
                TimeoutSettings::default().default_timeout,
            ),
            query_timeout: parse_env_duration_secs(
                "MT5_QUERY_TIMEOUT_SECS",
                TimeoutSettings::default().query_timeout,
            ),
        };

        let retry = RetrySettings {
            delay_initial: parse_env_duration_millis(
                "MT5_RECONNECT_DELAY_INITIAL_MS",
                RetrySettings::default().delay_initial,
            ),
            delay_max: parse_env_duration_millis(
                "MT5_RECONNECT_DELAY_MAX_MS",
                RetrySettings::default().delay_max,
            ),
            delay_multiplier: parse_env_f64(
                "MT5_RECONNECT_DELAY_MULTIPLIER",
                RetrySettings::default().delay_multiplier,
            ),
            max_attempts: parse_env_u32(
                "MT5_MAX_RECONNECT_ATTEMPTS",
                RetrySettings::default().max_attempts,
            ),
        };

        let stream = StreamSettings {
            data_capacity: parse_env_usize(
                "MT5_STREAM_DATA_CAPACITY",
                StreamSettings::default().data_capacity,
            )
            .max(1),
            error_capacity: parse_env_usize(
                "MT5_STREAM_ERROR_CAPACITY",
                StreamSettings::default().error_capacity,
            )
            .max(1),
        };

        Ok(Self {
            credentials,
            endpoint,
            timeouts,
            retry,
            stream,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    let value = std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| match v.to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        })
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults() {
        let settings = TimeoutSettings::default();
        assert_eq!(settings.default_timeout, Duration::from_secs(10));
        assert_eq!(settings.query_timeout, Duration::from_secs(3));
    }

    #[test]
    fn retry_defaults() {
        let settings = RetrySettings::default();
        assert_eq!(settings.delay_initial, Duration::from_millis(200));
        assert_eq!(settings.delay_max, Duration::from_secs(3));
        assert_eq!(settings.max_attempts, 8);
        assert!((settings.delay_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stream_defaults() {
        let settings = StreamSettings::default();
        assert_eq!(settings.data_capacity, 100);
        assert_eq!(settings.error_capacity, 10);
    }

    #[test]
    fn builder_overrides_endpoint() {
        let creds = Credentials::new(1, "secret", "Broker-Demo").unwrap();
        let config = ClientConfig::new(creds).with_endpoint("http://127.0.0.1:50051");
        assert_eq!(config.endpoint.url, "http://127.0.0.1:50051");
        assert!(!config.endpoint.use_tls);
    }

    #[test]
    fn missing_variable_reported_by_name() {
        let err = require_env("MT5_TEST_SURELY_UNSET_VARIABLE").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "MT5_TEST_SURELY_UNSET_VARIABLE"));
    }

    #[test]
    fn unparseable_values_fall_back_to_default() {
        assert_eq!(parse_env_u32("MT5_TEST_SURELY_UNSET_VARIABLE", 7), 7);
        assert!(parse_env_bool("MT5_TEST_SURELY_UNSET_VARIABLE", true));
    }
}
