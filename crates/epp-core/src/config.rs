//! Configuration types for the EPP synchronization core
//!
//! This module defines all configuration structures used throughout the crate.
//! Configuration can be built in code, deserialized, or read from `EPP_*`
//! environment variables with [`EppConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EppConfig {
    /// RPC transport to the registry gateway
    pub transport: TransportConfig,

    /// Liveness signal written on transport faults
    #[serde(default)]
    pub health: HealthConfig,

    /// Defaults applied to every automaton instance
    #[serde(default)]
    pub automaton: AutomatonConfig,

    /// Retry policy wrapped around façade entry points
    #[serde(default)]
    pub retry: RetryConfig,

    /// Registrar-specific settings
    #[serde(default)]
    pub registrar: RegistrarConfig,
}

impl EppConfig {
    /// Create a new configuration with defaults
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            health: HealthConfig::default(),
            automaton: AutomatonConfig::default(),
            retry: RetryConfig::default(),
            registrar: RegistrarConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.transport.validate()?;

        if self.registrar.registrar_id.is_empty() {
            return Err(crate::Error::config("Registrar id cannot be empty"));
        }
        if self.registrar.request_timeout_secs == 0 {
            return Err(crate::Error::config("Request timeout must be > 0"));
        }
        if !(1..=10).contains(&self.registrar.default_period_years) {
            return Err(crate::Error::config(
                "Default registration period must be between 1 and 10 years",
            ));
        }
        if self.retry.max_retries > 10 {
            return Err(crate::Error::config("Max retries must be <= 10"));
        }

        Ok(())
    }

    /// Load configuration from environment variables
    ///
    /// - `EPP_TRANSPORT_TYPE`: transport type (default `http`)
    /// - `EPP_GATEWAY_URL`: gateway endpoint (required for `http`)
    /// - `EPP_GATEWAY_TOKEN`: bearer token (optional)
    /// - `EPP_GATEWAY_TIMEOUT_SECS`: HTTP timeout
    /// - `EPP_HEALTH_FILE`: liveness signal file
    /// - `EPP_RESTART_DELAY_MS`: delay before the single transport retry
    /// - `EPP_REGISTRAR_ID`: our registrar client id
    /// - `EPP_REQUEST_TIMEOUT_SECS`: bound on one correlated request
    /// - `EPP_MAX_RETRIES` / `EPP_RETRY_DELAY_SECS`: façade retry policy
    /// - `EPP_RAISE_ERRORS`: default for automaton `raise_errors`
    pub fn from_env() -> Result<Self, crate::Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, crate::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let transport_type = lookup("EPP_TRANSPORT_TYPE").unwrap_or_else(|| "http".to_string());
        let transport = match transport_type.as_str() {
            "http" => TransportConfig::Http {
                url: lookup("EPP_GATEWAY_URL")
                    .ok_or_else(|| crate::Error::config("EPP_GATEWAY_URL is required"))?,
                token: lookup("EPP_GATEWAY_TOKEN"),
                timeout_secs: parse_var(&lookup, "EPP_GATEWAY_TIMEOUT_SECS")?
                    .unwrap_or_else(default_http_timeout_secs),
            },
            other => TransportConfig::Custom {
                factory: other.to_string(),
                config: serde_json::json!({
                    "url": lookup("EPP_GATEWAY_URL"),
                }),
            },
        };

        let mut config = Self::new(transport);
        config.health.path = lookup("EPP_HEALTH_FILE").map(PathBuf::from);
        if let Some(delay) = parse_var(&lookup, "EPP_RESTART_DELAY_MS")? {
            config.health.restart_delay_ms = delay;
        }
        if let Some(id) = lookup("EPP_REGISTRAR_ID") {
            config.registrar.registrar_id = id;
        }
        if let Some(timeout) = parse_var(&lookup, "EPP_REQUEST_TIMEOUT_SECS")? {
            config.registrar.request_timeout_secs = timeout;
        }
        if let Some(retries) = parse_var(&lookup, "EPP_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(delay) = parse_var(&lookup, "EPP_RETRY_DELAY_SECS")? {
            config.retry.retry_delay_secs = delay;
        }
        if let Some(raise) = parse_var(&lookup, "EPP_RAISE_ERRORS")? {
            config.automaton.raise_errors = raise;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, crate::Error>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| crate::Error::config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(None),
    }
}

/// RPC transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// HTTP binding to the registry gateway
    Http {
        /// Gateway endpoint receiving `{"cmd", "args"}` payloads
        url: String,
        /// Optional bearer token
        #[serde(default)]
        token: Option<String>,
        /// HTTP timeout in seconds
        #[serde(default = "default_http_timeout_secs")]
        timeout_secs: u64,
    },

    /// Custom transport
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl TransportConfig {
    /// Validate the transport configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            TransportConfig::Http {
                url, timeout_secs, ..
            } => {
                if url.is_empty() {
                    return Err(crate::Error::config("Gateway URL cannot be empty"));
                }
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(crate::Error::config(format!(
                        "Gateway URL must use HTTP or HTTPS scheme. Got: {}",
                        url
                    )));
                }
                if *timeout_secs == 0 {
                    return Err(crate::Error::config("Gateway timeout must be > 0"));
                }
                Ok(())
            }
            TransportConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom transport factory cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Get the transport type name
    pub fn type_name(&self) -> &str {
        match self {
            TransportConfig::Http { .. } => "http",
            TransportConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Liveness signal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// File the process supervisor watches; `None` disables the signal
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Delay between the fault signal and the single retry (milliseconds)
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
}

impl HealthConfig {
    /// Restart delay as a duration
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: None,
            restart_delay_ms: default_restart_delay_ms(),
        }
    }
}

/// Automaton defaults
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutomatonConfig {
    /// Log every event delivered to a machine
    #[serde(default = "default_true")]
    pub log_events: bool,

    /// Log every state change
    #[serde(default = "default_true")]
    pub log_transitions: bool,

    /// Propagate conversation failures to the façade caller
    #[serde(default)]
    pub raise_errors: bool,
}

impl Default for AutomatonConfig {
    fn default() -> Self {
        Self {
            log_events: true,
            log_transitions: true,
            raise_errors: false,
        }
    }
}

/// Retry policy around façade entry points
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after a connectivity-class failure
    ///
    /// The transport already retries once after signalling the gateway
    /// supervisor, so the default adds no further attempts.
    #[serde(default)]
    pub max_retries: usize,

    /// Delay between attempts (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

/// Registrar settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// Our client id at the registry (`clID` of sponsored domains)
    #[serde(default = "default_registrar_id")]
    pub registrar_id: String,

    /// Bound on one correlated request (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Registration period used when creating a domain without renew years
    #[serde(default = "default_period_years")]
    pub default_period_years: u32,
}

impl RegistrarConfig {
    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            registrar_id: default_registrar_id(),
            request_timeout_secs: default_request_timeout_secs(),
            default_period_years: default_period_years(),
        }
    }
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_restart_delay_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_registrar_id() -> String {
    "registrar".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_period_years() -> u32 {
    1
}
