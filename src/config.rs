//! Strongly-typed configuration for the ClawdPay runtime.
//!
//! Configuration values can be constructed from defaults, loaded from
//! environment variables (with optional `.env` support), or merged with
//! explicit overrides for ergonomic programmatic updates.

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::path::PathBuf;

use dotenvy::dotenv;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use thiserror::Error;

use crate::logging::LogCallback;

/// Production Privacy.com API endpoint.
pub const PRIVACY_PRODUCTION_URL: &str = "https://api.privacy.com/v1";

/// Sandbox Privacy.com API endpoint.
pub const PRIVACY_SANDBOX_URL: &str = "https://sandbox.privacy.com/v1";

/// Shared logger callback signature used by the configuration.
pub type LoggerCallback = LogCallback;

/// Verbosity level for ClawdPay logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Minimal,
    Medium,
    Detailed,
}

impl Verbosity {
    fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::Medium
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// Configuration values for the payment session and provider client.
#[derive(DeriveSerialize, DeriveDeserialize, Clone)]
#[serde(default)]
pub struct ClawdpayConfig {
    #[serde(alias = "privacyApiKey")]
    pub privacy_api_key: Option<String>,
    #[serde(alias = "privacySandbox")]
    pub privacy_sandbox: bool,
    #[serde(alias = "privacyApiUrl")]
    pub privacy_api_url: Option<String>,
    pub headless: bool,
    #[serde(alias = "chromeExecutable")]
    pub chrome_executable: Option<PathBuf>,
    #[serde(alias = "browserArgs")]
    pub browser_args: Vec<String>,
    #[serde(alias = "navigationTimeoutMs")]
    pub navigation_timeout_ms: u64,
    #[serde(alias = "networkIdleMs")]
    pub network_idle_ms: u64,
    pub verbose: Verbosity,
    #[serde(skip_serializing, skip_deserializing)]
    pub logger: Option<LoggerCallback>,
}

impl Default for ClawdpayConfig {
    fn default() -> Self {
        ClawdpayConfig {
            privacy_api_key: None,
            privacy_sandbox: false,
            privacy_api_url: None,
            headless: true,
            chrome_executable: None,
            browser_args: vec!["--no-sandbox".to_string()],
            navigation_timeout_ms: 30_000,
            network_idle_ms: 500,
            verbose: Verbosity::default(),
            logger: None,
        }
    }
}

impl ClawdpayConfig {
    /// Construct a configuration by reading relevant environment variables, after
    /// loading a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();
        let mut config = ClawdpayConfig::default();

        if let Some(value) = env_var("PRIVACY_API_KEY") {
            config.privacy_api_key = Some(value);
        }

        if let Some(value) = env_var("PRIVACY_SANDBOX") {
            config.privacy_sandbox = parse_bool("PRIVACY_SANDBOX", &value)?;
        }

        if let Some(value) = env_var("PRIVACY_API_URL") {
            config.privacy_api_url = Some(value);
        }

        if let Some(value) = env_var("HEADLESS") {
            config.headless = parse_bool("HEADLESS", &value)?;
        }

        if let Some(value) = env_var("CLAWDPAY_CHROME_BIN") {
            config.chrome_executable = Some(PathBuf::from(value));
        }

        if let Some(value) = env_var("CLAWDPAY_BROWSER_ARGS") {
            config.browser_args = value.split_whitespace().map(str::to_string).collect();
        }

        if let Some(value) = env_var("CLAWDPAY_NAVIGATION_TIMEOUT_MS") {
            config.navigation_timeout_ms = parse_u64("CLAWDPAY_NAVIGATION_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("CLAWDPAY_NETWORK_IDLE_MS") {
            config.network_idle_ms = parse_u64("CLAWDPAY_NETWORK_IDLE_MS", &value)?;
        }

        if let Some(value) = env_var("CLAWDPAY_VERBOSE") {
            let parsed = parse_u8("CLAWDPAY_VERBOSE", &value)?;
            config.verbose = Verbosity::from_u8(parsed).ok_or_else(|| {
                ConfigError::invalid_enum("CLAWDPAY_VERBOSE", parsed.to_string())
            })?;
        }

        Ok(config)
    }

    /// Base URL for the Privacy.com API: an explicit URL wins, otherwise the
    /// sandbox flag picks between sandbox and production.
    pub fn privacy_base_url(&self) -> &str {
        match (&self.privacy_api_url, self.privacy_sandbox) {
            (Some(url), _) => url.as_str(),
            (None, true) => PRIVACY_SANDBOX_URL,
            (None, false) => PRIVACY_PRODUCTION_URL,
        }
    }

    /// Create a new configuration with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: ClawdpayConfigOverrides) -> ClawdpayConfig {
        let mut next = self.clone();

        if let Some(value) = overrides.privacy_api_key {
            next.privacy_api_key = value;
        }
        if let Some(value) = overrides.privacy_sandbox {
            next.privacy_sandbox = value;
        }
        if let Some(value) = overrides.privacy_api_url {
            next.privacy_api_url = value;
        }
        if let Some(value) = overrides.headless {
            next.headless = value;
        }
        if let Some(value) = overrides.chrome_executable {
            next.chrome_executable = value;
        }
        if let Some(value) = overrides.browser_args {
            next.browser_args = value;
        }
        if let Some(value) = overrides.navigation_timeout_ms {
            next.navigation_timeout_ms = value;
        }
        if let Some(value) = overrides.network_idle_ms {
            next.network_idle_ms = value;
        }
        if let Some(value) = overrides.verbose {
            next.verbose = value;
        }
        if let Some(value) = overrides.logger {
            next.logger = value;
        }

        next
    }
}

/// Field-level overrides for [`ClawdpayConfig::with_overrides`].
#[derive(Default, Clone)]
pub struct ClawdpayConfigOverrides {
    pub privacy_api_key: Option<Option<String>>,
    pub privacy_sandbox: Option<bool>,
    pub privacy_api_url: Option<Option<String>>,
    pub headless: Option<bool>,
    pub chrome_executable: Option<Option<PathBuf>>,
    pub browser_args: Option<Vec<String>>,
    pub navigation_timeout_ms: Option<u64>,
    pub network_idle_ms: Option<u64>,
    pub verbose: Option<Verbosity>,
    pub logger: Option<Option<LoggerCallback>>,
}

impl ClawdpayConfigOverrides {
    /// Builder-style helper to set the `headless` override.
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }

    /// Builder-style helper to set the `verbose` override.
    pub fn verbose(mut self, verbose: Verbosity) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn logger(mut self, logger: LoggerCallback) -> Self {
        self.logger = Some(Some(logger));
        self
    }
}

impl fmt::Debug for ClawdpayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClawdpayConfig")
            .field(
                "privacy_api_key",
                &self.privacy_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("privacy_sandbox", &self.privacy_sandbox)
            .field("privacy_api_url", &self.privacy_api_url)
            .field("headless", &self.headless)
            .field("chrome_executable", &self.chrome_executable)
            .field("browser_args", &self.browser_args)
            .field("navigation_timeout_ms", &self.navigation_timeout_ms)
            .field("network_idle_ms", &self.network_idle_ms)
            .field("verbose", &self.verbose)
            .field("logger_present", &self.logger.is_some())
            .finish()
    }
}

impl fmt::Debug for ClawdpayConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClawdpayConfigOverrides")
            .field(
                "privacy_api_key",
                &self
                    .privacy_api_key
                    .as_ref()
                    .map(|inner| inner.as_ref().map(|_| "<redacted>")),
            )
            .field("privacy_sandbox", &self.privacy_sandbox)
            .field("privacy_api_url", &self.privacy_api_url)
            .field("headless", &self.headless)
            .field("chrome_executable", &self.chrome_executable)
            .field("browser_args", &self.browser_args)
            .field("navigation_timeout_ms", &self.navigation_timeout_ms)
            .field("network_idle_ms", &self.network_idle_ms)
            .field("verbose", &self.verbose)
            .field("logger", &self.logger.as_ref().map(|inner| inner.is_some()))
            .finish()
    }
}

/// Errors that can arise while constructing a [`ClawdpayConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

impl ConfigError {
    fn invalid_enum(field: &'static str, value: String) -> Self {
        ConfigError::InvalidEnumVariant { field, value }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, ConfigError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}
