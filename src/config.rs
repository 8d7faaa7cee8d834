//! Client configuration

use crate::error::{ClientError, Result};
use std::time::Duration;

/// Default request timeout ceiling
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

const DEVELOPMENT_BASE_URL: &str = "http://localhost:3000/api";
const PRODUCTION_BASE_URL: &str = "https://api.driverapp.io/api";

const ENV_ENVIRONMENT: &str = "DRIVER_API_ENV";
const ENV_BASE_URL: &str = "DRIVER_API_BASE_URL";
const ENV_TIMEOUT_MS: &str = "DRIVER_API_TIMEOUT_MS";

/// Deployment the client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Development => DEVELOPMENT_BASE_URL,
            Self::Production => PRODUCTION_BASE_URL,
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ClientError::Configuration(format!(
                "unknown environment '{other}'"
            ))),
        }
    }
}

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root every relative request path is joined onto
    pub base_url: String,

    /// Per-request timeout ceiling, overridable per call
    /// Default: 30 seconds
    pub timeout: Duration,

    pub user_agent: Option<String>,
}

impl ClientConfig {
    pub fn new(environment: Environment) -> Self {
        Self::with_base_url(environment.base_url())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build a configuration from the process environment.
    ///
    /// `DRIVER_API_ENV` picks the deployment (development when unset),
    /// `DRIVER_API_BASE_URL` overrides its URL and `DRIVER_API_TIMEOUT_MS` the timeout.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let environment = match lookup(ENV_ENVIRONMENT) {
            Some(value) => value.parse()?,
            None => Environment::default(),
        };

        let mut config = match lookup(ENV_BASE_URL).filter(|url| !url.trim().is_empty()) {
            Some(url) => Self::with_base_url(url),
            None => Self::new(environment),
        };

        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            let millis: u64 = raw.trim().parse().map_err(|e| {
                ClientError::Configuration(format!("invalid {ENV_TIMEOUT_MS} '{raw}': {e}"))
            })?;
            config.timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Environment::default())
    }
}
