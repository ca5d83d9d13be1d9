//! Server configuration.
//!
//! Loaded once at startup: defaults, then an optional TOML file, then
//! environment overrides. Consumed read-only by the gatekeeper and the
//! connection lifecycle.
//!
//! ```toml
//! bind_addr = "0.0.0.0:8080"
//! outbound_capacity = 256
//!
//! [auth]
//! mode = "token"
//! secret = "change-me"
//! allowed_origins = ["https://app.example.com", "*.example.com"]
//! environment = "production"
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Whether connections must present a signed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No token required
    Open,
    /// `?auth=<token>` required and verified against `secret`
    Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::Invalid {
                key: "environment",
                reason: format!("unknown environment '{other}'"),
            }),
        }
    }
}

impl std::str::FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "token" => Ok(Self::Token),
            other => Err(ConfigError::Invalid {
                key: "auth.mode",
                reason: format!("unknown auth mode '{other}'"),
            }),
        }
    }
}

/// Gatekeeping configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// HMAC signing secret for connection tokens
    pub secret: Option<String>,
    /// Origin allow-list. Empty disables the origin gate.
    pub allowed_origins: Vec<String>,
    pub environment: Environment,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Token,
            secret: None,
            allowed_origins: Vec::new(),
            environment: Environment::Development,
        }
    }
}

impl AuthConfig {
    /// Open mode, no origin restrictions.
    pub fn open() -> Self {
        Self {
            mode: AuthMode::Open,
            ..Self::default()
        }
    }

    /// Token mode with the given signing secret.
    pub fn token(secret: impl Into<String>) -> Self {
        Self {
            mode: AuthMode::Token,
            secret: Some(secret.into()),
            ..Self::default()
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outbound messages buffered per connection before it is evicted
    pub outbound_capacity: usize,
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            outbound_capacity: 256,
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration: defaults, optional TOML file, process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").or_else(|| lookup("WS_PORT")) {
            let port: u16 = port.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                reason: format!("'{port}' is not a port number"),
            })?;
            self.bind_addr = format!("0.0.0.0:{port}");
        }
        if let Some(secret) = lookup("YJS_AUTH_SECRET").filter(|s| !s.is_empty()) {
            self.auth.secret = Some(secret);
        }
        if let Some(mode) = lookup("RELAY_AUTH_MODE") {
            self.auth.mode = mode.parse()?;
        }
        if let Some(origins) = lookup("RELAY_ALLOWED_ORIGINS") {
            self.auth.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(env) = lookup("RELAY_ENV") {
            self.auth.environment = env.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "outbound_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "bind_addr",
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
