//! Server configuration
//!
//! Bind address comes from the first command-line argument; pool size and
//! secret come from the environment:
//! - `CHAT_MAX_POOL_SIZE`: positive integer, default 10
//! - `CHAT_SERVER_SECRET`: session key secret, generated when unset

use std::env;

use tracing::warn;

use crate::error::{AppError, Result};
use crate::pool::DEFAULT_MAX_POOL_SIZE;
use crate::session::ServerSecret;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

pub const POOL_SIZE_VAR: &str = "CHAT_MAX_POOL_SIZE";
pub const SECRET_VAR: &str = "CHAT_SERVER_SECRET";

/// Settings consumed by `ChatServer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_pool_size: usize,
    /// `None` means a random secret is generated at startup
    pub secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            secret: None,
        }
    }
}

impl ServerConfig {
    /// Load from process arguments and environment
    pub fn from_env() -> Result<Self> {
        Self::from_sources(env::args().nth(1), |name| env::var(name).ok())
    }

    /// Load from an explicit address argument and variable lookup
    pub fn from_sources<F>(addr_arg: Option<String>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_pool_size = match lookup(POOL_SIZE_VAR) {
            Some(raw) => parse_pool_size(&raw)?,
            None => DEFAULT_MAX_POOL_SIZE,
        };

        let secret = lookup(SECRET_VAR);
        if secret.as_deref() == Some("") {
            return Err(AppError::Config(format!("{} is set but empty", SECRET_VAR)));
        }

        Ok(Self {
            bind_addr: addr_arg.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            max_pool_size,
            secret,
        })
    }

    /// Build the session key secret, generating one if none was configured
    pub fn server_secret(&self) -> Result<ServerSecret> {
        match &self.secret {
            Some(secret) => ServerSecret::new(secret),
            None => {
                warn!(
                    "{} not set, generating a random secret; session keys will not survive a restart",
                    SECRET_VAR
                );
                ServerSecret::generate()
            }
        }
    }
}

/// Parse a pool size
///
/// Negative values are an invalid argument; zero is rejected as a
/// configuration error since the server could never accept anyone.
pub fn parse_pool_size(raw: &str) -> Result<usize> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{} is not an integer: '{}'", POOL_SIZE_VAR, raw)))?;

    if value < 0 {
        return Err(AppError::InvalidArgument(format!(
            "pool size must not be negative, got {}",
            value
        )));
    }
    if value == 0 {
        return Err(AppError::Config(format!("{} must be positive", POOL_SIZE_VAR)));
    }

    usize::try_from(value)
        .map_err(|_| AppError::Config(format!("{} is too large: {}", POOL_SIZE_VAR, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_vars(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_sources(None, no_vars).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.max_pool_size, 10);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_sources(Some("0.0.0.0:9000".to_string()), |name| {
            match name {
                POOL_SIZE_VAR => Some("3".to_string()),
                SECRET_VAR => Some("S1".to_string()),
                _ => None,
            }
        })
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.max_pool_size, 3);
        assert_eq!(config.secret.as_deref(), Some("S1"));
    }

    #[test]
    fn test_negative_pool_size() {
        assert!(matches!(parse_pool_size("-1"), Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn test_zero_and_garbage_pool_size() {
        assert!(matches!(parse_pool_size("0"), Err(AppError::Config(_))));
        assert!(matches!(parse_pool_size("ten"), Err(AppError::Config(_))));
        assert_eq!(parse_pool_size(" 7 ").unwrap(), 7);
    }

    #[test]
    fn test_empty_secret_rejected() {
        let result = ServerConfig::from_sources(None, |name| {
            (name == SECRET_VAR).then(String::new)
        });
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_configured_secret_is_used() {
        let config = ServerConfig {
            secret: Some("S1".to_string()),
            ..ServerConfig::default()
        };
        let secret = config.server_secret().unwrap();
        assert_eq!(
            secret.derive_key("alice"),
            ServerSecret::new("S1").unwrap().derive_key("alice")
        );
    }
}
