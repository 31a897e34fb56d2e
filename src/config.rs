//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::service::{Authenticator, OpenAuthenticator, StaticAuthenticator};

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Period of the update flush tick.
    pub update_interval: Duration,

    /// Envelopes a connection may have queued before pushes to it fail.
    pub outbound_queue_capacity: usize,

    /// `login:password` pairs. Empty means any non-empty login is accepted.
    pub auth_users: Vec<(String, String)>,

    /// Timeout applied to REST requests.
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            update_interval: Duration::from_millis(30),
            outbound_queue_capacity: 1024,
            auth_users: Vec::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr: SocketAddr = match std::env::var("LISTEN_ADDR") {
            Ok(addr) => addr.parse()?,
            Err(_) => defaults.listen_addr,
        };

        let update_interval = Duration::from_millis(parse_env("UPDATE_INTERVAL_MS", 30));
        let outbound_queue_capacity =
            parse_env("OUTBOUND_QUEUE_CAPACITY", defaults.outbound_queue_capacity);
        let auth_users = std::env::var("AUTH_USERS")
            .map(|users| parse_users(&users))
            .unwrap_or_default();
        let request_timeout = Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", 30));

        Ok(Self {
            listen_addr,
            update_interval,
            outbound_queue_capacity,
            auth_users,
            request_timeout,
        })
    }

    /// Builds the credential backend selected by `auth_users`.
    #[must_use]
    pub fn authenticator(&self) -> Arc<dyn Authenticator> {
        let table = StaticAuthenticator::new(self.auth_users.iter().cloned());
        if table.is_empty() {
            tracing::warn!("AUTH_USERS not set, accepting any non-empty login");
            return Arc::new(OpenAuthenticator);
        }
        tracing::info!(logins = table.len(), "static credentials loaded");
        Arc::new(table)
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses `login:password,login:password`, skipping malformed entries.
fn parse_users(users: &str) -> Vec<(String, String)> {
    users.split(',')
        .filter_map(|entry| entry.trim().split_once(':'))
        .filter(|(login, _)| !login.is_empty())
        .map(|(login, password)| (login.to_string(), password.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_users_skips_malformed_entries() {
        let users = parse_users("alice:secret, bob:pw,broken,:anon");
        assert_eq!(
            users,
            vec![
                ("alice".to_string(), "secret".to_string()),
                ("bob".to_string(), "pw".to_string()),
            ]
        );
    }

    #[test]
    fn empty_user_list_selects_open_authenticator() {
        let config = GatewayConfig::default();
        assert!(config.authenticator().authenticate("anyone", ""));
    }

    #[test]
    fn configured_users_are_enforced() {
        let config = GatewayConfig {
            auth_users: vec![("alice".to_string(), "secret".to_string())],
            ..GatewayConfig::default()
        };
        let auth = config.authenticator();
        assert!(auth.authenticate("alice", "secret"));
        assert!(!auth.authenticate("anyone", ""));
    }
}
