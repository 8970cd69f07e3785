//! Session state held between a login and the next re-authentication.

use std::time::Duration;

use serde::Deserialize;

use crate::vault::auth::AuthMethod;

/// Result of an AppRole login (`auth` block of the login response).
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub client_token: String,
    /// Token TTL in seconds as granted at login.
    #[serde(default)]
    pub lease_duration: u64,
}

/// Subset of `auth/token/lookup-self` the renewal task needs.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    /// Remaining TTL in seconds.
    pub ttl: u64,
}

/// The bearer token currently used against the secret backend.
///
/// One session lives for the lifetime of a `ConfigStore`; re-authentication
/// swaps the token in place via [`SecretSession::refresh`].
#[derive(Debug, Clone)]
pub struct SecretSession {
    token: String,
    ttl: Duration,
    method: AuthMethod,
    renewals: u64,
}

impl SecretSession {
    pub fn new(login: LoginResponse, method: AuthMethod) -> Self {
        Self {
            token: login.client_token,
            ttl: Duration::from_secs(login.lease_duration),
            method,
            renewals: 0,
        }
    }

    pub fn refresh(&mut self, login: LoginResponse) {
        self.token = login.client_token;
        self.ttl = Duration::from_secs(login.lease_duration);
        self.renewals += 1;
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// TTL granted at the last login. The live TTL comes from `token_info`.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    /// Number of times the token was replaced since the first login.
    pub fn renewals(&self) -> u64 {
        self.renewals
    }
}
