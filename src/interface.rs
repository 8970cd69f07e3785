use crate::vault::auth::AppRoleCredentials;
use crate::vault::session::{LoginResponse, TokenInfo};
use crate::vault::VaultError;
use async_trait::async_trait;
use serde_json::Value;

/// Raw secret-backend operations the configuration store and the PKI
/// connection are built on.
///
/// Paths are logical Vault paths such as `secret/data/mcm-agent/config`;
/// implementations add the API prefix. Every call takes the token to use so
/// callers always pass the latest one.
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Exchange an AppRole pair for a client token
    async fn login_approle(&self, creds: &AppRoleCredentials) -> Result<LoginResponse, VaultError>;

    /// Read a path. A 404 is `Ok(None)`.
    async fn read(&self, token: &str, path: &str) -> Result<Option<Value>, VaultError>;

    /// Write a JSON body to a path
    async fn write(&self, token: &str, path: &str, body: Value) -> Result<Value, VaultError>;

    /// Delete a path
    async fn delete(&self, token: &str, path: &str) -> Result<(), VaultError>;

    /// Look up the calling token
    async fn token_info(&self, token: &str) -> Result<TokenInfo, VaultError>;
}
