//! Authentication descriptors for the secret backend and the login routine
//! shared by first login and every later re-authentication.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AgentError;
use crate::interface::SecretClient;
use crate::vault::session::LoginResponse;

/// Which auth method produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    AppRole,
    Kubernetes,
}

/// Where a credential value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Literal(String),
    /// File whose trimmed contents are the credential.
    File(PathBuf),
}

impl CredentialSource {
    pub fn resolve(&self) -> Result<String, AgentError> {
        match self {
            CredentialSource::Literal(value) => Ok(value.clone()),
            CredentialSource::File(path) => {
                if !path.exists() {
                    return Err(AgentError::Configuration(format!(
                        "File {} doesn't exist",
                        path.display()
                    )));
                }
                std::fs::read_to_string(path)
                    .map(|s| s.trim().to_string())
                    .map_err(|e| {
                        AgentError::Configuration(format!(
                            "Failed to read {}: {}",
                            path.display(),
                            e
                        ))
                    })
            }
        }
    }
}

/// Credentials for AppRole authentication.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppRoleCredentials {
    /// The role_id for AppRole authentication.
    pub role_id: String,
    /// The secret_id for AppRole authentication.
    pub secret_id: String,
}

impl fmt::Debug for AppRoleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppRoleCredentials")
            .field("role_id", &self.role_id)
            .field("secret_id", &"[REDACTED]")
            .finish()
    }
}

/// Exactly one way of logging in to the secret backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretAuth {
    AppRole {
        role_id: CredentialSource,
        secret_id: CredentialSource,
    },
    /// Recognized but not supported: login always fails with a configuration error.
    Kubernetes { role: String, token_file: PathBuf },
}

impl SecretAuth {
    pub fn method(&self) -> AuthMethod {
        match self {
            SecretAuth::AppRole { .. } => AuthMethod::AppRole,
            SecretAuth::Kubernetes { .. } => AuthMethod::Kubernetes,
        }
    }

    /// Resolves the AppRole pair, reading credential files if needed.
    pub fn app_role_credentials(&self) -> Result<AppRoleCredentials, AgentError> {
        match self {
            SecretAuth::AppRole { role_id, secret_id } => Ok(AppRoleCredentials {
                role_id: role_id.resolve()?,
                secret_id: secret_id.resolve()?,
            }),
            SecretAuth::Kubernetes { .. } => Err(AgentError::Configuration(
                "K8s auth not yet supported".to_string(),
            )),
        }
    }
}

/// Fails with a configuration error when no descriptor was supplied.
pub fn require_auth(auth: Option<&SecretAuth>) -> Result<&SecretAuth, AgentError> {
    auth.ok_or_else(|| AgentError::Configuration("Vault auth configuration is required".into()))
}

/// Logs in with the given descriptor.
///
/// Credential files are re-read on every call so a rotated secret id is
/// picked up by the next re-authentication.
pub async fn authenticate(
    client: &dyn SecretClient,
    auth: &SecretAuth,
) -> Result<LoginResponse, AgentError> {
    let creds = auth.app_role_credentials()?;
    debug!(role_id = %creds.role_id, "Logging in to Vault via AppRole");
    client
        .login_approle(&creds)
        .await
        .map_err(|e| AgentError::Authentication(format!("AppRole login failed: {}", e)))
}
