//! Vault module for the MCM agent
//!
//! This module implements the low-level pieces for talking to HashiCorp Vault:
//! the HTTP client, AppRole authentication, session bookkeeping and the PKI
//! connection handed to the connection state machine.
//!
//! ## Architectural role:
//! - Implements raw secret-backend operations behind [`crate::interface::SecretClient`]
//! - Is used by `config::store` for the configuration document and by the
//!   engine factory for PKI operations
//! - Knows nothing about the configuration schema or the engine lifecycle
//!
//! ## Testing strategy:
//! - Each module contains its own unit tests within a `#[cfg(test)] mod tests` block
//! - Tests that need a real Vault live in `tests/integration.rs`, run a dev
//!   Vault container and are ignored by default

pub mod auth;
pub mod client;
pub mod common;
pub mod error;
pub mod pki;
pub mod session;

// Re-export key types for convenience
pub use auth::{AppRoleCredentials, AuthMethod, CredentialSource, SecretAuth};
pub use client::VaultClient;
pub use error::VaultError;
pub use pki::VaultPkiConnection;
pub use session::{LoginResponse, SecretSession, TokenInfo};

/// KV v2 path of the current document.
pub fn kv_data_path(mount: &str, path: &str) -> String {
    format!("{}/data/{}", mount, path)
}

/// KV v2 path of the version metadata.
pub fn kv_metadata_path(mount: &str, path: &str) -> String {
    format!("{}/metadata/{}", mount, path)
}

/// KV v2 path of one specific version.
pub fn kv_version_path(mount: &str, path: &str, version: u64) -> String {
    format!("{}?version={}", kv_data_path(mount, path), version)
}
