//! mcm-agent - MCM client agent daemon
//!
//! The agent keeps a DFSP's configuration document in a Vault KV v2 mount
//! and drives the connection state machine that talks to the hub's MCM
//! server.
//!
//! ## Architecture
//!
//! - `config` module - Document schema, the Vault-backed `ConfigStore` and
//!   background token renewal
//! - `lifecycle` module - `ClientLifecycleManager`: engine generations, the
//!   perpetual hub auth task, status and listener events
//! - `engine` module - The engine contract, settings derivation, hub OAuth
//!   session and the engine shipped with the binary
//! - `vault` module - HTTP client for Vault, AppRole login and the PKI
//!   connection handed to the engine
//! - `daemon` module - Boot sequence, seeding and the signal loop
//! - `cli` module - Command-line entry point
//!
//! Everything that talks to Vault goes through the `SecretClient` trait in
//! `interface`, so the store and the manager are tested against in-memory
//! doubles.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod interface;
pub mod lifecycle;
pub mod settings;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigDocument, ConfigStore, ConfigVersion, StoreSettings};
pub use daemon::Agent;
pub use error::AgentError;
pub use interface::SecretClient;
pub use lifecycle::{ClientLifecycleManager, EngineStatus, LifecycleEvent};
pub use settings::AgentSettings;

/// Initialize logging for tests
#[cfg(test)]
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}
