//! Collaborators of the connection state machine.
//!
//! The lifecycle manager never talks to a concrete engine. It asks an
//! [`EngineFactory`] for a PKI connection, a hub auth session and finally an
//! [`Engine`] bound to both, once per generation.

pub mod derive;
pub mod hub_auth;
pub mod standby;
pub mod token_cache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::schema::{CsrSubject, ServerCsrParameters};
use crate::lifecycle::events::EventSink;
use crate::vault::{SecretAuth, VaultError};

pub use derive::{derive_engine_settings, DerivedSettings, SdkOAuth};
pub use hub_auth::HubAuthSession;
pub use standby::{DefaultEngineFactory, StandbyEngine};
pub use token_cache::IdentityTokenCache;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("PKI connection failed: {0}")]
    Pki(String),

    #[error("Hub authentication failed: {0}")]
    Auth(String),

    #[error("Engine failed to start: {0}")]
    Start(String),

    #[error("Engine failed to stop: {0}")]
    Stop(String),

    #[error("Event rejected: {0}")]
    Event(String),

    #[error("Engine state unavailable: {0}")]
    State(String),

    #[error(transparent)]
    Backend(#[from] VaultError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Commands accepted by the state machine, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    CreateIntCa {
        subject: CsrSubject,
    },
    #[serde(rename_all = "camelCase")]
    CreateExtCa {
        root_cert: String,
        intermediate_chain: String,
        private_key: String,
    },
    CreateDfspServerCert {
        csr: ServerCsrParameters,
    },
    CreateDfspClientCert,
    CreateJws,
}

impl EngineEvent {
    /// Wire name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::CreateIntCa { .. } => "CREATE_INT_CA",
            EngineEvent::CreateExtCa { .. } => "CREATE_EXT_CA",
            EngineEvent::CreateDfspServerCert { .. } => "CREATE_DFSP_SERVER_CERT",
            EngineEvent::CreateDfspClientCert => "CREATE_DFSP_CLIENT_CERT",
            EngineEvent::CreateJws => "CREATE_JWS",
        }
    }
}

/// Secret-backend settings for the engine's PKI work.
#[derive(Debug, Clone, PartialEq)]
pub struct PkiSettings {
    pub endpoint: String,
    pub namespace: Option<String>,
    pub pki_mount: String,
    /// KV mount where the engine keeps its own state.
    pub kv_mount: String,
    pub server_role: String,
    pub client_role: String,
    pub auth: Option<SecretAuth>,
    pub sign_expiry_hours: u32,
    pub key_length: u32,
    pub key_algorithm: String,
    pub common_name: String,
}

/// Hub IAM login settings taken from the `mcm` section.
#[derive(Debug, Clone, PartialEq)]
pub struct HubAuthSettings {
    pub enabled: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub hub_iam_provider_url: Option<String>,
    pub token_refresh_margin: Duration,
}

/// Static infrastructure settings, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// PKI settings; `common_name` is overridden from the document per generation.
    pub pki: PkiSettings,
    pub port: u16,
    pub report_interval: Duration,
    pub refresh_interval: Duration,
    /// Backoff of the perpetual auth task.
    pub auth_retry_delay: Duration,
}

/// Everything an engine instance is bound to.
pub struct EngineConfig {
    pub engine_id: Uuid,
    pub settings: DerivedSettings,
    pub pki: Arc<dyn PkiConnection>,
    pub auth: Arc<dyn AuthSession>,
    pub events: EventSink,
}

#[async_trait]
pub trait Engine: Send + Sync {
    async fn start(&self) -> Result<(), EngineError>;

    async fn stop(&self) -> Result<(), EngineError>;

    async fn send_event(&self, event: EngineEvent) -> Result<(), EngineError>;

    /// Live state dump, one entry per sub-machine.
    fn state(&self) -> Result<Value, EngineError>;
}

/// Hub identity used by the engine for its upstream calls.
#[async_trait]
pub trait AuthSession: Send + Sync {
    async fn login(&self) -> Result<(), EngineError>;
}

pub trait PkiConnection: Send + Sync {
    /// Releases the backend session. Safe to call more than once.
    fn disconnect(&self);

    fn common_name(&self) -> &str;

    fn mount(&self) -> &str;
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn connect_pki(
        &self,
        settings: &PkiSettings,
    ) -> Result<Arc<dyn PkiConnection>, EngineError>;

    fn auth_session(
        &self,
        settings: HubAuthSettings,
        cache: IdentityTokenCache,
    ) -> Result<Arc<dyn AuthSession>, EngineError>;

    fn build_engine(&self, config: EngineConfig) -> Result<Arc<dyn Engine>, EngineError>;
}
