//! PKI-mount connection handed to the connection state machine.
//!
//! The connection owns its own Vault login, separate from the configuration
//! store's session, and is released on `stop` and on every reload.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::engine::{EngineError, PkiConnection, PkiSettings};
use crate::interface::SecretClient;
use crate::vault::auth::{authenticate, require_auth};
use crate::vault::VaultClient;

pub struct VaultPkiConnection {
    settings: PkiSettings,
    token: Mutex<Option<String>>,
}

impl VaultPkiConnection {
    /// Connects with a fresh HTTP client for `settings.endpoint`.
    pub async fn connect(settings: &PkiSettings) -> Result<Self, EngineError> {
        let client = VaultClient::new(&settings.endpoint)?.with_namespace(settings.namespace.as_deref())?;
        Self::connect_with(Arc::new(client), settings).await
    }

    /// Logs in over an existing client.
    pub async fn connect_with(
        client: Arc<dyn SecretClient>,
        settings: &PkiSettings,
    ) -> Result<Self, EngineError> {
        let auth = require_auth(settings.auth.as_ref()).map_err(|e| EngineError::Pki(e.to_string()))?;
        let login = authenticate(client.as_ref(), auth)
            .await
            .map_err(|e| EngineError::Pki(e.to_string()))?;
        info!(
            mount = %settings.pki_mount,
            common_name = %settings.common_name,
            "Connected to Vault PKI"
        );
        Ok(Self {
            settings: settings.clone(),
            token: Mutex::new(Some(login.client_token)),
        })
    }
}

impl PkiConnection for VaultPkiConnection {
    fn disconnect(&self) {
        if let Ok(mut token) = self.token.lock() {
            if token.take().is_some() {
                debug!(mount = %self.settings.pki_mount, "Disconnected from Vault PKI");
            }
        }
    }

    fn common_name(&self) -> &str {
        &self.settings.common_name
    }

    fn mount(&self) -> &str {
        &self.settings.pki_mount
    }
}
