//! Vault-backed storage for the configuration document.
//!
//! The document lives in a KV v2 mount so every save creates a new version.
//! `initialize` logs in immediately and starts the token renewal task; all
//! other operations read the current session token at call time.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::renewal::TokenRenewer;
use crate::config::schema::{self, ConfigDocument};
use crate::config::yaml::to_quoted_yaml;
use crate::error::AgentError;
use crate::interface::SecretClient;
use crate::vault::auth::{authenticate, require_auth, SecretAuth};
use crate::vault::common::has_kv_payload;
use crate::vault::{kv_data_path, kv_metadata_path, kv_version_path, SecretSession, VaultClient};

const COMPONENT: &str = "ConfigStore";

/// Where the store lives and how it authenticates.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub endpoint: String,
    /// Vault Enterprise namespace; `None` for the root namespace.
    pub namespace: Option<String>,
    /// Versioned KV mount holding the document.
    pub kv_mount: String,
    pub pki_mount: String,
    pub auth: Option<SecretAuth>,
    /// How often the renewal task looks at the token.
    pub token_check_interval: Duration,
    /// Re-login when the remaining TTL is below this.
    pub renewal_threshold: Duration,
}

impl StoreSettings {
    pub fn new(endpoint: &str, kv_mount: &str, pki_mount: &str, auth: Option<SecretAuth>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            namespace: None,
            kv_mount: kv_mount.to_string(),
            pki_mount: pki_mount.to_string(),
            auth,
            token_check_interval: Duration::from_secs(60),
            renewal_threshold: Duration::from_secs(300),
        }
    }
}

/// One entry of the KV v2 version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub version: u64,
    #[serde(default)]
    pub created_time: String,
    #[serde(default)]
    pub deletion_time: String,
    #[serde(default)]
    pub destroyed: bool,
}

struct Renewal {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ConfigStore {
    settings: StoreSettings,
    client: Option<Arc<dyn SecretClient>>,
    session: Option<Arc<RwLock<SecretSession>>>,
    renewal: Option<Renewal>,
}

impl ConfigStore {
    /// A store that builds its own [`VaultClient`] on `initialize`.
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            settings,
            client: None,
            session: None,
            renewal: None,
        }
    }

    /// A store over an existing client.
    pub fn with_client(settings: StoreSettings, client: Arc<dyn SecretClient>) -> Self {
        Self {
            settings,
            client: Some(client),
            session: None,
            renewal: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Authenticates and starts background token renewal.
    pub async fn initialize(&mut self) -> Result<(), AgentError> {
        info!(endpoint = %self.settings.endpoint, "Initializing Vault configuration storage");

        let auth = require_auth(self.settings.auth.as_ref())?.clone();
        // Resolve credentials before touching the network.
        auth.app_role_credentials()?;

        let client: Arc<dyn SecretClient> = match &self.client {
            Some(client) => client.clone(),
            None => Arc::new(
                VaultClient::new(&self.settings.endpoint)?
                    .with_namespace(self.settings.namespace.as_deref())?,
            ),
        };

        let login = authenticate(client.as_ref(), &auth).await?;
        debug!(ttl = login.lease_duration, "Vault authenticated via AppRole");
        let session = Arc::new(RwLock::new(SecretSession::new(login, auth.method())));

        self.stop_renewal();
        let renewer = TokenRenewer::new(
            client.clone(),
            session.clone(),
            auth,
            self.settings.renewal_threshold,
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(renewer.run(self.settings.token_check_interval, cancel.clone()));

        self.client = Some(client);
        self.session = Some(session);
        self.renewal = Some(Renewal { cancel, handle });
        Ok(())
    }

    /// Client plus the token to use for exactly one call.
    async fn access(&self) -> Result<(Arc<dyn SecretClient>, String), AgentError> {
        match (&self.client, &self.session) {
            (Some(client), Some(session)) => {
                let token = session.read().await.token().to_string();
                Ok((client.clone(), token))
            }
            _ => Err(AgentError::NotInitialized(COMPONENT)),
        }
    }

    /// Loads and validates the current document.
    pub async fn load(&self, config_path: &str) -> Result<ConfigDocument, AgentError> {
        let (client, token) = self.access().await?;
        let path = kv_data_path(&self.settings.kv_mount, config_path);
        debug!(%path, "Loading configuration from Vault");

        let result = read_document(client.as_ref(), &token, &path)
            .await
            .and_then(|payload| payload.ok_or_else(|| {
                AgentError::NotFound(format!("Configuration not found at {}", path))
            }));

        match result {
            Ok(payload) => {
                let doc = schema::validate(payload)?;
                info!("Configuration loaded from Vault");
                Ok(doc)
            }
            Err(e) => {
                error!(%path, error = %e, "Failed to load configuration from Vault");
                Err(e)
            }
        }
    }

    /// Validates `doc` and writes the validated form as a new version.
    pub async fn save<D: Serialize + ?Sized>(
        &self,
        config_path: &str,
        doc: &D,
    ) -> Result<ConfigDocument, AgentError> {
        let (client, token) = self.access().await?;
        let validated = schema::validate(serde_json::to_value(doc)?)?;
        let path = kv_data_path(&self.settings.kv_mount, config_path);
        debug!(%path, "Saving configuration to Vault");

        let body = json!({ "data": validated.to_value()? });
        match client.write(&token, &path, body).await {
            Ok(_) => {
                info!("Configuration saved to Vault");
                Ok(validated)
            }
            Err(e) => {
                error!(%path, error = %e, "Failed to save configuration to Vault");
                Err(e.into())
            }
        }
    }

    /// Best effort: any failure, including not being initialized, is `false`.
    pub async fn exists(&self, config_path: &str) -> bool {
        let Ok((client, token)) = self.access().await else {
            return false;
        };
        let path = kv_data_path(&self.settings.kv_mount, config_path);

        match read_document(client.as_ref(), &token, &path).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                debug!(%path, error = %e, "Configuration existence check failed");
                false
            }
        }
    }

    /// Version history, oldest first. Failures yield an empty list.
    pub async fn versions(&self, config_path: &str) -> Result<Vec<ConfigVersion>, AgentError> {
        let (client, token) = self.access().await?;
        let path = kv_metadata_path(&self.settings.kv_mount, config_path);

        match client.read(&token, &path).await {
            Ok(Some(body)) => Ok(parse_versions(&body)),
            Ok(None) => Ok(Vec::new()),
            Err(e) => {
                error!(%path, error = %e, "Failed to get configuration versions");
                Ok(Vec::new())
            }
        }
    }

    /// Loads one specific version.
    pub async fn version(
        &self,
        config_path: &str,
        version: u64,
    ) -> Result<ConfigDocument, AgentError> {
        let (client, token) = self.access().await?;
        let path = kv_version_path(&self.settings.kv_mount, config_path, version);

        let result = read_document(client.as_ref(), &token, &path)
            .await
            .and_then(|payload| payload.ok_or_else(|| {
                AgentError::NotFound(format!("Configuration version {} not found", version))
            }));

        match result {
            Ok(payload) => Ok(schema::validate(payload)?),
            Err(e) => {
                error!(%path, version, error = %e, "Failed to get configuration version");
                Err(e)
            }
        }
    }

    /// Writes the validated document to a YAML file with every string
    /// double-quoted.
    pub async fn export_to_yaml(&self, config_path: &str, file: &Path) -> Result<(), AgentError> {
        let doc = self.load(config_path).await?;
        let yaml = to_quoted_yaml(&doc.to_value()?)?;
        tokio::fs::write(file, yaml).await?;
        info!(file = %file.display(), "Configuration exported to YAML");
        Ok(())
    }

    /// Reads a YAML file, validates it and saves it.
    pub async fn import_from_yaml(
        &self,
        config_path: &str,
        file: &Path,
    ) -> Result<ConfigDocument, AgentError> {
        if !tokio::fs::try_exists(file).await.unwrap_or(false) {
            return Err(AgentError::NotFound(format!(
                "YAML file not found: {}",
                file.display()
            )));
        }
        let content = tokio::fs::read_to_string(file).await?;
        let value: Value = serde_yaml::from_str(&content)?;
        let validated = schema::validate(value)?;
        let saved = self.save(config_path, &validated).await?;
        info!(file = %file.display(), "Configuration imported from YAML");
        Ok(saved)
    }

    /// Deletes the current version. Failures propagate.
    pub async fn delete(&self, config_path: &str) -> Result<(), AgentError> {
        let (client, token) = self.access().await?;
        let path = kv_data_path(&self.settings.kv_mount, config_path);

        match client.delete(&token, &path).await {
            Ok(()) => {
                info!(%path, "Configuration deleted from Vault");
                Ok(())
            }
            Err(e) => {
                error!(%path, error = %e, "Failed to delete configuration");
                Err(e.into())
            }
        }
    }

    /// Link to the document in the Vault web UI.
    pub fn ui_url(&self, config_path: &str) -> String {
        format!(
            "{}/ui/vault/secrets/{}/show/{}",
            self.settings.endpoint, self.settings.kv_mount, config_path
        )
    }

    /// Stops token renewal. The store stays usable until the token expires.
    pub fn shutdown(&mut self) {
        self.stop_renewal();
    }

    fn stop_renewal(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.cancel.cancel();
            renewal.handle.abort();
        }
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        self.stop_renewal();
    }
}

/// Reads a KV v2 data path and returns the stored payload, if any.
async fn read_document(
    client: &dyn SecretClient,
    token: &str,
    path: &str,
) -> Result<Option<Value>, AgentError> {
    let body = client.read(token, path).await?;
    Ok(body
        .filter(has_kv_payload)
        .and_then(|mut body| body.get_mut("data").map(|d| d["data"].take())))
}

fn parse_versions(body: &Value) -> Vec<ConfigVersion> {
    let Some(versions) = body
        .get("data")
        .and_then(|d| d.get("versions"))
        .and_then(|v| v.as_object())
    else {
        return Vec::new();
    };

    let mut list: Vec<ConfigVersion> = versions
        .iter()
        .filter_map(|(key, meta)| {
            let version = key.parse::<u64>().ok()?;
            let mut meta = meta.clone();
            meta["version"] = json!(version);
            serde_json::from_value(meta).ok()
        })
        .collect();
    list.sort_by_key(|v| v.version);
    list
}
