//! Boot sequence and main loop of the agent.
//!
//! Boot authenticates the store, seeds the default document on first run,
//! loads it and hands it to the lifecycle manager. The main loop then waits
//! for signals: SIGHUP reloads from Vault, SIGINT/SIGTERM shut down.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigDocument, ConfigStore};
use crate::engine::{DefaultEngineFactory, EngineFactory};
use crate::error::AgentError;
use crate::lifecycle::{ClientLifecycleManager, LifecycleEvent};
use crate::settings::AgentSettings;

/// Saves the default document when nothing is stored at `config_path`.
///
/// Returns whether a document was seeded.
pub async fn seed_default_config(
    store: &ConfigStore,
    config_path: &str,
    default_file: &Path,
) -> Result<bool, AgentError> {
    if store.exists(config_path).await {
        return Ok(false);
    }
    info!(
        file = %default_file.display(),
        "Configuration not found in Vault, loading default configuration"
    );

    let content = tokio::fs::read_to_string(default_file).await.map_err(|e| {
        AgentError::Configuration(format!(
            "Failed to read default configuration {}: {}",
            default_file.display(),
            e
        ))
    })?;
    let value: Value = serde_json::from_str(&content)?;
    store.save(config_path, &value).await?;
    info!(
        vault_ui_url = %store.ui_url(config_path),
        "Default configuration saved to Vault"
    );
    Ok(true)
}

/// Persists `document` and restarts the engine on it.
///
/// Nothing is reloaded when validation or the write fails.
pub async fn apply_config_update(
    store: &ConfigStore,
    manager: &mut ClientLifecycleManager,
    config_path: &str,
    document: &Value,
) -> Result<ConfigDocument, AgentError> {
    let saved = store.save(config_path, document).await?;
    manager.reload(saved.clone()).await?;
    Ok(saved)
}

/// Re-reads the stored document and reloads the engine with it.
pub async fn reload_from_store(
    store: &ConfigStore,
    manager: &mut ClientLifecycleManager,
    config_path: &str,
) -> Result<(), AgentError> {
    let document = store.load(config_path).await?;
    manager.reload(document).await
}

pub struct Agent {
    settings: AgentSettings,
    store: ConfigStore,
    manager: Arc<Mutex<ClientLifecycleManager>>,
}

impl Agent {
    /// Boots against Vault with the engine linked into the binary.
    pub async fn boot(settings: AgentSettings) -> Result<Self, AgentError> {
        let store = ConfigStore::new(settings.store_settings());
        Self::boot_with(settings, store, Arc::new(DefaultEngineFactory)).await
    }

    /// Boots with an uninitialized store and a custom engine factory.
    pub async fn boot_with(
        settings: AgentSettings,
        mut store: ConfigStore,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self, AgentError> {
        info!("Starting MCM Agent");
        store.initialize().await?;

        seed_default_config(&store, &settings.config_path, &settings.default_config_file).await?;
        let document = store.load(&settings.config_path).await?;
        info!("Configuration loaded from Vault");

        let manager = ClientLifecycleManager::new(document, settings.engine_settings(), factory);
        Ok(Self {
            settings,
            store,
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn manager(&self) -> Arc<Mutex<ClientLifecycleManager>> {
        self.manager.clone()
    }

    /// Starts the engine and spawns the task that logs lifecycle events.
    ///
    /// A failed start is logged, not returned: the daemon keeps running so a
    /// later reload can recover.
    pub async fn start(&self) {
        let mut manager = self.manager.lock().await;
        let mut events = manager.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    LifecycleEvent::Error(message) => error!(%message, "MCM client error"),
                    LifecycleEvent::StateChange(state) => {
                        debug!(%state, "State machine transition")
                    }
                    other => info!(event = other.name(), "MCM client lifecycle event"),
                }
            }
        });

        if let Err(e) = manager.start().await {
            error!(error = %e, "MCM client failed to start");
        }
    }

    pub async fn reload(&self) -> Result<(), AgentError> {
        let mut manager = self.manager.lock().await;
        reload_from_store(&self.store, &mut manager, &self.settings.config_path).await
    }

    /// Stops the engine and the token renewal.
    pub async fn shutdown(mut self) {
        self.manager.lock().await.shutdown().await;
        self.store.shutdown();
        info!("MCM Agent stopped");
    }

    /// Starts the engine and serves signals until asked to stop.
    pub async fn run(self) -> Result<(), AgentError> {
        self.start().await;
        info!("MCM Agent started successfully");

        let mut signals = Signals::new()?;
        loop {
            match signals.next().await {
                DaemonSignal::Reload => {
                    info!("Reloading configuration on SIGHUP");
                    if let Err(e) = self.reload().await {
                        warn!(error = %e, "Configuration reload failed");
                    }
                }
                DaemonSignal::Shutdown(name) => {
                    info!(signal = name, "Shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }
}

enum DaemonSignal {
    Reload,
    Shutdown(&'static str),
}

#[cfg(unix)]
struct Signals {
    hangup: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> Result<Self, AgentError> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn next(&mut self) -> DaemonSignal {
        tokio::select! {
            _ = self.hangup.recv() => DaemonSignal::Reload,
            _ = self.terminate.recv() => DaemonSignal::Shutdown("SIGTERM"),
            _ = tokio::signal::ctrl_c() => DaemonSignal::Shutdown("SIGINT"),
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> Result<Self, AgentError> {
        Ok(Self)
    }

    async fn next(&mut self) -> DaemonSignal {
        let _ = tokio::signal::ctrl_c().await;
        DaemonSignal::Shutdown("SIGINT")
    }
}
