//! Owner of the connection state machine.
//!
//! Every `initialize` builds a new generation: a PKI connection, a hub auth
//! session with its own token cache, the perpetual auth task and the engine.
//! Generations are replaced, never patched. Lifecycle calls take `&mut self`,
//! so callers sharing a manager serialize them behind their own lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::schema::ConfigDocument;
use crate::engine::derive::{derive_engine_settings, hub_auth_settings, pki_settings};
use crate::engine::{
    Engine, EngineConfig, EngineEvent, EngineFactory, EngineSettings, IdentityTokenCache,
    PkiConnection,
};
use crate::error::AgentError;
use crate::lifecycle::auth_loop::AuthLoop;
use crate::lifecycle::events::{EventSink, LifecycleEvent};
use crate::lifecycle::status::EngineStatus;

const COMPONENT: &str = "State machine";

struct Generation {
    id: u64,
    engine_id: Uuid,
    engine: Arc<dyn Engine>,
    pki: Arc<dyn PkiConnection>,
    token_cache: IdentityTokenCache,
    relogin: Arc<Notify>,
    cancel: CancellationToken,
    auth_task: JoinHandle<()>,
}

impl Drop for Generation {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.auth_task.abort();
    }
}

pub struct ClientLifecycleManager {
    document: ConfigDocument,
    settings: EngineSettings,
    factory: Arc<dyn EngineFactory>,
    status: Arc<Mutex<EngineStatus>>,
    events: EventSink,
    current_generation: Arc<AtomicU64>,
    generation: Option<Generation>,
}

impl ClientLifecycleManager {
    pub fn new(
        document: ConfigDocument,
        settings: EngineSettings,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            document,
            settings,
            factory,
            status: Arc::new(Mutex::new(EngineStatus::default())),
            events: EventSink::new(),
            current_generation: Arc::new(AtomicU64::new(0)),
            generation: None,
        }
    }

    /// Registers the lifecycle listener, replacing any earlier one.
    pub fn subscribe(&self) -> UnboundedReceiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.document
    }

    pub fn has_engine(&self) -> bool {
        self.generation.is_some()
    }

    async fn is_running(&self) -> bool {
        self.status.lock().await.running
    }

    async fn record_error(&self, err: &AgentError) {
        let message = err.to_string();
        self.status.lock().await.last_error = Some(message.clone());
        self.events.emit(LifecycleEvent::Error(message));
    }

    /// Builds a new generation from the current document.
    ///
    /// On failure nothing of the new generation is retained and the status
    /// is left uninitialized.
    pub async fn initialize(&mut self) -> Result<(), AgentError> {
        info!("Initializing MCM client");
        if self.is_running().await {
            return Err(AgentError::Lifecycle(
                "State machine is running; stop or reload it first".into(),
            ));
        }

        self.discard_generation();
        let id = self.current_generation.fetch_add(1, Ordering::SeqCst) + 1;

        match self.build_generation(id).await {
            Ok(generation) => {
                {
                    let mut status = self.status.lock().await;
                    status.initialized = true;
                    status.engine_id = Some(generation.engine_id.to_string());
                }
                info!(generation = id, engine_id = %generation.engine_id, "MCM client initialized");
                self.generation = Some(generation);
                self.events.emit(LifecycleEvent::Initialized);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize MCM client");
                {
                    let mut status = self.status.lock().await;
                    status.initialized = false;
                    status.engine_id = None;
                }
                self.record_error(&e).await;
                Err(e)
            }
        }
    }

    async fn build_generation(&self, id: u64) -> Result<Generation, AgentError> {
        let pki_settings = pki_settings(&self.document, &self.settings);
        if pki_settings.auth.is_none() {
            return Err(AgentError::Configuration(
                "Vault auth configuration is required".into(),
            ));
        }
        let pki = self.factory.connect_pki(&pki_settings).await?;

        let token_cache = IdentityTokenCache::new();
        let auth = match self
            .factory
            .auth_session(hub_auth_settings(&self.document), token_cache.clone())
        {
            Ok(auth) => auth,
            Err(e) => {
                pki.disconnect();
                return Err(e.into());
            }
        };

        let cancel = CancellationToken::new();
        let relogin = Arc::new(Notify::new());
        let auth_task = tokio::spawn(
            AuthLoop {
                session: auth.clone(),
                status: self.status.clone(),
                generation: id,
                current_generation: self.current_generation.clone(),
                cancel: cancel.clone(),
                relogin: relogin.clone(),
                retry_delay: self.settings.auth_retry_delay,
            }
            .run(),
        );

        let engine_id = Uuid::new_v4();
        let derived = derive_engine_settings(&self.document, &self.settings);
        info!(
            port = derived.port,
            report_interval_secs = derived.report_interval.as_secs(),
            refresh_interval_secs = derived.refresh_interval.as_secs(),
            cert_expiry_threshold_days = derived.cert_expiry_threshold_days,
            callback_url = %derived.callback_url,
            whitelist_ip = ?derived.whitelist_ip,
            "State machine config values"
        );

        let config = EngineConfig {
            engine_id,
            settings: derived,
            pki: pki.clone(),
            auth,
            events: self.events.clone(),
        };
        match self.factory.build_engine(config) {
            Ok(engine) => Ok(Generation {
                id,
                engine_id,
                engine,
                pki,
                token_cache,
                relogin,
                cancel,
                auth_task,
            }),
            Err(e) => {
                cancel.cancel();
                auth_task.abort();
                pki.disconnect();
                Err(e.into())
            }
        }
    }

    /// Drops the current generation without stopping its engine.
    fn discard_generation(&mut self) {
        if let Some(generation) = self.generation.take() {
            debug!(generation = generation.id, "Discarding engine generation");
            generation.pki.disconnect();
            generation.token_cache.clear();
        }
    }

    /// Initializes a fresh generation and starts its engine.
    pub async fn start(&mut self) -> Result<(), AgentError> {
        if self.is_running().await {
            return Err(AgentError::Lifecycle("State machine is already running".into()));
        }
        info!("Starting MCM client");

        if let Err(e) = self.initialize().await {
            self.status.lock().await.running = false;
            return Err(e);
        }

        let engine = match self.generation.as_ref() {
            Some(generation) => generation.engine.clone(),
            None => return Err(AgentError::NotInitialized(COMPONENT)),
        };

        info!("Starting MCM client state machine");
        match engine.start().await {
            Ok(()) => {
                {
                    let mut status = self.status.lock().await;
                    status.running = true;
                    status.clear_retry();
                }
                self.events.emit(LifecycleEvent::Started);
                info!("MCM client state machine started successfully");
                Ok(())
            }
            Err(e) => {
                let err = AgentError::from(e);
                error!(error = %err, "Failed to start MCM client");
                self.status.lock().await.running = false;
                self.record_error(&err).await;
                Err(err)
            }
        }
    }

    /// Stops the engine and releases its PKI connection. No-op without an engine.
    pub async fn stop(&mut self) -> Result<(), AgentError> {
        let Some(generation) = self.generation.as_ref() else {
            return Ok(());
        };
        info!("Stopping MCM client state machine");

        match generation.engine.stop().await {
            Ok(()) => {
                generation.pki.disconnect();
                self.status.lock().await.running = false;
                self.events.emit(LifecycleEvent::Stopped);
                info!("MCM client state machine stopped");
                Ok(())
            }
            Err(e) => {
                let err = AgentError::from(e);
                error!(error = %err, "Failed to stop MCM client state machine");
                self.record_error(&err).await;
                Err(err)
            }
        }
    }

    /// Replaces the document and restarts on a fresh generation.
    ///
    /// Always ends in `start`, so a stopped manager is started by a reload.
    pub async fn reload(&mut self, document: ConfigDocument) -> Result<(), AgentError> {
        info!("Reloading MCM client configuration");
        if self.is_running().await {
            info!("Stopping state machine for configuration reload");
            self.stop().await?;
        }

        self.document = document;
        if self.generation.is_some() {
            info!("Identity token cache reset for configuration reload");
        }
        self.discard_generation();
        self.status.lock().await.initialized = false;

        info!("Reinitializing with new configuration");
        self.start().await?;

        self.events.emit(LifecycleEvent::Reloaded);
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Current status plus the engine's live state, when it can be read.
    pub async fn status(&self) -> EngineStatus {
        let mut snapshot = self.status.lock().await.clone();
        if let Some(generation) = self.generation.as_ref() {
            match generation.engine.state() {
                Ok(states) => {
                    snapshot.current_state = serde_json::to_string(&states).ok();
                    snapshot.states = Some(states);
                }
                Err(e) => debug!(error = %e, "Failed to get state machine state"),
            }
        }
        snapshot
    }

    /// Forwards an event to the live engine.
    pub async fn send_event(&self, event: EngineEvent) -> Result<(), AgentError> {
        let generation = self
            .generation
            .as_ref()
            .ok_or(AgentError::NotInitialized(COMPONENT))?;
        info!(event = event.kind(), "Forwarding event to state machine");
        generation.engine.send_event(event).await?;
        Ok(())
    }

    /// Wakes the auth task of the current generation for a fresh login.
    pub fn notify_auth_config_updated(&self) {
        match self.generation.as_ref() {
            Some(generation) => {
                info!("Auth config updated - will re-authenticate");
                generation.relogin.notify_one();
            }
            None => debug!("Auth config updated with no active generation"),
        }
    }

    /// Stops a running engine and tears down the current generation.
    pub async fn shutdown(&mut self) {
        if self.is_running().await {
            if let Err(e) = self.stop().await {
                warn!(error = %e, "State machine did not stop cleanly during shutdown");
            }
        }
        self.discard_generation();
        self.status.lock().await.initialized = false;
        info!("MCM client shut down");
    }
}
