//! Engine linked into the shipped binary.
//!
//! `StandbyEngine` holds the generation's bindings and queues incoming events
//! as pending requests until a connection state machine takes over. It
//! issues no certificates.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{
    AuthSession, DerivedSettings, Engine, EngineConfig, EngineError, EngineEvent, EngineFactory,
    HubAuthSession, HubAuthSettings, IdentityTokenCache, PkiConnection, PkiSettings,
};
use crate::lifecycle::events::{EventSink, LifecycleEvent};
use crate::vault::VaultPkiConnection;

#[derive(Debug, Default)]
struct StandbyState {
    running: bool,
    // One entry per request kind; repeats collapse into the queued one.
    pending: BTreeSet<&'static str>,
}

pub struct StandbyEngine {
    id: Uuid,
    settings: DerivedSettings,
    pki: Arc<dyn PkiConnection>,
    // Held so the hub session lives exactly as long as the generation.
    _auth: Arc<dyn AuthSession>,
    events: EventSink,
    state: Mutex<StandbyState>,
}

impl StandbyEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            id: config.engine_id,
            settings: config.settings,
            pki: config.pki,
            _auth: config.auth,
            events: config.events,
            state: Mutex::new(StandbyState::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StandbyState>, EngineError> {
        self.state
            .lock()
            .map_err(|_| EngineError::State("standby state poisoned".into()))
    }

    fn snapshot(&self, state: &StandbyState) -> Value {
        let status = if state.running { "running" } else { "idle" };
        let mut machines = Map::new();
        machines.insert(
            "ENGINE".into(),
            json!({
                "status": status,
                "stateDescription": format!(
                    "Standby engine {} for {}",
                    self.id,
                    self.settings.dfsp_id.as_deref().unwrap_or("unknown DFSP")
                ),
            }),
        );
        machines.insert(
            "PKI".into(),
            json!({
                "status": "configured",
                "stateDescription": format!("{} on mount {}", self.pki.common_name(), self.pki.mount()),
            }),
        );
        for kind in &state.pending {
            machines.insert(
                (*kind).into(),
                json!({
                    "status": "pending",
                    "stateDescription": "Waiting for the connection state machine",
                }),
            );
        }
        Value::Object(machines)
    }
}

#[async_trait]
impl Engine for StandbyEngine {
    async fn start(&self) -> Result<(), EngineError> {
        self.lock()?.running = true;
        info!(
            engine_id = %self.id,
            port = self.settings.port,
            hub_endpoint = ?self.settings.hub_endpoint,
            "Standby engine started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.lock()?.running = false;
        info!(engine_id = %self.id, "Standby engine stopped");
        Ok(())
    }

    async fn send_event(&self, event: EngineEvent) -> Result<(), EngineError> {
        let snapshot = {
            let mut state = self.lock()?;
            if !state.running {
                return Err(EngineError::Event(format!(
                    "{} received while the engine is stopped",
                    event.kind()
                )));
            }
            if state.pending.insert(event.kind()) {
                info!(event = event.kind(), "Queued request for the connection state machine");
            } else {
                debug!(event = event.kind(), "Request already pending");
            }
            self.snapshot(&state)
        };
        self.events.emit(LifecycleEvent::StateChange(snapshot));
        Ok(())
    }

    fn state(&self) -> Result<Value, EngineError> {
        let state = self.lock()?;
        Ok(self.snapshot(&state))
    }
}

/// Factory used by the daemon: Vault PKI, hub OAuth login and the standby engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEngineFactory;

#[async_trait]
impl EngineFactory for DefaultEngineFactory {
    async fn connect_pki(
        &self,
        settings: &PkiSettings,
    ) -> Result<Arc<dyn PkiConnection>, EngineError> {
        Ok(Arc::new(VaultPkiConnection::connect(settings).await?))
    }

    fn auth_session(
        &self,
        settings: HubAuthSettings,
        cache: IdentityTokenCache,
    ) -> Result<Arc<dyn AuthSession>, EngineError> {
        Ok(Arc::new(HubAuthSession::new(settings, cache)?))
    }

    fn build_engine(&self, config: EngineConfig) -> Result<Arc<dyn Engine>, EngineError> {
        Ok(Arc::new(StandbyEngine::new(config)))
    }
}
