//! In-memory doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::engine::{
    AuthSession, DerivedSettings, Engine, EngineConfig, EngineError, EngineEvent, EngineFactory,
    EngineSettings, HubAuthSettings, IdentityTokenCache, PkiConnection, PkiSettings,
};
use crate::interface::SecretClient;
use crate::lifecycle::events::{EventSink, LifecycleEvent};
use crate::settings::AgentSettings;
use crate::vault::{
    AppRoleCredentials, CredentialSource, LoginResponse, SecretAuth, TokenInfo, VaultError,
};

#[derive(clap::Parser)]
struct SettingsHarness {
    #[command(flatten)]
    settings: AgentSettings,
}

/// Agent settings parsed from `args` on top of the defaults.
pub(crate) fn agent_settings(args: &[&str]) -> AgentSettings {
    use clap::Parser;
    let argv = std::iter::once("mcm-agent").chain(args.iter().copied());
    SettingsHarness::try_parse_from(argv)
        .expect("valid flags")
        .settings
}

pub(crate) fn engine_settings() -> EngineSettings {
    EngineSettings {
        pki: PkiSettings {
            endpoint: "http://vault:8200".into(),
            namespace: None,
            pki_mount: "pki".into(),
            kv_mount: "secrets".into(),
            server_role: "mcm-server-role".into(),
            client_role: "mcm-client-role".into(),
            auth: Some(SecretAuth::AppRole {
                role_id: CredentialSource::Literal("role".into()),
                secret_id: CredentialSource::Literal("secret".into()),
            }),
            sign_expiry_hours: 8760,
            key_length: 4096,
            key_algorithm: "rsa".into(),
            common_name: "default".into(),
        },
        port: 4004,
        report_interval: Duration::from_secs(60),
        refresh_interval: Duration::from_secs(60),
        auth_retry_delay: Duration::from_secs(5),
    }
}

// ---------------------------------------------------------------------------
// Secret backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredVersion {
    data: Value,
    created_time: String,
    deleted: bool,
}

#[derive(Default)]
struct MemoryState {
    /// KV v2 history keyed by `<mount>/<path>`.
    secrets: HashMap<String, Vec<StoredVersion>>,
    /// Verbatim responses keyed by full logical path.
    raw: HashMap<String, Value>,
    token_infos: VecDeque<Result<TokenInfo, VaultError>>,
    logins: usize,
    failing_logins: usize,
    last_login: Option<AppRoleCredentials>,
    issued: Vec<String>,
    token_info_calls: usize,
    writes: usize,
    last_read: Option<String>,
    last_token: Option<String>,
    read_failure: Option<u16>,
    write_failure: Option<u16>,
    delete_failure: Option<u16>,
}

enum KvPath {
    Data { key: String, version: Option<usize> },
    Metadata { key: String },
    Other,
}

fn parse_kv_path(path: &str) -> KvPath {
    let (path, version) = match path.split_once("?version=") {
        Some((p, v)) => (p, v.parse().ok()),
        None => (path, None),
    };
    let mut parts = path.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(mount), Some("data"), Some(rest)) => KvPath::Data {
            key: format!("{}/{}", mount, rest),
            version,
        },
        (Some(mount), Some("metadata"), Some(rest)) => KvPath::Metadata {
            key: format!("{}/{}", mount, rest),
        },
        _ => KvPath::Other,
    }
}

fn injected(code: u16) -> VaultError {
    VaultError::HttpStatus(code, "injected failure".into())
}

/// KV v2 secret backend held in memory, with scripted failures.
#[derive(Default)]
pub(crate) struct MemorySecretClient {
    state: Mutex<MemoryState>,
}

impl MemorySecretClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory backend poisoned")
    }

    /// Queues the answer of the next `token_info` call. Unscripted calls report 3600s.
    pub fn push_token_info(&self, info: Result<TokenInfo, VaultError>) {
        self.state().token_infos.push_back(info);
    }

    /// Makes the next `count` logins fail.
    pub fn fail_logins(&self, count: usize) {
        self.state().failing_logins = count;
    }

    pub fn fail_reads_with(&self, code: u16) {
        self.state().read_failure = Some(code);
    }

    pub fn fail_writes_with(&self, code: u16) {
        self.state().write_failure = Some(code);
    }

    pub fn fail_deletes_with(&self, code: u16) {
        self.state().delete_failure = Some(code);
    }

    /// Answers reads of `path` with `body` verbatim.
    pub fn insert_raw(&self, path: &str, body: Value) {
        self.state().raw.insert(path.to_string(), body);
    }

    /// Latest stored payload at a `<mount>/data/<path>` path.
    pub fn latest(&self, path: &str) -> Option<Value> {
        let KvPath::Data { key, .. } = parse_kv_path(path) else {
            return None;
        };
        self.state()
            .secrets
            .get(&key)
            .and_then(|versions| versions.last())
            .map(|v| v.data.clone())
    }

    pub fn login_count(&self) -> usize {
        self.state().logins
    }

    pub fn last_login(&self) -> Option<AppRoleCredentials> {
        self.state().last_login.clone()
    }

    pub fn issued_tokens(&self) -> Vec<String> {
        self.state().issued.clone()
    }

    pub fn token_info_count(&self) -> usize {
        self.state().token_info_calls
    }

    pub fn write_count(&self) -> usize {
        self.state().writes
    }

    pub fn last_read_path(&self) -> Option<String> {
        self.state().last_read.clone()
    }

    pub fn last_token_used(&self) -> Option<String> {
        self.state().last_token.clone()
    }
}

#[async_trait]
impl SecretClient for MemorySecretClient {
    async fn login_approle(&self, creds: &AppRoleCredentials) -> Result<LoginResponse, VaultError> {
        let mut state = self.state();
        state.logins += 1;
        state.last_login = Some(creds.clone());
        if state.failing_logins > 0 {
            state.failing_logins -= 1;
            return Err(VaultError::HttpStatus(400, "invalid role or secret ID".into()));
        }
        let token = format!("token-{}", state.logins);
        state.issued.push(token.clone());
        Ok(LoginResponse {
            client_token: token,
            lease_duration: 3600,
        })
    }

    async fn read(&self, token: &str, path: &str) -> Result<Option<Value>, VaultError> {
        let mut state = self.state();
        state.last_token = Some(token.to_string());
        state.last_read = Some(path.to_string());
        if let Some(code) = state.read_failure {
            return Err(injected(code));
        }
        if let Some(body) = state.raw.get(path) {
            return Ok(Some(body.clone()));
        }

        match parse_kv_path(path) {
            KvPath::Data { key, version } => {
                let Some(versions) = state.secrets.get(&key) else {
                    return Ok(None);
                };
                let index = match version {
                    Some(n) if n >= 1 => n - 1,
                    Some(_) => return Ok(None),
                    None => versions.len().saturating_sub(1),
                };
                Ok(versions.get(index).filter(|v| !v.deleted).map(|v| {
                    json!({
                        "data": {
                            "data": v.data,
                            "metadata": { "version": index + 1, "created_time": v.created_time }
                        }
                    })
                }))
            }
            KvPath::Metadata { key } => Ok(state.secrets.get(&key).map(|versions| {
                let entries: Map<String, Value> = versions
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let deletion_time = if v.deleted {
                            v.created_time.clone()
                        } else {
                            String::new()
                        };
                        let meta = json!({
                            "created_time": v.created_time,
                            "deletion_time": deletion_time,
                            "destroyed": false
                        });
                        ((i + 1).to_string(), meta)
                    })
                    .collect();
                json!({ "data": { "current_version": versions.len(), "versions": entries } })
            })),
            KvPath::Other => Ok(None),
        }
    }

    async fn write(&self, token: &str, path: &str, body: Value) -> Result<Value, VaultError> {
        let mut state = self.state();
        state.last_token = Some(token.to_string());
        if let Some(code) = state.write_failure {
            return Err(injected(code));
        }
        let KvPath::Data { key, .. } = parse_kv_path(path) else {
            return Err(VaultError::HttpStatus(405, "unsupported path".into()));
        };
        state.writes += 1;
        let versions = state.secrets.entry(key).or_default();
        let version = versions.len() + 1;
        versions.push(StoredVersion {
            data: body.get("data").cloned().unwrap_or(Value::Null),
            created_time: format!("2026-01-01T00:00:{:02}Z", version),
            deleted: false,
        });
        Ok(json!({ "data": { "version": version } }))
    }

    async fn delete(&self, token: &str, path: &str) -> Result<(), VaultError> {
        let mut state = self.state();
        state.last_token = Some(token.to_string());
        if let Some(code) = state.delete_failure {
            return Err(injected(code));
        }
        if let KvPath::Data { key, .. } = parse_kv_path(path) {
            if let Some(latest) = state.secrets.get_mut(&key).and_then(|v| v.last_mut()) {
                latest.deleted = true;
            }
        }
        Ok(())
    }

    async fn token_info(&self, token: &str) -> Result<TokenInfo, VaultError> {
        let mut state = self.state();
        state.last_token = Some(token.to_string());
        state.token_info_calls += 1;
        state
            .token_infos
            .pop_front()
            .unwrap_or(Ok(TokenInfo { ttl: 3600 }))
    }
}

// ---------------------------------------------------------------------------
// Engine collaborators
// ---------------------------------------------------------------------------

/// Hub auth session with scripted results. Unscripted logins succeed.
#[derive(Default)]
pub(crate) struct ScriptedAuth {
    results: Mutex<VecDeque<Result<(), String>>>,
    logins: AtomicUsize,
}

#[async_trait]
impl AuthSession for ScriptedAuth {
    async fn login(&self) -> Result<(), EngineError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        let next = self
            .results
            .lock()
            .expect("auth script poisoned")
            .pop_front()
            .unwrap_or(Ok(()));
        next.map_err(EngineError::Auth)
    }
}

pub(crate) struct MockPki {
    common_name: String,
    mount: String,
    disconnects: Arc<AtomicUsize>,
}

impl PkiConnection for MockPki {
    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn common_name(&self) -> &str {
        &self.common_name
    }

    fn mount(&self) -> &str {
        &self.mount
    }
}

#[derive(Default)]
struct Failures {
    pki: AtomicBool,
    build: AtomicBool,
    start: AtomicBool,
    stop: AtomicBool,
    state: AtomicBool,
    auth: AtomicBool,
}

pub(crate) struct MockEngine {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    failures: Arc<Failures>,
    events: EventSink,
    started: AtomicBool,
}

impl MockEngine {
    fn record(&self, entry: &str) {
        self.log
            .lock()
            .expect("engine log poisoned")
            .push(format!("{}:{}", self.name, entry));
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn start(&self) -> Result<(), EngineError> {
        self.record("start");
        if self.failures.start.load(Ordering::SeqCst) {
            return Err(EngineError::Start("control server port in use".into()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.record("stop");
        if self.failures.stop.load(Ordering::SeqCst) {
            return Err(EngineError::Stop("machine refused to stop".into()));
        }
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_event(&self, event: EngineEvent) -> Result<(), EngineError> {
        self.record(&format!("event:{}", event.kind()));
        self.events
            .emit(LifecycleEvent::StateChange(json!({ "event": event.kind() })));
        Ok(())
    }

    fn state(&self) -> Result<Value, EngineError> {
        if self.failures.state.load(Ordering::SeqCst) {
            return Err(EngineError::State("machine busy".into()));
        }
        Ok(json!({
            "engine": self.name,
            "started": self.started.load(Ordering::SeqCst)
        }))
    }
}

/// Factory that records every generation it builds.
pub(crate) struct RecordingFactory {
    log: Arc<Mutex<Vec<String>>>,
    failures: Arc<Failures>,
    auth: Arc<ScriptedAuth>,
    disconnects: Arc<AtomicUsize>,
    configs: Mutex<Vec<EngineConfigRecord>>,
    caches: Mutex<Vec<IdentityTokenCache>>,
    built: AtomicUsize,
}

#[derive(Debug, Clone)]
pub(crate) struct EngineConfigRecord {
    pub engine_id: uuid::Uuid,
    pub settings: DerivedSettings,
    pub pki_common_name: String,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Failures::default()),
            auth: Arc::new(ScriptedAuth::default()),
            disconnects: Arc::new(AtomicUsize::new(0)),
            configs: Mutex::new(Vec::new()),
            caches: Mutex::new(Vec::new()),
            built: AtomicUsize::new(0),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().expect("engine log poisoned").clone()
    }

    pub fn configs(&self) -> Vec<EngineConfigRecord> {
        self.configs.lock().expect("config log poisoned").clone()
    }

    pub fn caches(&self) -> Vec<IdentityTokenCache> {
        self.caches.lock().expect("cache log poisoned").clone()
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn auth_logins(&self) -> usize {
        self.auth.logins.load(Ordering::SeqCst)
    }

    pub fn push_auth_result(&self, result: Result<(), String>) {
        self.auth
            .results
            .lock()
            .expect("auth script poisoned")
            .push_back(result);
    }

    pub fn fail_pki(&self, fail: bool) {
        self.failures.pki.store(fail, Ordering::SeqCst);
    }

    pub fn fail_auth_session(&self, fail: bool) {
        self.failures.auth.store(fail, Ordering::SeqCst);
    }

    pub fn fail_build(&self, fail: bool) {
        self.failures.build.store(fail, Ordering::SeqCst);
    }

    pub fn fail_start(&self, fail: bool) {
        self.failures.start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.failures.stop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_state(&self, fail: bool) {
        self.failures.state.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EngineFactory for RecordingFactory {
    async fn connect_pki(
        &self,
        settings: &PkiSettings,
    ) -> Result<Arc<dyn PkiConnection>, EngineError> {
        if self.failures.pki.load(Ordering::SeqCst) {
            return Err(EngineError::Pki("vault unreachable".into()));
        }
        Ok(Arc::new(MockPki {
            common_name: settings.common_name.clone(),
            mount: settings.pki_mount.clone(),
            disconnects: self.disconnects.clone(),
        }))
    }

    fn auth_session(
        &self,
        settings: HubAuthSettings,
        cache: IdentityTokenCache,
    ) -> Result<Arc<dyn AuthSession>, EngineError> {
        if self.failures.auth.load(Ordering::SeqCst) {
            return Err(EngineError::Auth("TLS backend unavailable".into()));
        }
        cache.insert("recorded", format!("{:?}", settings.client_id), Duration::from_secs(600));
        self.caches.lock().expect("cache log poisoned").push(cache);
        Ok(self.auth.clone())
    }

    fn build_engine(&self, config: EngineConfig) -> Result<Arc<dyn Engine>, EngineError> {
        if self.failures.build.load(Ordering::SeqCst) {
            return Err(EngineError::Start("invalid machine config".into()));
        }
        let n = self.built.fetch_add(1, Ordering::SeqCst) + 1;
        self.configs
            .lock()
            .expect("config log poisoned")
            .push(EngineConfigRecord {
                engine_id: config.engine_id,
                settings: config.settings.clone(),
                pki_common_name: config.pki.common_name().to_string(),
            });
        Ok(Arc::new(MockEngine {
            name: format!("engine-{}", n),
            log: self.log.clone(),
            failures: self.failures.clone(),
            events: config.events,
            started: AtomicBool::new(false),
        }))
    }
}
