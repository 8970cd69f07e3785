//! Static infrastructure settings, read from flags with environment fallbacks.
//!
//! Everything here is fixed for the life of the process. DFSP-specific
//! settings live in the configuration document instead.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::config::StoreSettings;
use crate::engine::{EngineSettings, PkiSettings};
use crate::vault::{CredentialSource, SecretAuth};

#[derive(Debug, Clone, Args)]
pub struct AgentSettings {
    /// Path of the configuration document inside the KV mount.
    #[arg(long, env = "VAULT_CONFIG_PATH", default_value = "mcm-agent/default/config")]
    pub config_path: String,

    /// Vault server address.
    #[arg(long, env = "VAULT_ENDPOINT", default_value = "http://vault:8200")]
    pub vault_endpoint: String,

    /// Vault Enterprise namespace for every request.
    #[arg(long, env = "VAULT_NAMESPACE")]
    pub vault_namespace: Option<String>,

    /// Versioned KV mount holding the configuration document.
    #[arg(long, env = "VAULT_KV_MOUNT", default_value = "secret")]
    pub kv_mount: String,

    /// KV mount where the state machine keeps its own state.
    #[arg(long, env = "VAULT_STATE_MACHINE_KV_MOUNT", default_value = "secrets")]
    pub state_machine_kv_mount: String,

    #[arg(long, env = "VAULT_PKI_MOUNT", default_value = "pki")]
    pub pki_mount: String,

    /// AppRole role id.
    #[arg(long, env = "VAULT_AUTH_ROLE_ID", hide_env_values = true)]
    pub role_id: Option<String>,

    /// File containing the AppRole role id. Wins over `--role-id`.
    #[arg(long, env = "VAULT_AUTH_ROLE_ID_PATH")]
    pub role_id_path: Option<PathBuf>,

    /// AppRole secret id.
    #[arg(long, env = "VAULT_AUTH_SECRET_ID", hide_env_values = true)]
    pub secret_id: Option<String>,

    /// File containing the AppRole secret id. Wins over `--secret-id`.
    #[arg(long, env = "VAULT_AUTH_SECRET_ID_PATH")]
    pub secret_id_path: Option<PathBuf>,

    /// Kubernetes auth role. Recognized but not supported yet.
    #[arg(long, env = "VAULT_AUTH_K8S_ROLE")]
    pub k8s_role: Option<String>,

    #[arg(
        long,
        env = "VAULT_K8S_TOKEN_FILE",
        default_value = "/var/run/secrets/kubernetes.io/serviceaccount/token"
    )]
    pub k8s_token_file: PathBuf,

    #[arg(long, env = "VAULT_PKI_SERVER_ROLE", default_value = "mcm-server-role")]
    pub pki_server_role: String,

    #[arg(long, env = "VAULT_PKI_CLIENT_ROLE", default_value = "mcm-client-role")]
    pub pki_client_role: String,

    #[arg(long, env = "VAULT_SIGN_EXPIRY_HOURS", default_value_t = 8760)]
    pub sign_expiry_hours: u32,

    #[arg(long, env = "VAULT_KEY_LENGTH", default_value_t = 4096)]
    pub key_length: u32,

    #[arg(long, env = "VAULT_KEY_ALGORITHM", default_value = "rsa")]
    pub key_algorithm: String,

    /// Seconds between token TTL checks.
    #[arg(long, env = "VAULT_TOKEN_CHECK_INTERVAL", default_value_t = 60)]
    pub token_check_interval: u64,

    /// Re-login when the token TTL drops below this many seconds.
    #[arg(long, env = "VAULT_TOKEN_RENEWAL_THRESHOLD", default_value_t = 300)]
    pub token_renewal_threshold: u64,

    /// Control server port of the state machine.
    #[arg(long, env = "STATE_MACHINE_PORT", default_value_t = 4004)]
    pub state_machine_port: u16,

    #[arg(long, env = "STATE_MACHINE_REPORT_INTERVAL", default_value_t = 60)]
    pub state_machine_report_interval: u64,

    #[arg(long, env = "STATE_MACHINE_RETRY_INTERVAL", default_value_t = 60)]
    pub state_machine_retry_interval: u64,

    /// Backoff between failed hub logins, in milliseconds.
    #[arg(long, env = "AUTH_RETRY_DELAY_MS", default_value_t = 5000)]
    pub auth_retry_delay_ms: u64,

    /// Document seeded into Vault when none is stored yet.
    #[arg(long, env = "DEFAULT_CONFIG_FILE", default_value = "config/default.json")]
    pub default_config_file: PathBuf,

    /// Tracing filter directive.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl AgentSettings {
    /// The Vault auth descriptor, if enough settings are present.
    ///
    /// A Kubernetes role wins over AppRole settings.
    pub fn auth(&self) -> Option<SecretAuth> {
        if let Some(role) = self.k8s_role.as_ref().filter(|r| !r.is_empty()) {
            return Some(SecretAuth::Kubernetes {
                role: role.clone(),
                token_file: self.k8s_token_file.clone(),
            });
        }

        let source = |path: &Option<PathBuf>, literal: &Option<String>| {
            path.clone().map(CredentialSource::File).or_else(|| {
                literal
                    .as_ref()
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .map(CredentialSource::Literal)
            })
        };
        match (
            source(&self.role_id_path, &self.role_id),
            source(&self.secret_id_path, &self.secret_id),
        ) {
            (Some(role_id), Some(secret_id)) => Some(SecretAuth::AppRole { role_id, secret_id }),
            _ => None,
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            token_check_interval: Duration::from_secs(self.token_check_interval),
            renewal_threshold: Duration::from_secs(self.token_renewal_threshold),
            namespace: self.vault_namespace.clone(),
            ..StoreSettings::new(
                &self.vault_endpoint,
                &self.kv_mount,
                &self.pki_mount,
                self.auth(),
            )
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            pki: PkiSettings {
                endpoint: self.vault_endpoint.trim_end_matches('/').to_string(),
                namespace: self.vault_namespace.clone(),
                pki_mount: self.pki_mount.clone(),
                kv_mount: self.state_machine_kv_mount.clone(),
                server_role: self.pki_server_role.clone(),
                client_role: self.pki_client_role.clone(),
                auth: self.auth(),
                sign_expiry_hours: self.sign_expiry_hours,
                key_length: self.key_length,
                key_algorithm: self.key_algorithm.clone(),
                common_name: "default".to_string(),
            },
            port: self.state_machine_port,
            report_interval: Duration::from_secs(self.state_machine_report_interval),
            refresh_interval: Duration::from_secs(self.state_machine_retry_interval),
            auth_retry_delay: Duration::from_millis(self.auth_retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::agent_settings as parse;

    #[test]
    fn test_defaults() {
        let settings = parse(&[]);
        assert_eq!(settings.config_path, "mcm-agent/default/config");
        assert_eq!(settings.kv_mount, "secret");
        assert_eq!(settings.state_machine_kv_mount, "secrets");

        let store = settings.store_settings();
        assert_eq!(store.token_check_interval, Duration::from_secs(60));
        assert_eq!(store.renewal_threshold, Duration::from_secs(300));

        let engine = settings.engine_settings();
        assert_eq!(engine.port, 4004);
        assert_eq!(engine.auth_retry_delay, Duration::from_millis(5000));
        assert_eq!(engine.pki.key_length, 4096);
        assert_eq!(engine.pki.kv_mount, "secrets");
    }

    #[test]
    fn test_approle_from_literals_and_paths() {
        let settings = parse(&["--role-id", "r", "--secret-id", "s"]);
        assert_eq!(
            settings.auth(),
            Some(SecretAuth::AppRole {
                role_id: CredentialSource::Literal("r".into()),
                secret_id: CredentialSource::Literal("s".into()),
            })
        );

        let settings = parse(&[
            "--role-id",
            "r",
            "--role-id-path",
            "/run/role-id",
            "--secret-id-path",
            "/run/secret-id",
        ]);
        assert_eq!(
            settings.auth(),
            Some(SecretAuth::AppRole {
                role_id: CredentialSource::File("/run/role-id".into()),
                secret_id: CredentialSource::File("/run/secret-id".into()),
            })
        );
    }

    #[test]
    fn test_namespace_reaches_store_and_pki() {
        assert_eq!(parse(&[]).store_settings().namespace, None);

        let settings = parse(&["--vault-namespace", "dfsp/acme"]);
        assert_eq!(settings.store_settings().namespace.as_deref(), Some("dfsp/acme"));
        assert_eq!(settings.engine_settings().pki.namespace.as_deref(), Some("dfsp/acme"));
    }

    #[test]
    fn test_incomplete_approle_is_no_auth() {
        assert_eq!(parse(&["--role-id", "r"]).auth(), None);
    }

    #[test]
    fn test_kubernetes_role_wins() {
        let settings = parse(&["--k8s-role", "mcm", "--role-id", "r", "--secret-id", "s"]);
        assert!(matches!(settings.auth(), Some(SecretAuth::Kubernetes { ref role, .. }) if role == "mcm"));
    }
}
