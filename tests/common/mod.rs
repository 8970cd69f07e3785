//! Shared fixtures for the integration tests: a dev-mode Vault container
//! with AppRole auth enabled.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tracing::{debug, info};

pub const ROOT_TOKEN: &str = "root";

/// Set up logging for tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

pub struct AppRole {
    pub role_id: String,
    pub secret_id: String,
}

/// A running dev Vault. The container is removed when this is dropped.
pub struct VaultFixture {
    _container: ContainerAsync<GenericImage>,
    addr: String,
}

impl VaultFixture {
    pub async fn new() -> Self {
        let container = GenericImage::new("hashicorp/vault", "1.18.4")
            .with_exposed_port(8200.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Vault server started!"))
            .with_env_var("VAULT_DEV_ROOT_TOKEN_ID", ROOT_TOKEN)
            .with_env_var("VAULT_DEV_LISTEN_ADDRESS", "0.0.0.0:8200")
            .with_cmd(vec!["server", "-dev", "-dev-root-token-id=root"])
            .start()
            .await
            .expect("Failed to start Vault container");
        let port = container
            .get_host_port_ipv4(8200)
            .await
            .expect("Vault port not mapped");
        let addr = format!("http://127.0.0.1:{}", port);

        wait_for_vault_ready(&addr, 30, 500)
            .await
            .expect("Vault did not become ready");
        info!("Vault container ready at {}", addr);

        Self {
            _container: container,
            addr,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Enables AppRole auth and creates a role that can use the `secret/` KV
    /// mount. Returns a fresh role id and secret id.
    pub async fn setup_approle(&self, role_name: &str) -> Result<AppRole, reqwest::Error> {
        let client = Client::new();
        let root = |path: &str| {
            client
                .request(reqwest::Method::POST, format!("{}/v1/{}", self.addr, path))
                .header("X-Vault-Token", ROOT_TOKEN)
        };

        root("sys/auth/approle")
            .json(&json!({ "type": "approle" }))
            .send()
            .await?
            .error_for_status()?;

        let policy = r#"
            path "secret/*" { capabilities = ["create", "read", "update", "delete", "list"] }
            path "pki/*" { capabilities = ["create", "read", "update", "list"] }
        "#;
        client
            .put(format!("{}/v1/sys/policies/acl/mcm-agent", self.addr))
            .header("X-Vault-Token", ROOT_TOKEN)
            .json(&json!({ "policy": policy }))
            .send()
            .await?
            .error_for_status()?;

        root(&format!("auth/approle/role/{}", role_name))
            .json(&json!({ "token_policies": ["mcm-agent"], "token_ttl": "1h" }))
            .send()
            .await?
            .error_for_status()?;

        let role: Value = client
            .get(format!(
                "{}/v1/auth/approle/role/{}/role-id",
                self.addr, role_name
            ))
            .header("X-Vault-Token", ROOT_TOKEN)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let secret: Value = root(&format!("auth/approle/role/{}/secret-id", role_name))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(AppRole {
            role_id: role["data"]["role_id"].as_str().unwrap_or_default().to_string(),
            secret_id: secret["data"]["secret_id"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// Wait for Vault to be ready
pub async fn wait_for_vault_ready(
    vault_addr: &str,
    max_retries: usize,
    retry_delay_ms: u64,
) -> Result<(), String> {
    let client = Client::new();
    let health_url = format!("{}/v1/sys/health", vault_addr);

    for attempt in 1..=max_retries {
        match client.get(&health_url).send().await {
            Ok(response) if response.status().as_u16() == 200 => {
                debug!("Vault ready after {} attempts", attempt);
                return Ok(());
            }
            Ok(response) => {
                debug!("Vault not ready yet (status: {})", response.status());
            }
            Err(e) => {
                debug!("Connection to Vault failed (attempt {}): {}", attempt, e);
            }
        }
        tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
    }

    Err(format!("Vault not ready after {} attempts", max_retries))
}
