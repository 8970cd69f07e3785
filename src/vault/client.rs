//! Client implementation for Vault API interactions.
//!
//! This module provides a client for making HTTP requests to the Vault API
//! with appropriate authentication and error handling.

use crate::interface::SecretClient;
use crate::vault::auth::AppRoleCredentials;
use crate::vault::common::check_response;
use crate::vault::session::{LoginResponse, TokenInfo};
use crate::vault::VaultError;
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client, Method, RequestBuilder,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Client for interacting with the Vault HTTP API.
///
/// The client keeps no token of its own; callers pass the current session
/// token with every request.
pub struct VaultClient {
    /// Base URL of the Vault server
    pub addr: String,
    /// HTTP client for making requests
    client: Client,
    /// Headers sent with every request, e.g. the namespace
    custom_headers: HeaderMap,
}

impl VaultClient {
    /// Creates a new VaultClient for the specified address.
    ///
    /// The underlying pool keeps connections alive and does not cap idle
    /// connections per host, so frequent pollers never queue behind each other.
    pub fn new(addr: &str) -> Result<Self, VaultError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .pool_max_idle_per_host(usize::MAX)
            .build()
            .map_err(|e| VaultError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            addr: addr.trim_end_matches('/').to_string(),
            client,
            custom_headers: HeaderMap::new(),
        })
    }

    /// Scopes every request to a Vault Enterprise namespace. `None` or an
    /// empty name leaves the client in the root namespace.
    pub fn with_namespace(mut self, namespace: Option<&str>) -> Result<Self, VaultError> {
        if let Some(namespace) = namespace.filter(|ns| !ns.is_empty()) {
            let value = HeaderValue::from_str(namespace).map_err(|e| {
                VaultError::ParseError(format!("invalid namespace {:?}: {}", namespace, e))
            })?;
            self.custom_headers.insert("X-Vault-Namespace", value);
        }
        Ok(self)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.addr, path.trim_start_matches('/'))
    }

    fn build_request(
        &self,
        method: Method,
        token: Option<&str>,
        path: &str,
        body: Option<Value>,
    ) -> RequestBuilder {
        let url = self.url(path);
        debug!(%method, %url, "Vault request");
        let mut request = self.client.request(method, &url);

        if let Some(token) = token {
            request = request.header("X-Vault-Token", token);
        }

        for (name, value) in self.custom_headers.iter() {
            request = request.header(name, value);
        }

        if let Some(json_body) = body {
            request = request.json(&json_body);
        }
        request
    }

    /// Makes a request to the Vault API with the specified method and optional body.
    async fn request(
        &self,
        method: Method,
        token: Option<&str>,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, VaultError> {
        let response = self
            .build_request(method, token, path, body)
            .send()
            .await
            .map_err(|e| VaultError::Network(format!("Request failed: {}", e)))?;

        check_response(response).await
    }
}

#[async_trait]
impl SecretClient for VaultClient {
    async fn login_approle(&self, creds: &AppRoleCredentials) -> Result<LoginResponse, VaultError> {
        let body = json!({ "role_id": creds.role_id, "secret_id": creds.secret_id });
        let resp = self
            .request(Method::POST, None, "auth/approle/login", Some(body))
            .await?;
        let auth = resp
            .get("auth")
            .cloned()
            .ok_or_else(|| VaultError::UnexpectedResponse("login response has no auth block".into()))?;
        Ok(serde_json::from_value(auth)?)
    }

    async fn read(&self, token: &str, path: &str) -> Result<Option<Value>, VaultError> {
        match self.request(Method::GET, Some(token), path, None).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, token: &str, path: &str, body: Value) -> Result<Value, VaultError> {
        self.request(Method::POST, Some(token), path, Some(body)).await
    }

    async fn delete(&self, token: &str, path: &str) -> Result<(), VaultError> {
        self.request(Method::DELETE, Some(token), path, None).await?;
        Ok(())
    }

    async fn token_info(&self, token: &str) -> Result<TokenInfo, VaultError> {
        let resp = self
            .request(Method::GET, Some(token), "auth/token/lookup-self", None)
            .await?;
        let data = resp
            .get("data")
            .cloned()
            .ok_or_else(|| VaultError::UnexpectedResponse("lookup-self has no data".into()))?;
        Ok(serde_json::from_value(data)?)
    }
}
