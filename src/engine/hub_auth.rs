//! OAuth2 client-credentials login against the hub IAM provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::engine::derive::iam_token_endpoint;
use crate::engine::{AuthSession, EngineError, HubAuthSettings, IdentityTokenCache};

const DEFAULT_EXPIRES_IN: u64 = 300;

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

pub struct HubAuthSession {
    settings: HubAuthSettings,
    cache: IdentityTokenCache,
    http: reqwest::Client,
}

impl HubAuthSession {
    pub fn new(settings: HubAuthSettings, cache: IdentityTokenCache) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            settings,
            cache,
            http,
        })
    }

    fn provider(&self) -> Option<&str> {
        self.settings
            .hub_iam_provider_url
            .as_deref()
            .filter(|url| !url.is_empty())
    }
}

#[async_trait]
impl AuthSession for HubAuthSession {
    async fn login(&self) -> Result<(), EngineError> {
        if !self.settings.enabled {
            debug!("Hub authentication disabled, skipping login");
            return Ok(());
        }

        let provider = self
            .provider()
            .ok_or_else(|| EngineError::Auth("hubIamProviderUrl is not configured".into()))?;
        let (client_id, client_secret) = match (
            self.settings.client_id.as_deref(),
            self.settings.client_secret.as_deref(),
        ) {
            (Some(id), Some(secret)) => (id, secret),
            _ => {
                return Err(EngineError::Auth(
                    "mcm.auth.creds must contain clientId and clientSecret".into(),
                ))
            }
        };

        let url = iam_token_endpoint(provider);
        debug!(%url, client_id, "Requesting hub identity token");
        let resp = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Auth(format!("{}: {}", status, body)));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Auth(format!("malformed token response: {}", e)))?;
        self.cache.insert(
            provider,
            token.access_token,
            Duration::from_secs(token.expires_in),
        );
        info!(expires_in = token.expires_in, "Hub identity token obtained");
        Ok(())
    }
}
