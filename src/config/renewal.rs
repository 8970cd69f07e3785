//! Background renewal of the Vault session token.
//!
//! The task wakes on a fixed interval, asks Vault for the remaining TTL of the
//! current token and logs in again when the TTL drops below the threshold or
//! the token has already been rejected. Failed ticks are logged and skipped;
//! the task only ends when its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::interface::SecretClient;
use crate::vault::auth::{authenticate, SecretAuth};
use crate::vault::SecretSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalReason {
    /// TTL was below the renewal threshold.
    ExpiringSoon { ttl: u64 },
    /// Lookup answered 403: the token is already invalid.
    TokenRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    Healthy { ttl: u64 },
    Renewed(RenewalReason),
}

pub struct TokenRenewer {
    client: Arc<dyn SecretClient>,
    session: Arc<RwLock<SecretSession>>,
    auth: SecretAuth,
    threshold: Duration,
}

impl TokenRenewer {
    pub fn new(
        client: Arc<dyn SecretClient>,
        session: Arc<RwLock<SecretSession>>,
        auth: SecretAuth,
        threshold: Duration,
    ) -> Self {
        Self {
            client,
            session,
            auth,
            threshold,
        }
    }

    /// One renewal tick.
    pub async fn check_and_renew(&self) -> Result<RenewalOutcome, AgentError> {
        let token = self.session.read().await.token().to_string();

        match self.client.token_info(&token).await {
            Ok(info) if info.ttl < self.threshold.as_secs() => {
                info!(ttl = info.ttl, "Vault token expiring soon, renewing");
                self.reauthenticate().await?;
                Ok(RenewalOutcome::Renewed(RenewalReason::ExpiringSoon {
                    ttl: info.ttl,
                }))
            }
            Ok(info) => {
                debug!(ttl = info.ttl, "Vault token healthy");
                Ok(RenewalOutcome::Healthy { ttl: info.ttl })
            }
            Err(e) if e.is_forbidden() => {
                warn!("Vault token is invalid or expired, re-authenticating");
                self.reauthenticate().await?;
                Ok(RenewalOutcome::Renewed(RenewalReason::TokenRejected))
            }
            Err(e) => Err(AgentError::Backend(e)),
        }
    }

    /// Logs in again with the stored descriptor and swaps the session token.
    pub async fn reauthenticate(&self) -> Result<(), AgentError> {
        let login = authenticate(self.client.as_ref(), &self.auth).await?;
        let mut session = self.session.write().await;
        session.refresh(login);
        info!(
            method = ?session.method(),
            granted_ttl = session.ttl().as_secs(),
            renewals = session.renewals(),
            "Vault token renewed"
        );
        Ok(())
    }

    /// Runs until `cancel` fires. The first check happens one full
    /// `period` after the task starts.
    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Token renewal task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_and_renew().await {
                        error!(error = %e, "Token renewal check failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySecretClient;
    use crate::vault::{AuthMethod, CredentialSource, LoginResponse, TokenInfo, VaultError};

    fn approle() -> SecretAuth {
        SecretAuth::AppRole {
            role_id: CredentialSource::Literal("role".into()),
            secret_id: CredentialSource::Literal("secret".into()),
        }
    }

    fn renewer(client: Arc<MemorySecretClient>) -> (TokenRenewer, Arc<RwLock<SecretSession>>) {
        let session = Arc::new(RwLock::new(SecretSession::new(
            LoginResponse {
                client_token: "initial".into(),
                lease_duration: 3600,
            },
            AuthMethod::AppRole,
        )));
        let renewer = TokenRenewer::new(
            client,
            session.clone(),
            approle(),
            Duration::from_secs(300),
        );
        (renewer, session)
    }

    #[tokio::test]
    async fn test_healthy_token_is_left_alone() -> Result<(), AgentError> {
        let client = Arc::new(MemorySecretClient::new());
        client.push_token_info(Ok(TokenInfo { ttl: 3000 }));
        let (renewer, session) = renewer(client.clone());

        let outcome = renewer.check_and_renew().await?;
        assert_eq!(outcome, RenewalOutcome::Healthy { ttl: 3000 });
        assert_eq!(client.login_count(), 0);
        assert_eq!(session.read().await.token(), "initial");
        Ok(())
    }

    #[tokio::test]
    async fn test_low_ttl_triggers_exactly_one_relogin() -> Result<(), AgentError> {
        let client = Arc::new(MemorySecretClient::new());
        client.push_token_info(Ok(TokenInfo { ttl: 100 }));
        let (renewer, session) = renewer(client.clone());

        let outcome = renewer.check_and_renew().await?;
        assert_eq!(
            outcome,
            RenewalOutcome::Renewed(RenewalReason::ExpiringSoon { ttl: 100 })
        );
        assert_eq!(client.login_count(), 1);
        let session = session.read().await;
        assert_ne!(session.token(), "initial");
        assert_eq!(session.renewals(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_token_relogs_immediately() -> Result<(), AgentError> {
        let client = Arc::new(MemorySecretClient::new());
        client.push_token_info(Err(VaultError::HttpStatus(403, "permission denied".into())));
        let (renewer, session) = renewer(client.clone());

        let outcome = renewer.check_and_renew().await?;
        assert_eq!(outcome, RenewalOutcome::Renewed(RenewalReason::TokenRejected));
        assert_eq!(client.login_count(), 1);
        assert_ne!(session.read().await.token(), "initial");
        Ok(())
    }

    #[tokio::test]
    async fn test_other_lookup_failures_skip_the_tick() {
        let client = Arc::new(MemorySecretClient::new());
        client.push_token_info(Err(VaultError::Network("connection reset".into())));
        let (renewer, session) = renewer(client.clone());

        let result = renewer.check_and_renew().await;
        assert!(matches!(result, Err(AgentError::Backend(_))));
        assert_eq!(client.login_count(), 0);
        assert_eq!(session.read().await.token(), "initial");
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_survives_failed_ticks_until_cancelled() {
        let client = Arc::new(MemorySecretClient::new());
        client.push_token_info(Err(VaultError::Network("down".into())));
        client.push_token_info(Ok(TokenInfo { ttl: 10 }));
        let (renewer, session) = renewer(client.clone());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(renewer.run(Duration::from_secs(60), cancel.clone()));

        // First tick fails, second renews.
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(client.token_info_count(), 2);
        assert_eq!(client.login_count(), 1);
        assert_ne!(session.read().await.token(), "initial");

        cancel.cancel();
        handle.await.expect("renewal task panicked");
    }
}
