//! Perpetual hub-login task of one engine generation.
//!
//! The task retries failed logins forever with a fixed backoff and, once
//! logged in, parks until the relogin signal fires or its generation is
//! torn down. A superseded task never touches the shared status.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::AuthSession;
use crate::lifecycle::status::EngineStatus;

pub(crate) struct AuthLoop {
    pub session: Arc<dyn AuthSession>,
    pub status: Arc<Mutex<EngineStatus>>,
    pub generation: u64,
    pub current_generation: Arc<AtomicU64>,
    pub cancel: CancellationToken,
    pub relogin: Arc<Notify>,
    pub retry_delay: Duration,
}

impl AuthLoop {
    fn is_current(&self) -> bool {
        !self.cancel.is_cancelled()
            && self.current_generation.load(Ordering::SeqCst) == self.generation
    }

    /// Applies `update` only while this task's generation is still current.
    async fn update_status(&self, update: impl FnOnce(&mut EngineStatus)) -> bool {
        let mut status = self.status.lock().await;
        if !self.is_current() {
            return false;
        }
        update(&mut status);
        true
    }

    pub async fn run(self) {
        let mut attempt: u64 = 0;
        let delay_ms = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX);

        loop {
            attempt += 1;
            info!(attempt, generation = self.generation, "Attempting hub auth login");

            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.session.login() => result,
            };

            match result {
                Ok(()) => {
                    if !self.update_status(EngineStatus::clear_retry).await {
                        break;
                    }
                    info!(generation = self.generation, "Hub auth login successful");
                    attempt = 0;

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = self.relogin.notified() => {
                            info!("Auth config updated, re-authenticating");
                        }
                    }
                }
                Err(e) => {
                    let recorded = self
                        .update_status(|status| {
                            status.retrying = true;
                            status.retry_attempt = Some(attempt);
                            status.next_retry_in = Some(delay_ms);
                        })
                        .await;
                    if !recorded {
                        break;
                    }
                    warn!(attempt, error = %e, "Hub auth login failed");
                    info!(delay_ms, "Retrying hub auth login");

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = self.relogin.notified() => {
                            info!("Auth config updated, retrying now");
                        }
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        debug!(generation = self.generation, "Hub auth task finished");
    }
}
