//! Identity-token cache owned by one engine generation.
//!
//! A reload builds a fresh cache, so a token obtained against one IAM
//! provider can never be served after the document points at another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Cheap to clone; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct IdentityTokenCache {
    entries: Arc<Mutex<HashMap<String, CachedToken>>>,
}

impl IdentityTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the token for `provider` unless it expires within `margin`.
    pub fn get(&self, provider: &str, margin: Duration) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(provider)
            .filter(|t| t.expires_at > Instant::now() + margin)
            .map(|t| t.access_token.clone())
    }

    pub fn insert(&self, provider: &str, access_token: String, expires_in: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                provider.to_string(),
                CachedToken {
                    access_token,
                    expires_at: Instant::now() + expires_in,
                },
            );
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
