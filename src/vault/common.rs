//! Common helper functions for Vault responses.

use crate::vault::VaultError;
use reqwest::{Response, StatusCode};
use serde_json::Value;

/// Checks the HTTP response from Vault. If successful, returns the JSON body;
/// otherwise, it extracts the first error message Vault reported and keeps the
/// status code so callers can tell a 403 from a 404.
pub async fn check_response(resp: Response) -> Result<Value, VaultError> {
    let status = resp.status();
    if status.is_success() {
        if status == StatusCode::NO_CONTENT {
            return Ok(serde_json::json!({}));
        }
        return resp
            .json::<Value>()
            .await
            .map_err(|e| VaultError::ParseError(format!("Failed to parse response: {}", e)));
    }

    let body = resp.text().await.unwrap_or_default();
    Err(VaultError::HttpStatus(status.as_u16(), error_message(&body)))
}

/// Extracts `errors[0]` from a Vault error body, falling back to the raw body.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|val| {
            val.get("errors")
                .and_then(|v| v.as_array())
                .and_then(|errors| errors.first())
                .and_then(|msg| msg.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Returns true when a response has a payload under `data.data`, which is
/// where the KV v2 engine puts the stored document.
pub fn has_kv_payload(body: &Value) -> bool {
    body.get("data")
        .and_then(|d| d.get("data"))
        .map(|d| !d.is_null())
        .unwrap_or(false)
}
