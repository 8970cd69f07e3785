//! Structural schema of the DFSP configuration document.
//!
//! Every section keeps the fields it does not declare in an `extra` map, so a
//! document written by a newer agent (or edited by an operator) survives a
//! load/save cycle verbatim. Validation applies the declared defaults; the
//! validated form is what gets persisted.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Undeclared fields of a section, preserved as-is.
pub type Extra = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("{0}")]
    Structure(#[from] serde_json::Error),

    #[error("{field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Optional fields may be absent but never `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn default_true() -> bool {
    true
}

fn default_cert_expiry_threshold_days() -> u32 {
    30
}

fn default_token_refresh_margin_seconds() -> u64 {
    30
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub common: Option<CommonSection>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub mcm: Option<McmSection>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub sdk: Option<SdkSection>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultSection>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub dfsp_ca_csr_parameters: Option<CsrParameters>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub dfsp_client_csr_parameters: Option<CsrParameters>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub dfsp_server_csr_parameters: Option<ServerCsrParameters>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Tenant identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonSection {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub dfsp_id: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Upstream MCM server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McmSection {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub server_endpoint: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub auth: Option<McmAuth>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub hub_iam_provider_url: Option<String>,
    #[serde(default = "default_cert_expiry_threshold_days")]
    pub cert_expiry_threshold_days: u32,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Default for McmSection {
    fn default() -> Self {
        Self {
            server_endpoint: None,
            auth: None,
            hub_iam_provider_url: None,
            cert_expiry_threshold_days: default_cert_expiry_threshold_days(),
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McmAuth {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub creds: McmCredentials,
    #[serde(default = "default_token_refresh_margin_seconds")]
    pub token_refresh_margin_seconds: u64,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McmCredentials {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// SDK scheme adapter settings, including the connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkSection {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub whitelist_ip: Vec<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub fxp_response: Option<String>,
    #[serde(default = "default_true")]
    pub pm4ml_enabled: bool,
    #[serde(default)]
    pub currencies: Vec<String>,
    pub auto_accept: AutoAccept,
    pub jws: JwsSettings,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub peer_endpoint: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub als_endpoint: Option<String>,
    pub tls: TlsSettings,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthSettings>,
    #[serde(default = "default_true")]
    pub reserve_notification: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoAccept {
    #[serde(default)]
    pub quotes: bool,
    #[serde(default = "default_true")]
    pub party: bool,
    #[serde(default)]
    pub r2p_party: bool,
    #[serde(default)]
    pub r2p_business_quotes: bool,
    #[serde(default)]
    pub r2p_device_otp: bool,
    #[serde(default)]
    pub participants_put: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwsSettings {
    #[serde(default = "default_true")]
    pub sign: bool,
    #[serde(default = "default_true")]
    pub validate_inbound: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(default = "default_true")]
    pub outbound_mutual: bool,
    #[serde(default = "default_true")]
    pub inbound_mutual: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSettings {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// DFSP-specific PKI parameters. Infrastructure settings live in `AgentSettings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSection {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsrSubject {
    #[serde(
        rename = "CN",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub cn: Option<String>,
    #[serde(
        rename = "C",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub c: Option<String>,
    #[serde(
        rename = "ST",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub st: Option<String>,
    #[serde(
        rename = "L",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub l: Option<String>,
    #[serde(
        rename = "O",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub o: Option<String>,
    #[serde(
        rename = "OU",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub ou: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// CA and client CSR parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsrParameters {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub subject: Option<CsrSubject>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCsrParameters {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub subject: Option<CsrSubject>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub extensions: Option<CsrExtensions>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrExtensions {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub subject_alt_name: Option<SubjectAltName>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectAltName {
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ConfigDocument {
    pub fn dfsp_id(&self) -> Option<&str> {
        self.common.as_ref().and_then(|c| c.dfsp_id.as_deref())
    }

    pub fn to_value(&self) -> Result<Value, SchemaError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Validates an arbitrary JSON value against the schema and returns the
/// document with defaults applied.
pub fn validate(value: Value) -> Result<ConfigDocument, SchemaError> {
    if !value.is_object() {
        return Err(SchemaError::InvalidField {
            field: "(root)",
            reason: "expected an object".to_string(),
        });
    }
    let doc: ConfigDocument = serde_json::from_value(value)?;
    check_fields(&doc)?;
    Ok(doc)
}

/// Re-validates a typed document, e.g. one assembled by a caller in code.
pub fn validate_document(doc: &ConfigDocument) -> Result<ConfigDocument, SchemaError> {
    validate(doc.to_value()?)
}

fn check_fields(doc: &ConfigDocument) -> Result<(), SchemaError> {
    if let Some(endpoint) = doc.mcm.as_ref().and_then(|m| m.server_endpoint.as_deref()) {
        if Url::parse(endpoint).is_err() {
            return Err(SchemaError::InvalidField {
                field: "mcm.serverEndpoint",
                reason: "Must be a valid URL".to_string(),
            });
        }
    }

    let token_endpoint = doc
        .sdk
        .as_ref()
        .and_then(|s| s.oauth.as_ref())
        .and_then(|o| o.token_endpoint.as_deref());
    if let Some(endpoint) = token_endpoint {
        if !endpoint.is_empty() && Url::parse(endpoint).is_err() {
            return Err(SchemaError::InvalidField {
                field: "sdk.oauth.tokenEndpoint",
                reason: "Must be a valid URL or empty".to_string(),
            });
        }
    }

    Ok(())
}
