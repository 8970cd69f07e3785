//! Derivation of per-generation engine settings from the document.
//!
//! Empty strings count as unset everywhere in this module, so an operator
//! blanking a field in the editor gets the fallback rather than `""`.

use std::time::Duration;

use crate::config::schema::{
    ConfigDocument, CsrExtensions, CsrSubject, McmSection, ServerCsrParameters, SubjectAltName,
};
use crate::engine::{EngineSettings, HubAuthSettings, PkiSettings};

const IAM_TOKEN_PATH: &str = "/realms/hub-operators/protocol/openid-connect/token";
const DEFAULT_COMMON_NAME: &str = "default";

/// OAuth settings handed to the SDK adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SdkOAuth {
    pub token_endpoint: Option<String>,
    pub client_key: Option<String>,
    pub client_secret: Option<String>,
}

/// Settings an engine generation is built with.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedSettings {
    pub dfsp_id: Option<String>,
    /// `mcm.serverEndpoint`. `None` when the current document has none.
    pub hub_endpoint: Option<String>,
    pub callback_url: String,
    pub whitelist_ip: Vec<String>,
    pub sdk_oauth: SdkOAuth,
    pub server_csr: ServerCsrParameters,
    pub cert_expiry_threshold_days: u32,
    pub port: u16,
    pub refresh_interval: Duration,
    pub report_interval: Duration,
    pub state_machine_kv_mount: String,
    /// The document the generation was derived from.
    pub document: ConfigDocument,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// Hub IAM token endpoint for a provider base URL.
pub fn iam_token_endpoint(provider: &str) -> String {
    format!("{}{}", provider, IAM_TOKEN_PATH)
}

pub fn derive_engine_settings(doc: &ConfigDocument, settings: &EngineSettings) -> DerivedSettings {
    let mcm = doc.mcm.as_ref();
    let sdk = doc.sdk.as_ref();
    let creds = mcm.and_then(|m| m.auth.as_ref()).map(|a| &a.creds);
    let oauth = sdk.and_then(|s| s.oauth.as_ref());
    let fqdn = sdk.and_then(|s| non_empty(s.fqdn.as_ref()));

    let sdk_oauth = SdkOAuth {
        token_endpoint: non_empty(oauth.and_then(|o| o.token_endpoint.as_ref())).or_else(|| {
            non_empty(mcm.and_then(|m| m.hub_iam_provider_url.as_ref()))
                .map(|url| iam_token_endpoint(&url))
        }),
        client_key: non_empty(oauth.and_then(|o| o.client_key.as_ref()))
            .or_else(|| non_empty(creds.and_then(|c| c.client_id.as_ref()))),
        client_secret: non_empty(oauth.and_then(|o| o.client_secret.as_ref()))
            .or_else(|| non_empty(creds.and_then(|c| c.client_secret.as_ref()))),
    };

    let callback_url = sdk
        .and_then(|s| non_empty(s.callback_url.as_ref()))
        .unwrap_or_else(|| format!("https://{}", fqdn.as_deref().unwrap_or("")));

    DerivedSettings {
        dfsp_id: doc.dfsp_id().map(str::to_string),
        hub_endpoint: mcm.and_then(|m| m.server_endpoint.clone()),
        callback_url,
        whitelist_ip: sdk.map(|s| s.whitelist_ip.clone()).unwrap_or_default(),
        sdk_oauth,
        server_csr: server_csr_parameters(doc, fqdn.as_deref()),
        cert_expiry_threshold_days: mcm
            .map(|m| m.cert_expiry_threshold_days)
            .unwrap_or_else(|| McmSection::default().cert_expiry_threshold_days),
        port: settings.port,
        refresh_interval: settings.refresh_interval,
        report_interval: settings.report_interval,
        state_machine_kv_mount: settings.pki.kv_mount.clone(),
        document: doc.clone(),
    }
}

/// Explicit server CSR parameters win when they carry a common name;
/// otherwise a blank subject named after the adapter's FQDN.
fn server_csr_parameters(doc: &ConfigDocument, fqdn: Option<&str>) -> ServerCsrParameters {
    let explicit = doc.dfsp_server_csr_parameters.as_ref().filter(|p| {
        p.subject
            .as_ref()
            .and_then(|s| s.cn.as_ref())
            .is_some_and(|cn| !cn.is_empty())
    });
    if let Some(params) = explicit {
        return params.clone();
    }

    let blank = || Some(String::new());
    ServerCsrParameters {
        subject: Some(CsrSubject {
            cn: Some(fqdn.unwrap_or("").to_string()),
            c: blank(),
            st: blank(),
            l: blank(),
            o: blank(),
            ou: blank(),
            ..Default::default()
        }),
        extensions: Some(CsrExtensions {
            subject_alt_name: Some(SubjectAltName::default()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// PKI settings with the common name taken from the document.
pub fn pki_settings(doc: &ConfigDocument, settings: &EngineSettings) -> PkiSettings {
    let common_name = doc
        .vault
        .as_ref()
        .and_then(|v| non_empty(v.common_name.as_ref()))
        .unwrap_or_else(|| DEFAULT_COMMON_NAME.to_string());
    PkiSettings {
        common_name,
        ..settings.pki.clone()
    }
}

/// Hub login settings. A document without `mcm.auth` logs in anonymously.
pub fn hub_auth_settings(doc: &ConfigDocument) -> HubAuthSettings {
    let mcm = doc.mcm.as_ref();
    let auth = mcm.and_then(|m| m.auth.as_ref());
    HubAuthSettings {
        enabled: auth.map(|a| a.enabled).unwrap_or(false),
        client_id: auth.and_then(|a| a.creds.client_id.clone()),
        client_secret: auth.and_then(|a| a.creds.client_secret.clone()),
        hub_iam_provider_url: mcm.and_then(|m| m.hub_iam_provider_url.clone()),
        token_refresh_margin: Duration::from_secs(
            auth.map(|a| a.token_refresh_margin_seconds).unwrap_or(30),
        ),
    }
}
