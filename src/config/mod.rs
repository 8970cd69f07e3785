//! Configuration document: schema, Vault-backed store and token renewal.

pub mod renewal;
pub mod schema;
pub mod store;
pub mod yaml;

pub use renewal::{RenewalOutcome, RenewalReason, TokenRenewer};
pub use schema::{validate, ConfigDocument, SchemaError};
pub use store::{ConfigStore, ConfigVersion, StoreSettings};
