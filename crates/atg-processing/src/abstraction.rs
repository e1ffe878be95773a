//! Tenant-scoped pseudonymization of resource and principal IDs
//!
//! Tokens are `{prefix}-{hash}` where `hash` is the first 16 hex chars of
//! HMAC-SHA256(seed, real_id). The mapping is pure: no storage access, same
//! seed and input always give the same token, different seeds give unrelated
//! tokens.

use crate::error::SeedError;
use crate::record::provider_namespace;
use crate::seed::validate_seed;
use hmac::{Hmac, Mac};
use regex::Regex;
use serde_json::{Map, Value};
use sha2::Sha256;
use std::sync::LazyLock;

type HmacSha256 = Hmac<Sha256>;

pub const HASH_LENGTH: usize = 16;
pub const SUBSCRIPTION_REDACTED: &str = "/subscriptions/SUBSCRIPTION_REDACTED";

/// Role-assignment fields that embed subscription paths
const REDACTED_FIELDS: &[&str] = &["roleDefinitionId", "scope"];

static SUBSCRIPTION_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)/subscriptions/[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
    )
    .unwrap()
});

/// Deterministic ID pseudonymizer for one tenant
#[derive(Clone)]
pub struct IdAbstractor {
    tenant_id: String,
    mac: HmacSha256,
}

impl std::fmt::Debug for IdAbstractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print the key
        f.debug_struct("IdAbstractor")
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

impl IdAbstractor {
    pub fn new(tenant_id: impl Into<String>, seed: &str) -> Result<Self, SeedError> {
        let tenant_id = tenant_id.into();
        if !validate_seed(seed) {
            return Err(SeedError::InvalidSeed { tenant_id });
        }
        let mac = HmacSha256::new_from_slice(seed.as_bytes())
            .map_err(|_| SeedError::InvalidSeed {
                tenant_id: tenant_id.clone(),
            })?;
        Ok(Self { tenant_id, mac })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn hash(&self, real_id: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(real_id.as_bytes());
        let mut digest = hex::encode(mac.finalize().into_bytes());
        digest.truncate(HASH_LENGTH);
        digest
    }

    /// `{vm|storage|net|resource}-{hash}`
    pub fn abstract_resource_id(&self, real_id: &str) -> String {
        format!("{}-{}", type_prefix(real_id), self.hash(real_id))
    }

    /// `principal-{hash}`
    pub fn abstract_principal_id(&self, principal_id: &str) -> String {
        format!("principal-{}", self.hash(principal_id))
    }

    /// Pseudonymize `principalId` and redact subscription paths in
    /// `roleDefinitionId`/`scope`, at top level and inside `properties`.
    pub fn redact_role_assignment(&self, fields: &mut Map<String, Value>) {
        self.redact_level(fields);
        if let Some(Value::Object(nested)) = fields.get_mut("properties") {
            self.redact_level(nested);
        }
    }

    fn redact_level(&self, fields: &mut Map<String, Value>) {
        if let Some(Value::String(principal)) = fields.get_mut("principalId") {
            *principal = self.abstract_principal_id(principal);
        }
        for field in REDACTED_FIELDS {
            if let Some(Value::String(text)) = fields.get_mut(*field) {
                *text = redact_subscription_ids(text);
            }
        }
    }
}

/// Short type tag derived from the provider namespace in a resource ID
pub fn type_prefix(real_id: &str) -> &'static str {
    match provider_namespace(real_id) {
        Some(ns) if ns.eq_ignore_ascii_case("Microsoft.Compute") => "vm",
        Some(ns) if ns.eq_ignore_ascii_case("Microsoft.Storage") => "storage",
        Some(ns) if ns.eq_ignore_ascii_case("Microsoft.Network") => "net",
        _ => "resource",
    }
}

/// Replace every `/subscriptions/{guid}` with the redaction token
pub fn redact_subscription_ids(text: &str) -> String {
    SUBSCRIPTION_PATH_RE
        .replace_all(text, SUBSCRIPTION_REDACTED)
        .into_owned()
}
