//! Per-tenant abstraction seeds
//!
//! A seed is created once per tenant and stored on its `Tenant` node. Creation
//! is a single MERGE with create-if-absent properties, so racing creators all
//! end up with whichever seed landed first.

use crate::error::SeedError;
use crate::TENANT_LABEL;
use atg_storage::{GraphSession, NodeKey, NodeMerge, Transaction};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;

pub const SEED_PROPERTY: &str = "abstraction_seed";
pub const SEED_CREATED_AT_PROPERTY: &str = "seed_created_at";

const SEED_BYTES: usize = 32;
const HEX_SEED_MIN_LEN: usize = 64;
const LEGACY_SEED_MIN_LEN: usize = 32;

/// Accepts hex seeds of at least 64 chars, or legacy alphanumeric seeds of at
/// least 32 chars.
pub fn validate_seed(seed: &str) -> bool {
    let hex = seed.len() >= HEX_SEED_MIN_LEN && seed.chars().all(|c| c.is_ascii_hexdigit());
    let legacy =
        seed.len() >= LEGACY_SEED_MIN_LEN && seed.chars().all(|c| c.is_ascii_alphanumeric());
    hex || legacy
}

/// 32 bytes from the OS CSPRNG, hex-encoded
pub fn generate_seed() -> String {
    let mut bytes = [0u8; SEED_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn tenant_key(tenant_id: &str) -> NodeKey {
    NodeKey::by_id(TENANT_LABEL, tenant_id)
}

fn check_tenant(tenant_id: &str) -> Result<(), SeedError> {
    if tenant_id.trim().is_empty() {
        Err(SeedError::EmptyTenantId)
    } else {
        Ok(())
    }
}

/// Owns creation, lookup, and administrative changes of tenant seeds
pub struct TenantSeedManager {
    session: GraphSession,
    cache: RwLock<HashMap<String, String>>,
}

impl TenantSeedManager {
    pub fn new(session: GraphSession) -> Self {
        Self {
            session,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn validate_seed(seed: &str) -> bool {
        validate_seed(seed)
    }

    /// Return the tenant's seed, creating it if the tenant has none yet
    pub async fn get_or_create_seed(&self, tenant_id: &str) -> Result<String, SeedError> {
        check_tenant(tenant_id)?;
        if let Some(seed) = self.cache.read().get(tenant_id) {
            return Ok(seed.clone());
        }

        let candidate = generate_seed();
        let now = chrono::Utc::now().to_rfc3339();
        let node = self
            .session
            .merge_node(
                NodeMerge::new(tenant_key(tenant_id))
                    .coalesce(SEED_PROPERTY, candidate.as_str())
                    .coalesce(SEED_CREATED_AT_PROPERTY, now),
            )
            .await?;

        let seed = node
            .get_str(SEED_PROPERTY)
            .ok_or_else(|| SeedError::InvalidSeed {
                tenant_id: tenant_id.to_string(),
            })?
            .to_string();

        if !validate_seed(&seed) {
            return Err(SeedError::InvalidSeed {
                tenant_id: tenant_id.to_string(),
            });
        }

        if seed == candidate {
            tracing::info!(tenant_id = %tenant_id, "created abstraction seed for tenant");
        } else {
            tracing::debug!(tenant_id = %tenant_id, "using existing abstraction seed");
        }

        self.cache
            .write()
            .insert(tenant_id.to_string(), seed.clone());
        Ok(seed)
    }

    /// Stored seed, if any. A stored seed that fails validation is an error.
    pub async fn get_seed(&self, tenant_id: &str) -> Result<Option<String>, SeedError> {
        check_tenant(tenant_id)?;
        if let Some(seed) = self.cache.read().get(tenant_id) {
            return Ok(Some(seed.clone()));
        }

        let node = self.session.get_node(&tenant_key(tenant_id)).await?;
        let Some(seed) = node.as_ref().and_then(|n| n.get_str(SEED_PROPERTY)) else {
            return Ok(None);
        };
        if !validate_seed(seed) {
            return Err(SeedError::InvalidSeed {
                tenant_id: tenant_id.to_string(),
            });
        }

        self.cache
            .write()
            .insert(tenant_id.to_string(), seed.to_string());
        Ok(Some(seed.to_string()))
    }

    /// Overwrite a tenant's seed. Every existing abstracted ID for the tenant
    /// stops matching what the new seed produces.
    pub async fn set_seed(&self, tenant_id: &str, seed: &str) -> Result<(), SeedError> {
        check_tenant(tenant_id)?;
        if !validate_seed(seed) {
            return Err(SeedError::RejectedSeed {
                tenant_id: tenant_id.to_string(),
            });
        }

        tracing::warn!(
            tenant_id = %tenant_id,
            "overwriting abstraction seed; previously abstracted IDs will no longer match"
        );
        self.session
            .merge_node(
                NodeMerge::new(tenant_key(tenant_id))
                    .set(SEED_PROPERTY, seed)
                    .set(SEED_CREATED_AT_PROPERTY, chrono::Utc::now().to_rfc3339()),
            )
            .await?;

        self.cache
            .write()
            .insert(tenant_id.to_string(), seed.to_string());
        Ok(())
    }

    /// Remove a tenant's seed. Returns `false` when the tenant node does not
    /// exist.
    pub async fn delete_seed(&self, tenant_id: &str) -> Result<bool, SeedError> {
        check_tenant(tenant_id)?;
        tracing::warn!(
            tenant_id = %tenant_id,
            "deleting abstraction seed; existing abstracted IDs become orphaned"
        );

        let mut tx = Transaction::new();
        tx.remove_properties(
            tenant_key(tenant_id),
            vec![
                SEED_PROPERTY.to_string(),
                SEED_CREATED_AT_PROPERTY.to_string(),
            ],
        );
        let summary = self.session.commit(tx).await?;

        self.cache.write().remove(tenant_id);
        Ok(summary.unmatched_updates == 0)
    }
}
