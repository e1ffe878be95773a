//! Error types for the processing pipeline

use atg_storage::StoreError;

/// A record that cannot be written because required fields are missing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("resource '{resource_id}' is missing required fields: {}", missing.join(", "))]
pub struct ValidationError {
    pub resource_id: String,
    pub missing: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("tenant id must not be empty")]
    EmptyTenantId,
    #[error("stored abstraction seed for tenant '{tenant_id}' is invalid")]
    InvalidSeed { tenant_id: String },
    #[error("refusing to store an invalid abstraction seed for tenant '{tenant_id}'")]
    RejectedSeed { tenant_id: String },
    #[error("seed store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors that abort a whole run or a single resource's workflow
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Seed(#[from] SeedError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to write resource '{resource_id}'")]
    WriteFailed { resource_id: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type ProcessingResult<T> = Result<T, ProcessingError>;
