//! Best-effort reads of what the graph already knows about a resource
//!
//! Every read swallows store errors: a failed lookup means "unknown", and an
//! unknown resource simply gets processed.

use crate::{ProcessingStatus, ORIGINAL_LABEL, RESOURCE_LABEL};
use atg_storage::{GraphSession, Node, NodeKey};

/// Last-known state of a resource's Original node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingMetadata {
    pub updated_at: Option<String>,
    pub description: Option<String>,
    pub processing_status: Option<String>,
}

impl ProcessingMetadata {
    pub fn is_empty(&self) -> bool {
        self.updated_at.is_none() && self.description.is_none() && self.processing_status.is_none()
    }

    pub fn status(&self) -> Option<ProcessingStatus> {
        self.processing_status
            .as_deref()
            .and_then(ProcessingStatus::parse)
    }
}

/// True when `description` is empty or the templated fallback text
pub fn is_fallback_description(description: &str, provider: &str) -> bool {
    let text = description.trim();
    text.is_empty() || (text.starts_with(&format!("{provider} ")) && text.ends_with("resource."))
}

pub struct StateOracle {
    session: GraphSession,
    provider_name: String,
}

impl StateOracle {
    pub fn new(session: GraphSession, provider_name: impl Into<String>) -> Self {
        Self {
            session,
            provider_name: provider_name.into(),
        }
    }

    async fn original(&self, resource_id: &str) -> Option<Node> {
        match self
            .session
            .get_node(&NodeKey::by_id(RESOURCE_LABEL, resource_id))
            .await
        {
            Ok(node) => node.filter(|n| n.has_label(ORIGINAL_LABEL)),
            Err(err) => {
                tracing::warn!(
                    resource_id = %resource_id,
                    error = %err,
                    "state lookup failed, treating resource as unknown"
                );
                None
            }
        }
    }

    pub async fn resource_exists(&self, resource_id: &str) -> bool {
        self.original(resource_id).await.is_some()
    }

    /// Whether the resource carries a real (non-fallback) description
    pub async fn has_description(&self, resource_id: &str) -> bool {
        self.original(resource_id)
            .await
            .and_then(|node| node.get_str("description").map(str::to_string))
            .map_or(false, |d| !is_fallback_description(&d, &self.provider_name))
    }

    /// Empty metadata when the resource is absent or the read fails
    pub async fn get_processing_metadata(&self, resource_id: &str) -> ProcessingMetadata {
        let Some(node) = self.original(resource_id).await else {
            return ProcessingMetadata::default();
        };
        let text = |name: &str| node.get_str(name).map(str::to_string);
        ProcessingMetadata {
            updated_at: text("updated_at"),
            description: text("description"),
            processing_status: text("processing_status"),
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }
}
