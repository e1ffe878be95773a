//! Natural-language descriptions for resources and containers
//!
//! The generator itself (typically an LLM client) lives outside this crate;
//! whatever it returns, or fails to return, is backed by deterministic
//! fallback text.

use crate::record::ResourceRecord;
use atg_storage::Node;

/// Produces descriptions for resources and container summaries
#[async_trait::async_trait]
pub trait DescriptionGenerator: Send + Sync {
    async fn generate_resource_description(&self, record: &ResourceRecord)
        -> anyhow::Result<String>;

    async fn generate_resource_group_summary(
        &self,
        group_name: &str,
        members: &[Node],
    ) -> anyhow::Result<String>;

    async fn generate_tag_summary(
        &self,
        key: &str,
        value: &str,
        members: &[Node],
    ) -> anyhow::Result<String>;
}

/// Templated text used when no generator is available or it fails
#[derive(Debug, Clone)]
pub struct FallbackDescriptions {
    provider_name: String,
}

impl FallbackDescriptions {
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
        }
    }

    /// `"{provider} {type} resource."`
    pub fn resource(&self, record: &ResourceRecord) -> String {
        format!(
            "{} {} resource.",
            self.provider_name,
            record.resource_type().unwrap_or("unknown")
        )
    }

    pub fn resource_group(&self, group_name: &str, member_count: usize) -> String {
        format!(
            "{} resource group {group_name} containing {member_count} resources.",
            self.provider_name
        )
    }

    pub fn tag(&self, key: &str, value: &str, member_count: usize) -> String {
        format!("Tag {key}={value} applied to {member_count} resources.")
    }
}
