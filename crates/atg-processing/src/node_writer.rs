//! Dual-record upsert of a resource
//!
//! ```text
//!   (:Subscription {id: sub})
//!
//!   (:Resource:Original {id: real_id, abstracted_id, processing_status, ...})
//!        ▲
//!        │ SCAN_SOURCE_NODE {scan_id, tenant_id, created_at, confidence}
//!        │
//!   (:Resource {id: abstracted_id, original_id, abstraction_type, ...})
//! ```
//!
//! All four writes go out as one transaction. The Abstracted copy of a role
//! assignment has its principal pseudonymized and subscription GUIDs redacted.

use crate::abstraction::{type_prefix, IdAbstractor};
use crate::error::{ProcessingError, ProcessingResult};
use crate::record::{ResourceRecord, ROLE_ASSIGNMENT_TYPE, VIRTUAL_NETWORK_TYPE};
use crate::serialize::serialize_properties;
use crate::{
    ProcessingStatus, ORIGINAL_LABEL, RESOURCE_LABEL, SCAN_SOURCE_NODE, SUBSCRIPTION_LABEL,
};
use atg_storage::{
    CommitSummary, EdgeMerge, GraphSession, NodeKey, NodeMerge, PropertyMap, Transaction,
};
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct NodeWriter {
    session: GraphSession,
    abstractor: Arc<IdAbstractor>,
    scan_id: String,
    max_json_length: usize,
}

impl NodeWriter {
    pub fn new(
        session: GraphSession,
        abstractor: Arc<IdAbstractor>,
        scan_id: impl Into<String>,
        max_json_length: usize,
    ) -> Self {
        Self {
            session,
            abstractor,
            scan_id: scan_id.into(),
            max_json_length,
        }
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn abstractor(&self) -> &IdAbstractor {
        &self.abstractor
    }

    pub fn original_key(&self, real_id: &str) -> NodeKey {
        NodeKey::by_id(RESOURCE_LABEL, real_id)
    }

    pub fn abstracted_key(&self, real_id: &str) -> NodeKey {
        NodeKey::by_id(RESOURCE_LABEL, self.abstractor.abstract_resource_id(real_id))
    }

    /// Write both records of a resource. Failures are logged and reported as
    /// `false`; they never propagate.
    pub async fn upsert_resource(&self, record: &ResourceRecord, status: ProcessingStatus) -> bool {
        match self.try_upsert_resource(record, status).await {
            Ok(summary) => {
                tracing::debug!(
                    resource_id = %record.id(),
                    nodes_created = summary.nodes_created,
                    "resource upserted"
                );
                true
            }
            Err(ProcessingError::Validation(err)) => {
                tracing::warn!(
                    resource_id = %record.id(),
                    missing = ?err.missing,
                    "resource failed validation, not written"
                );
                false
            }
            Err(err) => {
                tracing::error!(resource_id = %record.id(), error = %err, "resource upsert failed");
                false
            }
        }
    }

    /// Like [`upsert_resource`](Self::upsert_resource) but returns the cause
    pub async fn try_upsert_resource(
        &self,
        record: &ResourceRecord,
        status: ProcessingStatus,
    ) -> ProcessingResult<CommitSummary> {
        record.validate()?;

        let real_id = record.id();
        let abstracted_id = self.abstractor.abstract_resource_id(real_id);
        let fields = self.prepare_fields(record, status);
        let now = chrono::Utc::now().to_rfc3339();

        let original_key = self.original_key(real_id);
        let abstracted_key = NodeKey::by_id(RESOURCE_LABEL, abstracted_id.as_str());

        let original_props = self.serialize(&fields);

        let mut abstracted_fields = fields;
        abstracted_fields.remove("id");
        if record.is_type(ROLE_ASSIGNMENT_TYPE) {
            self.abstractor.redact_role_assignment(&mut abstracted_fields);
        }
        let abstracted_props = self.serialize(&abstracted_fields);

        let mut tx = Transaction::new();
        if let Some(subscription_id) = record.subscription_id() {
            tx.merge_node(NodeMerge::new(NodeKey::by_id(SUBSCRIPTION_LABEL, subscription_id)));
        }
        tx.merge_node(
            NodeMerge::new(original_key.clone())
                .label(ORIGINAL_LABEL)
                .set_all(original_props)
                .set("abstracted_id", abstracted_id.as_str()),
        );
        tx.merge_node(
            NodeMerge::new(abstracted_key.clone())
                .set_all(abstracted_props)
                .set("original_id", real_id)
                .set("abstracted_id", abstracted_id.as_str())
                .set("abstraction_type", type_prefix(real_id)),
        );
        tx.merge_edge(
            EdgeMerge::new(abstracted_key, SCAN_SOURCE_NODE, original_key)
                .on_create("created_at", now)
                .set("scan_id", self.scan_id.as_str())
                .set("tenant_id", self.abstractor.tenant_id())
                .set("confidence", "exact"),
        );

        Ok(self.session.commit(tx).await?)
    }

    fn prepare_fields(&self, record: &ResourceRecord, status: ProcessingStatus) -> Map<String, Value> {
        let mut fields = record.fields().clone();

        if !matches!(fields.get("description"), Some(Value::String(_))) {
            fields.insert("description".to_string(), Value::String(String::new()));
        }
        fields.insert(
            "processing_status".to_string(),
            Value::String(status.as_str().to_string()),
        );
        fields.insert(
            "updated_at".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );

        if record.is_type(VIRTUAL_NETWORK_TYPE) {
            let prefixes = record
                .get("properties")
                .and_then(|p| p.get("addressSpace"))
                .and_then(|a| a.get("addressPrefixes"))
                .filter(|p| p.is_array())
                .cloned();
            if let Some(prefixes) = prefixes {
                fields.insert("addressSpace".to_string(), prefixes);
            }
        }

        // an empty enumeration response must not clobber stored properties
        if matches!(fields.get("properties"), Some(Value::Object(m)) if m.is_empty()) {
            fields.remove("properties");
        }

        fields
    }

    fn serialize(&self, fields: &Map<String, Value>) -> PropertyMap {
        let mut props = serialize_properties(fields, self.max_json_length);
        props.retain(|_, v| !v.is_null());
        props
    }

    /// Record a lifecycle marker on the Original node, creating it if needed
    pub async fn mark_status(&self, real_id: &str, status: ProcessingStatus) -> bool {
        let merge = NodeMerge::new(self.original_key(real_id))
            .label(ORIGINAL_LABEL)
            .set("processing_status", status.as_str())
            .set("updated_at", chrono::Utc::now().to_rfc3339());

        match self.session.merge_node(merge).await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(
                    resource_id = %real_id,
                    status = %status,
                    error = %err,
                    "failed to record processing status"
                );
                false
            }
        }
    }

    /// Set `description` on an existing node; a missing node is a no-op
    pub async fn set_description(&self, key: &NodeKey, description: &str) -> bool {
        let mut props = PropertyMap::new();
        props.insert("description".to_string(), description.into());
        let mut tx = Transaction::new();
        tx.set_properties(key.clone(), props);

        match self.session.commit(tx).await {
            Ok(summary) => summary.unmatched_updates == 0,
            Err(err) => {
                tracing::warn!(node = %key, error = %err, "failed to store description");
                false
            }
        }
    }
}
