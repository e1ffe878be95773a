//! Relationship writes, mirrored across both graphs
//!
//! Any edge with a resource endpoint is written twice: once against the
//! Original node (real ID) and once against the Abstracted node (pseudonymized
//! ID), so the two graphs stay isomorphic. Every write is a MERGE; edges whose
//! endpoints do not exist are skipped by the store and reported at debug
//! level. Each public call handles its own errors and returns `bool`, so one
//! failed relationship never blocks its siblings.

use crate::abstraction::IdAbstractor;
use crate::record::ResourceRecord;
use crate::{CONTAINS, RESOURCE_GROUP_LABEL, RESOURCE_LABEL, SUBSCRIPTION_LABEL};
use atg_storage::{EdgeMerge, GraphSession, GraphValue, NodeKey, NodeMerge, PropertyMap, Transaction};
use parking_lot::Mutex;
use std::sync::Arc;

/// Full resource-group ID as the provider spells it
pub fn resource_group_id(subscription_id: &str, resource_group: &str) -> String {
    format!("/subscriptions/{subscription_id}/resourceGroups/{resource_group}")
}

/// An edge from a resource to a target node, optionally upserting the target
#[derive(Debug, Clone, PartialEq)]
pub struct GenericLink {
    /// Real ID of the source resource
    pub source_id: String,
    pub rel_type: String,
    pub target: NodeKey,
    pub target_props: PropertyMap,
    /// Upsert the target (containers) or require it to exist (resources)
    pub create_target: bool,
}

impl GenericLink {
    pub fn upserting(source_id: &str, rel_type: &str, target: NodeKey) -> Self {
        Self {
            source_id: source_id.to_string(),
            rel_type: rel_type.to_string(),
            target,
            target_props: PropertyMap::new(),
            create_target: true,
        }
    }

    pub fn matching(source_id: &str, rel_type: &str, target: NodeKey) -> Self {
        Self {
            create_target: false,
            ..Self::upserting(source_id, rel_type, target)
        }
    }

    pub fn with_target_prop(mut self, name: &str, value: impl Into<GraphValue>) -> Self {
        self.target_props.insert(name.to_string(), value.into());
        self
    }
}

pub struct RelationshipWriter {
    session: GraphSession,
    abstractor: Arc<IdAbstractor>,
    batch_size: usize,
    buffer: Mutex<Vec<GenericLink>>,
}

impl RelationshipWriter {
    pub fn new(session: GraphSession, abstractor: Arc<IdAbstractor>, batch_size: usize) -> Self {
        Self {
            session,
            abstractor,
            batch_size: batch_size.max(1),
            buffer: Mutex::new(Vec::new()),
        }
    }

    fn is_resource(key: &NodeKey) -> bool {
        key.label == RESOURCE_LABEL && key.property == "id"
    }

    fn abstracted(&self, key: &NodeKey) -> NodeKey {
        NodeKey::by_id(RESOURCE_LABEL, self.abstractor.abstract_resource_id(&key.value))
    }

    /// The edge plus its Abstracted-graph twin when an endpoint is a resource
    fn mirrored(&self, edge: EdgeMerge) -> Vec<EdgeMerge> {
        let source_is_resource = Self::is_resource(&edge.source);
        let target_is_resource = Self::is_resource(&edge.target);
        if !source_is_resource && !target_is_resource {
            return vec![edge];
        }

        let mut twin = edge.clone();
        if source_is_resource {
            twin.source = self.abstracted(&edge.source);
        }
        if target_is_resource {
            twin.target = self.abstracted(&edge.target);
        }
        vec![edge, twin]
    }

    fn push_edge(&self, tx: &mut Transaction, edge: EdgeMerge) {
        for e in self.mirrored(edge) {
            tx.merge_edge(e);
        }
    }

    async fn commit(&self, context: &str, resource_id: &str, tx: Transaction) -> bool {
        match self.session.commit(tx).await {
            Ok(summary) => {
                if summary.edges_skipped > 0 {
                    tracing::debug!(
                        resource_id = %resource_id,
                        relationship = context,
                        skipped = summary.edges_skipped,
                        "relationship endpoints missing, edge skipped"
                    );
                }
                true
            }
            Err(err) => {
                tracing::warn!(
                    resource_id = %resource_id,
                    relationship = context,
                    error = %err,
                    "relationship write failed"
                );
                false
            }
        }
    }

    /// `Subscription -CONTAINS-> Resource`
    pub async fn create_subscription_relationship(&self, record: &ResourceRecord) -> bool {
        let Some(subscription_id) = record.subscription_id() else {
            return false;
        };
        let subscription = NodeKey::by_id(SUBSCRIPTION_LABEL, subscription_id);

        let mut tx = Transaction::new();
        tx.merge_node(NodeMerge::new(subscription.clone()));
        self.push_edge(
            &mut tx,
            EdgeMerge::new(subscription, CONTAINS, NodeKey::by_id(RESOURCE_LABEL, record.id())),
        );
        self.commit("subscription", record.id(), tx).await
    }

    /// `Subscription -CONTAINS-> ResourceGroup -CONTAINS-> Resource`
    pub async fn create_resource_group_relationships(&self, record: &ResourceRecord) -> bool {
        let (Some(subscription_id), Some(group)) = (record.subscription_id(), record.resource_group())
        else {
            return false;
        };
        let subscription = NodeKey::by_id(SUBSCRIPTION_LABEL, subscription_id);
        let rg = NodeKey::by_id(RESOURCE_GROUP_LABEL, resource_group_id(subscription_id, group));

        let mut tx = Transaction::new();
        tx.merge_node(NodeMerge::new(subscription.clone()));
        tx.merge_node(
            NodeMerge::new(rg.clone())
                .set("name", group)
                .set("subscription_id", subscription_id),
        );
        tx.merge_edge(EdgeMerge::new(subscription, CONTAINS, rg.clone()));
        self.push_edge(
            &mut tx,
            EdgeMerge::new(rg, CONTAINS, NodeKey::by_id(RESOURCE_LABEL, record.id())),
        );
        self.commit("resource_group", record.id(), tx).await
    }

    /// Resource-to-resource edge, e.g. `DEPENDS_ON`
    pub async fn create_relationship(&self, source_id: &str, rel_type: &str, target_id: &str) -> bool {
        let mut tx = Transaction::new();
        self.push_edge(
            &mut tx,
            EdgeMerge::new(
                NodeKey::by_id(RESOURCE_LABEL, source_id),
                rel_type,
                NodeKey::by_id(RESOURCE_LABEL, target_id),
            ),
        );
        self.commit(rel_type, source_id, tx).await
    }

    /// Upsert an arbitrary node; null properties are dropped
    pub async fn upsert_generic(
        &self,
        label: &str,
        key_prop: &str,
        key_value: &str,
        props: PropertyMap,
    ) -> bool {
        let mut tx = Transaction::new();
        tx.merge_node(generic_merge(
            NodeKey::new(label, key_prop, key_value),
            props,
        ));
        self.commit(label, key_value, tx).await
    }

    /// Edge from a resource to any node identified by label and key
    pub async fn create_generic_rel(
        &self,
        source_id: &str,
        rel_type: &str,
        target_key_value: &str,
        target_label: &str,
        target_key_prop: &str,
    ) -> bool {
        let mut tx = Transaction::new();
        self.push_edge(
            &mut tx,
            EdgeMerge::new(
                NodeKey::by_id(RESOURCE_LABEL, source_id),
                rel_type,
                NodeKey::new(target_label, target_key_prop, target_key_value),
            ),
        );
        self.commit(rel_type, source_id, tx).await
    }

    fn push_link(&self, tx: &mut Transaction, link: &GenericLink) {
        if link.create_target {
            tx.merge_node(generic_merge(link.target.clone(), link.target_props.clone()));
        }
        self.push_edge(
            tx,
            EdgeMerge::new(
                NodeKey::by_id(RESOURCE_LABEL, link.source_id.as_str()),
                link.rel_type.as_str(),
                link.target.clone(),
            ),
        );
    }

    /// Write one rule-emitted link immediately
    pub async fn write_link(&self, link: &GenericLink) -> bool {
        let mut tx = Transaction::new();
        self.push_link(&mut tx, link);
        self.commit(&link.rel_type, &link.source_id, tx).await
    }

    /// Buffer a link; a full buffer is flushed right away
    pub async fn queue_generic(&self, link: GenericLink) -> usize {
        let batch = {
            let mut buffer = self.buffer.lock();
            buffer.push(link);
            if buffer.len() >= self.batch_size {
                std::mem::take(&mut *buffer)
            } else {
                return 0;
            }
        };
        self.write_batch(batch).await
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Write everything buffered. Returns how many links were written.
    pub async fn flush(&self) -> usize {
        let pending = std::mem::take(&mut *self.buffer.lock());
        let mut written = 0;
        for chunk in pending.chunks(self.batch_size) {
            written += self.write_batch(chunk.to_vec()).await;
        }
        written
    }

    async fn write_batch(&self, batch: Vec<GenericLink>) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let mut tx = Transaction::new();
        for link in &batch {
            self.push_link(&mut tx, link);
        }
        match self.session.commit(tx).await {
            Ok(_) => batch.len(),
            Err(err) => {
                tracing::warn!(
                    links = batch.len(),
                    error = %err,
                    "batched relationship write failed, retrying individually"
                );
                let mut written = 0;
                for link in &batch {
                    if self.write_link(link).await {
                        written += 1;
                    }
                }
                written
            }
        }
    }
}

fn generic_merge(key: NodeKey, mut props: PropertyMap) -> NodeMerge {
    props.retain(|_, v| !v.is_null());
    NodeMerge::new(key).set_all(props)
}
