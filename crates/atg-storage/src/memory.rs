//! In-memory graph store with atomic commits and JSON snapshots
//!
//! Every write operation runs under one write lock, so a [`Transaction`] is
//! observed either entirely or not at all. Snapshots are whole-graph JSON
//! files, written to a temporary sibling and renamed into place.

use crate::{
    CommitSummary, Direction, Edge, EdgeMerge, GraphStore, GraphValue, LabelFilter, Node,
    NodeKey, NodeMerge, PropertyMap, StoreResult, Transaction, WriteOp,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

type EdgeKey = (NodeKey, String, NodeKey);

#[derive(Debug, Default)]
struct GraphData {
    nodes: BTreeMap<NodeKey, Node>,
    edges: BTreeMap<EdgeKey, Edge>,
}

/// On-disk snapshot format
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

/// In-memory [`GraphStore`]
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    data: RwLock<GraphData>,
    calls: AtomicU64,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot if `path` exists, else start empty
    pub fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let contents = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&contents)?;

        let mut data = GraphData::default();
        for node in snapshot.nodes {
            data.nodes.insert(node.key.clone(), node);
        }
        for edge in snapshot.edges {
            let key = (edge.source.clone(), edge.rel_type.clone(), edge.target.clone());
            data.edges.insert(key, edge);
        }

        tracing::debug!(
            path = %path.display(),
            nodes = data.nodes.len(),
            edges = data.edges.len(),
            saved_at = %snapshot.saved_at,
            "loaded graph snapshot"
        );

        Ok(Self {
            data: RwLock::new(data),
            calls: AtomicU64::new(0),
        })
    }

    /// Write the whole graph to `path`
    pub fn save_snapshot(&self, path: &Path) -> StoreResult<()> {
        let snapshot = {
            let data = self.data.read();
            Snapshot {
                saved_at: Utc::now(),
                nodes: data.nodes.values().cloned().collect(),
                edges: data.edges.values().cloned().collect(),
            }
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&snapshot)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Number of trait calls served so far
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn node_count(&self) -> usize {
        self.data.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.data.read().edges.len()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.data.read().nodes.values().cloned().collect()
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.data.read().edges.values().cloned().collect()
    }

    /// Edges of one type, in key order
    pub fn edges_of_type(&self, rel_type: &str) -> Vec<Edge> {
        self.data
            .read()
            .edges
            .values()
            .filter(|e| e.rel_type == rel_type)
            .cloned()
            .collect()
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Write application
// ============================================================================

fn apply_set(properties: &mut PropertyMap, key: &NodeKey, set: &PropertyMap) {
    for (name, value) in set {
        if *name == key.property {
            continue;
        }
        if value.is_null() {
            properties.remove(name);
        } else {
            properties.insert(name.clone(), value.clone());
        }
    }
}

fn apply_coalesce(properties: &mut PropertyMap, coalesce: &PropertyMap) {
    for (name, value) in coalesce {
        if !value.is_null() && !properties.contains_key(name) {
            properties.insert(name.clone(), value.clone());
        }
    }
}

impl GraphData {
    fn merge_node(&mut self, merge: &NodeMerge, summary: &mut CommitSummary) -> Node {
        if let Some(node) = self.nodes.get_mut(&merge.key) {
            summary.nodes_matched += 1;
            node.labels.extend(merge.labels.iter().cloned());
            apply_set(&mut node.properties, &merge.key, &merge.set);
            apply_coalesce(&mut node.properties, &merge.coalesce);
            return node.clone();
        }

        summary.nodes_created += 1;
        let mut labels: BTreeSet<String> = merge.labels.clone();
        labels.insert(merge.key.label.clone());

        let mut properties = PropertyMap::new();
        properties.insert(
            merge.key.property.clone(),
            GraphValue::String(merge.key.value.clone()),
        );
        apply_set(&mut properties, &merge.key, &merge.on_create);
        apply_set(&mut properties, &merge.key, &merge.set);
        apply_coalesce(&mut properties, &merge.coalesce);

        let node = Node {
            key: merge.key.clone(),
            labels,
            properties,
        };
        self.nodes.insert(merge.key.clone(), node.clone());
        node
    }

    fn merge_edge(&mut self, merge: &EdgeMerge, summary: &mut CommitSummary) {
        if !self.nodes.contains_key(&merge.source) || !self.nodes.contains_key(&merge.target) {
            summary.edges_skipped += 1;
            return;
        }

        let key = (
            merge.source.clone(),
            merge.rel_type.clone(),
            merge.target.clone(),
        );
        if let Some(edge) = self.edges.get_mut(&key) {
            summary.edges_matched += 1;
            for (name, value) in &merge.set {
                if value.is_null() {
                    edge.properties.remove(name);
                } else {
                    edge.properties.insert(name.clone(), value.clone());
                }
            }
            return;
        }

        summary.edges_created += 1;
        let mut properties = PropertyMap::new();
        for (name, value) in merge.on_create.iter().chain(merge.set.iter()) {
            if !value.is_null() {
                properties.insert(name.clone(), value.clone());
            }
        }
        self.edges.insert(
            key,
            Edge {
                source: merge.source.clone(),
                rel_type: merge.rel_type.clone(),
                target: merge.target.clone(),
                properties,
            },
        );
    }

    fn apply(&mut self, op: &WriteOp, summary: &mut CommitSummary) {
        match op {
            WriteOp::MergeNode(merge) => {
                self.merge_node(merge, summary);
            }
            WriteOp::MergeEdge(merge) => self.merge_edge(merge, summary),
            WriteOp::SetProperties { key, properties } => match self.nodes.get_mut(key) {
                Some(node) => apply_set(&mut node.properties, key, properties),
                None => summary.unmatched_updates += 1,
            },
            WriteOp::RemoveProperties { key, names } => match self.nodes.get_mut(key) {
                Some(node) => {
                    for name in names {
                        if *name != key.property {
                            node.properties.remove(name);
                        }
                    }
                }
                None => summary.unmatched_updates += 1,
            },
        }
    }
}

// ============================================================================
// GraphStore
// ============================================================================

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn ping(&self) -> StoreResult<()> {
        self.touch();
        Ok(())
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<CommitSummary> {
        self.touch();
        let mut summary = CommitSummary::default();
        let mut data = self.data.write();
        for op in tx.ops() {
            data.apply(op, &mut summary);
        }
        Ok(summary)
    }

    async fn merge_node(&self, merge: NodeMerge) -> StoreResult<Node> {
        self.touch();
        let mut summary = CommitSummary::default();
        Ok(self.data.write().merge_node(&merge, &mut summary))
    }

    async fn get_node(&self, key: &NodeKey) -> StoreResult<Option<Node>> {
        self.touch();
        Ok(self.data.read().nodes.get(key).cloned())
    }

    async fn nodes_with_label(&self, label: &str) -> StoreResult<Vec<Node>> {
        self.touch();
        Ok(self
            .data
            .read()
            .nodes
            .values()
            .filter(|n| n.has_label(label))
            .cloned()
            .collect())
    }

    async fn neighbors(
        &self,
        key: &NodeKey,
        rel_type: &str,
        direction: Direction,
    ) -> StoreResult<Vec<Node>> {
        self.touch();
        let data = self.data.read();
        let neighbors = data
            .edges
            .values()
            .filter(|e| e.rel_type == rel_type)
            .filter_map(|e| match direction {
                Direction::Outgoing if e.source == *key => data.nodes.get(&e.target),
                Direction::Incoming if e.target == *key => data.nodes.get(&e.source),
                _ => None,
            })
            .cloned()
            .collect();
        Ok(neighbors)
    }

    async fn edge_type_counts(
        &self,
        filter: &LabelFilter,
        direction: Direction,
    ) -> StoreResult<BTreeMap<String, u64>> {
        self.touch();
        let data = self.data.read();
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for edge in data.edges.values() {
            let anchor = match direction {
                Direction::Outgoing => &edge.source,
                Direction::Incoming => &edge.target,
            };
            let matches = data
                .nodes
                .get(anchor)
                .map_or(false, |node| filter.matches(node));
            if matches {
                *counts.entry(edge.rel_type.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}
