//! Tenant Grapher Storage Layer
//!
//! Provides the graph-store boundary used by the processing pipeline:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        GRAPH STORAGE                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌────────────┐    ┌──────────────┐    ┌──────────────────────┐     │
//! │  │ Processing │───►│ GraphSession │───►│ dyn GraphStore       │     │
//! │  │  pipeline  │    │ (timeouts,   │    │  - MemoryGraphStore  │     │
//! │  └────────────┘    │  lifecycle)  │    │  - database adapters │     │
//! │                    └──────────────┘    └──────────────────────┘     │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **MERGE semantics**: nodes and edges are upserted by key, never duplicated
//! - **Transactional**: a [`Transaction`] is applied atomically or not at all
//! - **Create-if-absent**: `coalesce` properties are only written when missing,
//!   in the same atomic step as the merge
//! - **Bounded calls**: [`GraphSession`] puts a timeout on every operation

pub mod memory;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use memory::MemoryGraphStore;

// ============================================================================
// Core Types
// ============================================================================

/// A property value the graph store accepts.
///
/// Stores reject nested maps, so anything map-shaped must be flattened to a
/// string before it gets here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<GraphValue>),
}

impl GraphValue {
    pub fn is_null(&self) -> bool {
        matches!(self, GraphValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GraphValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[GraphValue]> {
        match self {
            GraphValue::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

impl From<&str> for GraphValue {
    fn from(value: &str) -> Self {
        GraphValue::String(value.to_string())
    }
}

impl From<String> for GraphValue {
    fn from(value: String) -> Self {
        GraphValue::String(value)
    }
}

impl From<bool> for GraphValue {
    fn from(value: bool) -> Self {
        GraphValue::Bool(value)
    }
}

impl From<i64> for GraphValue {
    fn from(value: i64) -> Self {
        GraphValue::Int(value)
    }
}

impl From<f64> for GraphValue {
    fn from(value: f64) -> Self {
        GraphValue::Float(value)
    }
}

impl From<Vec<GraphValue>> for GraphValue {
    fn from(value: Vec<GraphValue>) -> Self {
        GraphValue::List(value)
    }
}

/// Node/edge properties
pub type PropertyMap = BTreeMap<String, GraphValue>;

/// Identity of a node: the label it is merged under plus its key property.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub label: String,
    pub property: String,
    pub value: String,
}

impl NodeKey {
    pub fn new(
        label: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            property: property.into(),
            value: value.into(),
        }
    }

    /// Key on the conventional `id` property
    pub fn by_id(label: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(label, "id", id)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(:{} {{{}: '{}'}})", self.label, self.property, self.value)
    }
}

/// A stored node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub key: NodeKey,
    pub labels: BTreeSet<String>,
    pub properties: PropertyMap,
}

impl Node {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn get(&self, name: &str) -> Option<&GraphValue> {
        self.properties.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(GraphValue::as_str)
    }
}

/// A stored, directed edge. At most one edge exists per (source, type, target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeKey,
    pub rel_type: String,
    pub target: NodeKey,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Label predicate used by aggregate queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    pub require: Vec<String>,
    pub exclude: Vec<String>,
}

impl LabelFilter {
    pub fn require(mut self, label: impl Into<String>) -> Self {
        self.require.push(label.into());
        self
    }

    pub fn exclude(mut self, label: impl Into<String>) -> Self {
        self.exclude.push(label.into());
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        self.require.iter().all(|l| node.has_label(l))
            && !self.exclude.iter().any(|l| node.has_label(l))
    }
}

// ============================================================================
// Write Operations
// ============================================================================

/// MERGE of a single node.
///
/// `on_create` is applied only when the node is new, `set` always, and
/// `coalesce` only for properties the node does not have yet. A `Null` in
/// `set` or `on_create` removes the property.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMerge {
    pub key: NodeKey,
    pub labels: BTreeSet<String>,
    pub on_create: PropertyMap,
    pub set: PropertyMap,
    pub coalesce: PropertyMap,
}

impl NodeMerge {
    pub fn new(key: NodeKey) -> Self {
        Self {
            key,
            labels: BTreeSet::new(),
            on_create: PropertyMap::new(),
            set: PropertyMap::new(),
            coalesce: PropertyMap::new(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn on_create(mut self, name: impl Into<String>, value: impl Into<GraphValue>) -> Self {
        self.on_create.insert(name.into(), value.into());
        self
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<GraphValue>) -> Self {
        self.set.insert(name.into(), value.into());
        self
    }

    pub fn set_all(mut self, properties: PropertyMap) -> Self {
        self.set.extend(properties);
        self
    }

    pub fn coalesce(mut self, name: impl Into<String>, value: impl Into<GraphValue>) -> Self {
        self.coalesce.insert(name.into(), value.into());
        self
    }
}

/// MERGE of a single edge. Both endpoints must already exist; otherwise the
/// merge is skipped (MATCH semantics) and reported in [`CommitSummary`].
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMerge {
    pub source: NodeKey,
    pub rel_type: String,
    pub target: NodeKey,
    pub on_create: PropertyMap,
    pub set: PropertyMap,
}

impl EdgeMerge {
    pub fn new(source: NodeKey, rel_type: impl Into<String>, target: NodeKey) -> Self {
        Self {
            source,
            rel_type: rel_type.into(),
            target,
            on_create: PropertyMap::new(),
            set: PropertyMap::new(),
        }
    }

    pub fn on_create(mut self, name: impl Into<String>, value: impl Into<GraphValue>) -> Self {
        self.on_create.insert(name.into(), value.into());
        self
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<GraphValue>) -> Self {
        self.set.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    MergeNode(NodeMerge),
    MergeEdge(EdgeMerge),
    /// MATCH + SET; a no-op when the node does not exist
    SetProperties {
        key: NodeKey,
        properties: PropertyMap,
    },
    /// MATCH + REMOVE; a no-op when the node does not exist
    RemoveProperties { key: NodeKey, names: Vec<String> },
}

/// A batch of writes applied atomically by [`GraphStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    ops: Vec<WriteOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_node(&mut self, merge: NodeMerge) -> &mut Self {
        self.ops.push(WriteOp::MergeNode(merge));
        self
    }

    pub fn merge_edge(&mut self, merge: EdgeMerge) -> &mut Self {
        self.ops.push(WriteOp::MergeEdge(merge));
        self
    }

    pub fn set_properties(&mut self, key: NodeKey, properties: PropertyMap) -> &mut Self {
        self.ops.push(WriteOp::SetProperties { key, properties });
        self
    }

    pub fn remove_properties(&mut self, key: NodeKey, names: Vec<String>) -> &mut Self {
        self.ops.push(WriteOp::RemoveProperties { key, names });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// What a commit did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub nodes_created: usize,
    pub nodes_matched: usize,
    pub edges_created: usize,
    pub edges_matched: usize,
    /// Edge merges dropped because an endpoint does not exist
    pub edges_skipped: usize,
    /// SET/REMOVE operations whose node does not exist
    pub unmatched_updates: usize,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("session is closed")]
    Closed,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Store Interface
// ============================================================================

/// The graph database boundary.
///
/// Implementations are expected to provide their own retry-on-transient-error
/// behavior at the connection layer; callers only see the final outcome.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Cheap liveness probe, used when a session is opened
    async fn ping(&self) -> StoreResult<()>;

    /// Apply all writes atomically
    async fn commit(&self, tx: Transaction) -> StoreResult<CommitSummary>;

    /// Apply a single node merge atomically and return the stored node
    async fn merge_node(&self, merge: NodeMerge) -> StoreResult<Node>;

    async fn get_node(&self, key: &NodeKey) -> StoreResult<Option<Node>>;

    async fn nodes_with_label(&self, label: &str) -> StoreResult<Vec<Node>>;

    /// Nodes connected to `key` by `rel_type` edges in the given direction
    async fn neighbors(
        &self,
        key: &NodeKey,
        rel_type: &str,
        direction: Direction,
    ) -> StoreResult<Vec<Node>>;

    /// Edge counts per relationship type. `Outgoing` counts edges whose source
    /// matches the filter, `Incoming` edges whose target does.
    async fn edge_type_counts(
        &self,
        filter: &LabelFilter,
        direction: Direction,
    ) -> StoreResult<BTreeMap<String, u64>>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Connection/operation limits for a [`GraphSession`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Budget for the liveness probe when opening a session
    pub connect_timeout_ms: u64,
    /// Budget for each individual store call
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            operation_timeout_ms: 30_000,
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

// ============================================================================
// Session
// ============================================================================

/// An explicitly opened handle on a graph store.
///
/// Lifecycle is `open` → use → `close`. Clones share the same open/closed
/// state, so closing any clone closes them all. Every call is bounded by
/// `operation_timeout`; a timeout surfaces as [`StoreError::Timeout`].
#[derive(Clone)]
pub struct GraphSession {
    store: Arc<dyn GraphStore>,
    config: StoreConfig,
    closed: Arc<AtomicBool>,
}

impl fmt::Debug for GraphSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSession")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl GraphSession {
    /// Open a session, verifying the store answers within `connect_timeout`
    pub async fn open(store: Arc<dyn GraphStore>, config: StoreConfig) -> StoreResult<Self> {
        let connect_timeout = config.connect_timeout();
        match tokio::time::timeout(connect_timeout, store.ping()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StoreError::Timeout {
                    operation: "ping",
                    after: connect_timeout,
                })
            }
        }

        tracing::debug!(
            operation_timeout_ms = config.operation_timeout_ms,
            "graph session opened"
        );

        Ok(Self {
            store,
            config,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("graph session closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn run<T, F>(&self, operation: &'static str, call: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let budget = self.config.operation_timeout();
        match tokio::time::timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                operation,
                after: budget,
            }),
        }
    }

    pub async fn commit(&self, tx: Transaction) -> StoreResult<CommitSummary> {
        self.run("commit", self.store.commit(tx)).await
    }

    pub async fn merge_node(&self, merge: NodeMerge) -> StoreResult<Node> {
        self.run("merge_node", self.store.merge_node(merge)).await
    }

    pub async fn get_node(&self, key: &NodeKey) -> StoreResult<Option<Node>> {
        self.run("get_node", self.store.get_node(key)).await
    }

    pub async fn nodes_with_label(&self, label: &str) -> StoreResult<Vec<Node>> {
        self.run("nodes_with_label", self.store.nodes_with_label(label))
            .await
    }

    pub async fn neighbors(
        &self,
        key: &NodeKey,
        rel_type: &str,
        direction: Direction,
    ) -> StoreResult<Vec<Node>> {
        self.run("neighbors", self.store.neighbors(key, rel_type, direction))
            .await
    }

    pub async fn edge_type_counts(
        &self,
        filter: &LabelFilter,
        direction: Direction,
    ) -> StoreResult<BTreeMap<String, u64>> {
        self.run(
            "edge_type_counts",
            self.store.edge_type_counts(filter, direction),
        )
        .await
    }
}
