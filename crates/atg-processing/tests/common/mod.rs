//! Shared fixtures for processing integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use atg_processing::{ProcessorConfig, ResourceRecord};
use atg_storage::{
    CommitSummary, Direction, GraphSession, GraphStore, LabelFilter, MemoryGraphStore, Node,
    NodeKey, NodeMerge, StoreConfig, StoreError, StoreResult, Transaction, WriteOp,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TENANT: &str = "tenant-0001";
pub const SUB: &str = "11111111-2222-3333-4444-555555555555";

/// Wraps a memory store with call counting, injected commit failures and stalls
pub struct FlakyStore {
    inner: Arc<MemoryGraphStore>,
    failures: Mutex<HashMap<String, usize>>,
    edge_failures: Mutex<HashMap<String, usize>>,
    stalls: Mutex<HashMap<String, (usize, Duration)>>,
    calls: AtomicU64,
    injected: AtomicU64,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryGraphStore>) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
            edge_failures: Mutex::new(HashMap::new()),
            stalls: Mutex::new(HashMap::new()),
            calls: AtomicU64::new(0),
            injected: AtomicU64::new(0),
        }
    }

    /// Fail the next `times` commits that write the Original node `resource_id`
    pub fn fail_commits_for(&self, resource_id: &str, times: usize) {
        self.failures.lock().insert(resource_id.to_string(), times);
    }

    /// Fail the next `times` commits that merge an edge of `rel_type`
    pub fn fail_commits_with_edge(&self, rel_type: &str, times: usize) {
        self.edge_failures.lock().insert(rel_type.to_string(), times);
    }

    /// Hold the next `times` commits that write the Original node
    /// `resource_id` for `delay` before answering
    pub fn stall_commits_for(&self, resource_id: &str, times: usize, delay: Duration) {
        self.stalls
            .lock()
            .insert(resource_id.to_string(), (times, delay));
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn injected_failures(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    fn should_fail(&self, tx: &Transaction) -> bool {
        let mut failures = self.failures.lock();
        let mut edge_failures = self.edge_failures.lock();
        for op in tx.ops() {
            let remaining = match op {
                WriteOp::MergeNode(merge) if merge.labels.contains("Original") => {
                    failures.get_mut(&merge.key.value)
                }
                WriteOp::MergeEdge(merge) => edge_failures.get_mut(&merge.rel_type),
                _ => None,
            };
            if let Some(remaining) = remaining {
                if *remaining > 0 {
                    *remaining -= 1;
                    return true;
                }
            }
        }
        false
    }

    fn stall_delay(&self, tx: &Transaction) -> Option<Duration> {
        let mut stalls = self.stalls.lock();
        for op in tx.ops() {
            if let WriteOp::MergeNode(merge) = op {
                if !merge.labels.contains("Original") {
                    continue;
                }
                if let Some((remaining, delay)) = stalls.get_mut(&merge.key.value) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Some(*delay);
                    }
                }
            }
        }
        None
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GraphStore for FlakyStore {
    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn commit(&self, tx: Transaction) -> StoreResult<CommitSummary> {
        self.touch();
        if self.should_fail(&tx) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        if let Some(delay) = self.stall_delay(&tx) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
        }
        self.inner.commit(tx).await
    }

    async fn merge_node(&self, merge: NodeMerge) -> StoreResult<Node> {
        self.touch();
        self.inner.merge_node(merge).await
    }

    async fn get_node(&self, key: &NodeKey) -> StoreResult<Option<Node>> {
        self.touch();
        self.inner.get_node(key).await
    }

    async fn nodes_with_label(&self, label: &str) -> StoreResult<Vec<Node>> {
        self.touch();
        self.inner.nodes_with_label(label).await
    }

    async fn neighbors(
        &self,
        key: &NodeKey,
        rel_type: &str,
        direction: Direction,
    ) -> StoreResult<Vec<Node>> {
        self.touch();
        self.inner.neighbors(key, rel_type, direction).await
    }

    async fn edge_type_counts(
        &self,
        filter: &LabelFilter,
        direction: Direction,
    ) -> StoreResult<BTreeMap<String, u64>> {
        self.touch();
        self.inner.edge_type_counts(filter, direction).await
    }
}

pub struct TestEnv {
    pub session: GraphSession,
    pub memory: Arc<MemoryGraphStore>,
    pub flaky: Arc<FlakyStore>,
}

/// Session over a flaky wrapper around a fresh memory store
pub async fn test_env() -> TestEnv {
    test_env_with(StoreConfig::default()).await
}

pub async fn test_env_with(config: StoreConfig) -> TestEnv {
    let memory = Arc::new(MemoryGraphStore::new());
    let flaky = Arc::new(FlakyStore::new(memory.clone()));
    let session = GraphSession::open(flaky.clone(), config)
        .await
        .unwrap();
    TestEnv {
        session,
        memory,
        flaky,
    }
}

/// Fast retries and polling
pub fn fast_config() -> ProcessorConfig {
    ProcessorConfig {
        retry_base_delay_ms: 5,
        poll_interval_ms: 5,
        ..Default::default()
    }
}

pub fn resource_id(group: &str, provider: &str, kind: &str, name: &str) -> String {
    format!("/subscriptions/{SUB}/resourceGroups/{group}/providers/{provider}/{kind}/{name}")
}

pub fn vm(group: &str, name: &str) -> ResourceRecord {
    ResourceRecord::from_value(json!({
        "id": resource_id(group, "Microsoft.Compute", "virtualMachines", name),
        "name": name,
        "type": "Microsoft.Compute/virtualMachines",
        "location": "eastus",
        "resourceGroup": group,
        "subscriptionId": SUB,
        "tags": {"env": "prod"},
        "properties": {"hardwareProfile": {"vmSize": "Standard_B2s"}},
    }))
    .unwrap()
}

pub fn storage_account(group: &str, name: &str) -> ResourceRecord {
    ResourceRecord::from_value(json!({
        "id": resource_id(group, "Microsoft.Storage", "storageAccounts", name),
        "name": name,
        "type": "Microsoft.Storage/storageAccounts",
        "location": "westeurope",
        "resourceGroup": group,
        "subscriptionId": SUB,
        "sku": {"name": "Standard_LRS"},
    }))
    .unwrap()
}

pub fn vnet(group: &str, name: &str) -> ResourceRecord {
    ResourceRecord::from_value(json!({
        "id": resource_id(group, "Microsoft.Network", "virtualNetworks", name),
        "name": name,
        "type": "Microsoft.Network/virtualNetworks",
        "location": "eastus",
        "resourceGroup": group,
        "subscriptionId": SUB,
        "properties": {"addressSpace": {"addressPrefixes": ["10.0.0.0/16", "10.1.0.0/16"]}},
    }))
    .unwrap()
}

pub fn role_assignment(name: &str, principal: &str) -> ResourceRecord {
    ResourceRecord::from_value(json!({
        "id": format!("/subscriptions/{SUB}/providers/Microsoft.Authorization/roleAssignments/{name}"),
        "name": name,
        "type": "Microsoft.Authorization/roleAssignments",
        "subscriptionId": SUB,
        "principalId": principal,
        "scope": format!("/subscriptions/{SUB}/resourceGroups/rg-app"),
        "properties": {
            "principalId": principal,
            "roleDefinitionId": format!("/subscriptions/{SUB}/providers/Microsoft.Authorization/roleDefinitions/acdd72a7"),
            "scope": format!("/subscriptions/{SUB}"),
        },
    }))
    .unwrap()
}

/// Stored Original node for a real resource ID
pub fn original(memory: &MemoryGraphStore, id: &str) -> Option<Node> {
    memory
        .nodes()
        .into_iter()
        .find(|n| n.key == NodeKey::by_id("Resource", id) && n.has_label("Original"))
}

pub fn count_label(memory: &MemoryGraphStore, label: &str) -> usize {
    memory.nodes().iter().filter(|n| n.has_label(label)).count()
}
