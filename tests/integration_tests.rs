//! Integration tests for the complete Tenant Grapher pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Processing → snapshot → reload → re-run
//! - Seed stability across store restarts
//! - Session lifecycle errors surfacing from the processor
//!
//! Run with: cargo test --test integration_tests

use atg_processing::{ProcessingError, ProcessorConfig, ResourceProcessor, ResourceRecord};
use atg_storage::{GraphSession, MemoryGraphStore, NodeKey, StoreConfig, StoreError};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const TENANT: &str = "tenant-int";
const SUB: &str = "aaaaaaaa-0000-1111-2222-333333333333";

fn record(group: &str, name: &str) -> ResourceRecord {
    ResourceRecord::from_value(json!({
        "id": format!("/subscriptions/{SUB}/resourceGroups/{group}/providers/Microsoft.Storage/storageAccounts/{name}"),
        "name": name,
        "type": "Microsoft.Storage/storageAccounts",
        "location": "northeurope",
        "resourceGroup": group,
        "subscriptionId": SUB,
        "tags": {"team": "data"},
    }))
    .unwrap()
}

fn config() -> ProcessorConfig {
    ProcessorConfig {
        retry_base_delay_ms: 5,
        poll_interval_ms: 5,
        ..Default::default()
    }
}

async fn open(path: &Path) -> (Arc<MemoryGraphStore>, GraphSession) {
    let memory = Arc::new(MemoryGraphStore::open(path).unwrap());
    let session = GraphSession::open(memory.clone(), StoreConfig::default())
        .await
        .unwrap();
    (memory, session)
}

// ============================================================================
// Snapshot persistence across runs
// ============================================================================

#[tokio::test]
async fn test_process_save_reload_rerun() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("graph.json");
    let records = vec![record("rg-a", "one"), record("rg-a", "two"), record("rg-b", "three")];

    let (memory, session) = open(&path).await;
    let processor = ResourceProcessor::new(session.clone(), TENANT, config())
        .await
        .unwrap();
    let first_token = processor.abstractor().abstract_resource_id(records[0].id());
    let stats = processor
        .process_resources(records.clone(), 3, None, 50)
        .await
        .unwrap();
    assert_eq!(stats.successful, 3);
    let nodes_before = memory.node_count();
    let edges_before = memory.edge_count();
    memory.save_snapshot(&path).unwrap();
    session.close();

    let (memory, session) = open(&path).await;
    assert_eq!(memory.node_count(), nodes_before);
    assert_eq!(memory.edge_count(), edges_before);

    let processor = ResourceProcessor::new(session.clone(), TENANT, config())
        .await
        .unwrap();
    // the stored seed survived, so tokens are unchanged
    assert_eq!(
        processor.abstractor().abstract_resource_id(records[0].id()),
        first_token
    );
    let abstracted = session
        .get_node(&NodeKey::by_id("Resource", first_token.as_str()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(abstracted.get_str("original_id"), Some(records[0].id()));

    let stats = processor
        .process_resources(records, 3, None, 50)
        .await
        .unwrap();
    assert_eq!(stats.skipped, 3);
    assert_eq!(stats.successful, 0);
    assert_eq!(memory.node_count(), nodes_before);
    assert_eq!(memory.edge_count(), edges_before);
}

#[tokio::test]
async fn test_tenants_get_independent_tokens() {
    let dir = tempdir().unwrap();
    let (memory, session) = open(&dir.path().join("graph.json")).await;
    let shared = record("rg-a", "shared");

    let a = ResourceProcessor::new(session.clone(), "tenant-a", config())
        .await
        .unwrap();
    let b = ResourceProcessor::new(session.clone(), "tenant-b", config())
        .await
        .unwrap();

    assert_ne!(
        a.abstractor().abstract_resource_id(shared.id()),
        b.abstractor().abstract_resource_id(shared.id())
    );
    let tenants = memory
        .nodes()
        .into_iter()
        .filter(|n| n.has_label("Tenant"))
        .count();
    assert_eq!(tenants, 2);
}

#[tokio::test]
async fn test_dual_graph_consistent_after_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("graph.json");

    let (memory, session) = open(&path).await;
    ResourceProcessor::new(session.clone(), TENANT, config())
        .await
        .unwrap()
        .process_resources(vec![record("rg-a", "one"), record("rg-b", "two")], 2, None, 50)
        .await
        .unwrap();
    memory.save_snapshot(&path).unwrap();

    let (_memory, session) = open(&path).await;
    let processor = ResourceProcessor::new(session, TENANT, config())
        .await
        .unwrap();
    let comparisons = processor.check_dual_graph_consistency().await.unwrap();
    assert!(!comparisons.is_empty());
    assert!(comparisons.iter().all(|c| c.matches()), "{comparisons:?}");
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_closed_session_rejects_processing() {
    let dir = tempdir().unwrap();
    let (_memory, session) = open(&dir.path().join("graph.json")).await;
    let processor = ResourceProcessor::new(session.clone(), TENANT, config())
        .await
        .unwrap();

    session.close();
    let err = processor
        .process_resources(vec![record("rg-a", "one")], 1, None, 50)
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessingError::Store(StoreError::Closed)));
}

#[tokio::test]
async fn test_invalid_config_rejected_before_store_access() {
    let dir = tempdir().unwrap();
    let (memory, session) = open(&dir.path().join("graph.json")).await;
    let calls = memory.call_count();

    let bad = ProcessorConfig {
        max_workers: 0,
        ..config()
    };
    let err = ResourceProcessor::new(session, TENANT, bad)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ProcessingError::Config(_)));
    assert_eq!(memory.call_count(), calls);
}
