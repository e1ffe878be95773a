//! End-to-end resource processing
//!
//! ```text
//!  records ─► limit ─► RetryQueueScheduler ─► per-resource workflow
//!                                              │
//!    normalize principal ─► validate ─► dedupe (first attempt only)
//!        ─► read metadata ─► mark `processing` ─► decide
//!              ├─ skip:    restore status, containment edges
//!              └─ process: description ─► dual upsert (`completed`)
//!                          ─► containment, DEPENDS_ON, LOGS_TO, rules
//!    on failure: mark `failed`, hand back to the scheduler
//!
//!  after the drain: flush buffered links ─► dual-graph consistency check
//!                   ─► container summaries ─► summary log
//! ```

use crate::abstraction::IdAbstractor;
use crate::config::ProcessorConfig;
use crate::describe::{DescriptionGenerator, FallbackDescriptions};
use crate::error::{ProcessingError, ProcessingResult};
use crate::node_writer::NodeWriter;
use crate::record::ResourceRecord;
use crate::relationships::RelationshipWriter;
use crate::rules::{emit_all, TAGGED_WITH};
use crate::scheduler::{RetryQueueScheduler, SchedulerProgress, WorkOutcome};
use crate::seed::TenantSeedManager;
use crate::state::{is_fallback_description, ProcessingMetadata, StateOracle};
use crate::stats::{ProcessingStats, ProgressSnapshot};
use crate::{
    ProcessingStatus, CONTAINS, DEPENDS_ON, LOGS_TO, ORIGINAL_LABEL, RESOURCE_GROUP_LABEL,
    RESOURCE_LABEL, SCAN_SOURCE_NODE, TAG_LABEL,
};
use atg_storage::{Direction, GraphSession, LabelFilter, Node};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// Progress callback invoked after every completed item
pub type ProgressCallback<'a> = &'a (dyn Fn(&ProgressSnapshot) + Send + Sync);

/// Edge counts for one relationship type in each graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeCountComparison {
    pub rel_type: String,
    pub original: u64,
    pub abstracted: u64,
}

impl EdgeCountComparison {
    pub fn matches(&self) -> bool {
        self.original == self.abstracted
    }
}

/// Mutable state shared by all workers of one run
#[derive(Debug, Default)]
struct RunState {
    seen: HashSet<String>,
    stats: ProcessingStats,
}

enum Decision {
    Process { keep_description: Option<String> },
    Skip { previous: ProcessingStatus },
}

enum DescriptionSource {
    Kept,
    Generated,
    Fallback,
}

enum Disposition {
    Processed,
    Skipped,
}

/// Collaborators shared by worker tasks
struct Workflow {
    config: ProcessorConfig,
    oracle: StateOracle,
    nodes: NodeWriter,
    relationships: RelationshipWriter,
    generator: Option<Arc<dyn DescriptionGenerator>>,
    fallback: FallbackDescriptions,
}

pub struct ResourceProcessor {
    session: GraphSession,
    tenant_id: String,
    workflow: Arc<Workflow>,
}

impl ResourceProcessor {
    /// Build a processor for one tenant. Fails when the tenant's seed cannot
    /// be read, created, or validated.
    pub async fn new(
        session: GraphSession,
        tenant_id: &str,
        config: ProcessorConfig,
    ) -> ProcessingResult<Self> {
        config.validate()?;

        let seed = TenantSeedManager::new(session.clone())
            .get_or_create_seed(tenant_id)
            .await?;
        let abstractor = Arc::new(IdAbstractor::new(tenant_id, &seed)?);
        let scan_id = uuid::Uuid::new_v4().to_string();

        tracing::info!(tenant_id = %tenant_id, scan_id = %scan_id, "resource processor ready");

        let workflow = Workflow {
            oracle: StateOracle::new(session.clone(), config.provider_name.as_str()),
            nodes: NodeWriter::new(
                session.clone(),
                abstractor.clone(),
                scan_id,
                config.max_json_length,
            ),
            relationships: RelationshipWriter::new(
                session.clone(),
                abstractor,
                config.relationship_batch_size,
            ),
            fallback: FallbackDescriptions::new(config.provider_name.as_str()),
            generator: None,
            config,
        };

        Ok(Self {
            session,
            tenant_id: tenant_id.to_string(),
            workflow: Arc::new(workflow),
        })
    }

    /// Attach a description generator. Has no effect when descriptions are
    /// disabled in the config.
    pub fn with_generator(mut self, generator: Arc<dyn DescriptionGenerator>) -> Self {
        if let Some(workflow) = Arc::get_mut(&mut self.workflow) {
            workflow.generator = Some(generator);
        }
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn scan_id(&self) -> &str {
        self.workflow.nodes.scan_id()
    }

    pub fn abstractor(&self) -> &IdAbstractor {
        self.workflow.nodes.abstractor()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.workflow.config
    }

    /// Process a batch of records to completion.
    ///
    /// Per-resource failures never abort the run; they end up in
    /// `ProcessingStats::poisoned`.
    pub async fn process_resources(
        &self,
        mut records: Vec<ResourceRecord>,
        max_workers: usize,
        progress: Option<ProgressCallback<'_>>,
        progress_every: usize,
    ) -> ProcessingResult<ProcessingStats> {
        if self.session.is_closed() {
            return Err(ProcessingError::Store(atg_storage::StoreError::Closed));
        }

        if let Some(limit) = self.workflow.config.resource_limit {
            if records.len() > limit {
                tracing::info!(
                    limit,
                    dropped = records.len() - limit,
                    "resource limit applied, truncating input"
                );
                records.truncate(limit);
            }
        }

        let total = records.len();
        let state = Arc::new(Mutex::new(RunState {
            seen: HashSet::new(),
            stats: ProcessingStats::new(total),
        }));

        let mut scheduler_config = self.workflow.config.scheduler_config(max_workers);
        scheduler_config.log_every = progress_every;
        let scheduler = RetryQueueScheduler::new(scheduler_config);

        let worker_flow = self.workflow.clone();
        let worker_state = state.clone();
        let worker = move |record: ResourceRecord, attempt: u32| {
            let flow = worker_flow.clone();
            let state = worker_state.clone();
            async move { flow.process_one(record, attempt, &state).await }
        };

        let report_progress = |p: &SchedulerProgress| {
            if let Some(callback) = progress {
                let snapshot = {
                    let run = state.lock();
                    ProgressSnapshot {
                        processed: p.processed,
                        total,
                        successful: run.stats.successful,
                        failed: p.poisoned,
                        skipped: run.stats.skipped,
                        retrying: p.retrying,
                        in_flight: p.in_flight,
                        description_generated: run.stats.description_generated,
                    }
                };
                callback(&snapshot);
            }
        };

        let report = scheduler
            .run(records, worker, Some(&report_progress))
            .await;

        let mut stats = {
            let mut run = state.lock();
            run.stats.processed = report.processed;
            run.stats.failed = report.poisoned.len();
            run.stats.poisoned = report
                .poisoned
                .iter()
                .map(|p| p.item.id().to_string())
                .collect();
            run.stats.clone()
        };

        let flushed = self.workflow.relationships.flush().await;
        if flushed > 0 {
            tracing::debug!(links = flushed, "flushed buffered relationships");
        }

        match self.check_dual_graph_consistency().await {
            Ok(comparisons) => log_consistency(&comparisons),
            Err(err) => tracing::warn!(error = %err, "dual-graph consistency check failed"),
        }

        if self.workflow.descriptions_enabled() {
            let summarized = self.generate_container_summaries().await;
            stats.description_generated += summarized;
        }

        for poisoned in &report.poisoned {
            tracing::warn!(
                resource_id = %poisoned.item.id(),
                attempts = poisoned.attempts,
                reason = %poisoned.reason,
                "resource poisoned"
            );
        }
        tracing::info!(
            total = stats.total_resources,
            processed = stats.processed,
            successful = stats.successful,
            skipped = stats.skipped,
            failed = stats.failed,
            description_generated = stats.description_generated,
            description_skipped = stats.description_skipped,
            success_rate = stats.success_rate(),
            "processing complete"
        );
        for line in stats.to_string().lines() {
            tracing::info!("{line}");
        }

        Ok(stats)
    }

    /// Compare per-type edge counts between the Original and Abstracted
    /// graphs, ignoring the links between them.
    pub async fn check_dual_graph_consistency(
        &self,
    ) -> ProcessingResult<Vec<EdgeCountComparison>> {
        let original = LabelFilter::default()
            .require(RESOURCE_LABEL)
            .require(ORIGINAL_LABEL);
        let abstracted = LabelFilter::default()
            .require(RESOURCE_LABEL)
            .exclude(ORIGINAL_LABEL);

        let mut original_counts = BTreeMap::new();
        let mut abstracted_counts = BTreeMap::new();
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for (rel, n) in self.session.edge_type_counts(&original, direction).await? {
                *original_counts.entry(rel).or_insert(0u64) += n;
            }
            for (rel, n) in self.session.edge_type_counts(&abstracted, direction).await? {
                *abstracted_counts.entry(rel).or_insert(0u64) += n;
            }
        }

        let rel_types: BTreeSet<String> = original_counts
            .keys()
            .chain(abstracted_counts.keys())
            .filter(|rel| rel.as_str() != SCAN_SOURCE_NODE)
            .cloned()
            .collect();

        Ok(rel_types
            .into_iter()
            .map(|rel_type| EdgeCountComparison {
                original: original_counts.get(&rel_type).copied().unwrap_or(0),
                abstracted: abstracted_counts.get(&rel_type).copied().unwrap_or(0),
                rel_type,
            })
            .collect())
    }

    /// Describe resource groups and tags that have members but no real
    /// description. Returns how many summaries were written.
    pub async fn generate_container_summaries(&self) -> usize {
        let flow = &self.workflow;
        let Some(generator) = flow.generator.as_ref() else {
            return 0;
        };
        let mut written = 0;

        for group in self.containers(RESOURCE_GROUP_LABEL).await {
            let members = self.members(&group, CONTAINS, Direction::Outgoing).await;
            if members.is_empty() {
                continue;
            }
            let name = group.get_str("name").unwrap_or(&group.key.value).to_string();
            let text = match generator.generate_resource_group_summary(&name, &members).await {
                Ok(text) if !text.trim().is_empty() => text,
                Ok(_) => flow.fallback.resource_group(&name, members.len()),
                Err(err) => {
                    tracing::warn!(resource_group = %name, error = %err, "group summary failed, using fallback");
                    flow.fallback.resource_group(&name, members.len())
                }
            };
            if flow.nodes.set_description(&group.key, &text).await {
                written += 1;
            }
        }

        for tag in self.containers(TAG_LABEL).await {
            let members = self.members(&tag, TAGGED_WITH, Direction::Incoming).await;
            if members.is_empty() {
                continue;
            }
            let key = tag.get_str("key").unwrap_or_default().to_string();
            let value = tag.get_str("value").unwrap_or_default().to_string();
            let text = match generator.generate_tag_summary(&key, &value, &members).await {
                Ok(text) if !text.trim().is_empty() => text,
                Ok(_) => flow.fallback.tag(&key, &value, members.len()),
                Err(err) => {
                    tracing::warn!(tag = %tag.key.value, error = %err, "tag summary failed, using fallback");
                    flow.fallback.tag(&key, &value, members.len())
                }
            };
            if flow.nodes.set_description(&tag.key, &text).await {
                written += 1;
            }
        }

        if written > 0 {
            tracing::info!(containers = written, "container summaries written");
        }
        written
    }

    /// Containers of `label` still lacking a description
    async fn containers(&self, label: &str) -> Vec<Node> {
        match self.session.nodes_with_label(label).await {
            Ok(nodes) => nodes
                .into_iter()
                .filter(|n| n.get_str("description").map_or(true, |d| d.trim().is_empty()))
                .collect(),
            Err(err) => {
                tracing::warn!(label, error = %err, "failed to list containers");
                Vec::new()
            }
        }
    }

    /// Original-graph resources attached to a container
    async fn members(&self, container: &Node, rel_type: &str, direction: Direction) -> Vec<Node> {
        match self.session.neighbors(&container.key, rel_type, direction).await {
            Ok(nodes) => nodes
                .into_iter()
                .filter(|n| n.has_label(ORIGINAL_LABEL))
                .collect(),
            Err(err) => {
                tracing::warn!(container = %container.key, error = %err, "failed to list members");
                Vec::new()
            }
        }
    }
}

fn log_consistency(comparisons: &[EdgeCountComparison]) {
    for c in comparisons {
        if c.matches() {
            tracing::info!(
                rel_type = %c.rel_type,
                count = c.original,
                "dual-graph edge count MATCH"
            );
        } else {
            tracing::warn!(
                rel_type = %c.rel_type,
                original = c.original,
                abstracted = c.abstracted,
                "dual-graph edge count MISMATCH"
            );
        }
    }
}

// ============================================================================
// Per-resource workflow
// ============================================================================

impl Workflow {
    fn descriptions_enabled(&self) -> bool {
        self.config.enable_descriptions && self.generator.is_some()
    }

    async fn process_one(
        &self,
        mut record: ResourceRecord,
        attempt: u32,
        state: &Mutex<RunState>,
    ) -> WorkOutcome {
        record.normalize_principal();

        if let Err(err) = record.validate() {
            tracing::warn!(
                resource_id = %record.id(),
                missing = ?err.missing,
                "resource failed validation"
            );
            return WorkOutcome::fatal(err);
        }

        let resource_id = record.id().to_string();

        // retries of an item already claimed its slot in `seen`
        if attempt == 1 {
            let duplicate = {
                let mut run = state.lock();
                let duplicate = !run.seen.insert(resource_id.clone());
                if duplicate {
                    run.stats.skipped += 1;
                }
                duplicate
            };
            if duplicate {
                tracing::debug!(resource_id = %resource_id, "duplicate resource in batch, skipping");
                return WorkOutcome::Success;
            }
        }

        match self.run(&mut record, state).await {
            Ok(Disposition::Processed) => {
                state.lock().stats.successful += 1;
                WorkOutcome::Success
            }
            Ok(Disposition::Skipped) => {
                state.lock().stats.skipped += 1;
                WorkOutcome::Success
            }
            Err(err) => {
                if !self
                    .nodes
                    .mark_status(&resource_id, ProcessingStatus::Failed)
                    .await
                {
                    tracing::warn!(resource_id = %resource_id, "could not mark resource as failed");
                }
                tracing::warn!(
                    resource_id = %resource_id,
                    attempt,
                    error = %err,
                    "resource processing failed"
                );
                WorkOutcome::retry(err)
            }
        }
    }

    fn decide(&self, meta: &ProcessingMetadata) -> Decision {
        let real_description = meta
            .description
            .as_deref()
            .filter(|d| !is_fallback_description(d, self.oracle.provider_name()))
            .map(str::to_string);

        if meta.is_empty() {
            return Decision::Process {
                keep_description: None,
            };
        }
        match meta.status() {
            Some(ProcessingStatus::Completed) => {
                if self.descriptions_enabled() && real_description.is_none() {
                    Decision::Process {
                        keep_description: None,
                    }
                } else {
                    Decision::Skip {
                        previous: ProcessingStatus::Completed,
                    }
                }
            }
            // failed, interrupted, or never finished
            _ => Decision::Process {
                keep_description: real_description,
            },
        }
    }

    async fn run(
        &self,
        record: &mut ResourceRecord,
        state: &Mutex<RunState>,
    ) -> ProcessingResult<Disposition> {
        let resource_id = record.id().to_string();

        let meta = self.oracle.get_processing_metadata(&resource_id).await;
        self.nodes
            .mark_status(&resource_id, ProcessingStatus::Processing)
            .await;

        match self.decide(&meta) {
            Decision::Skip { previous } => {
                tracing::debug!(resource_id = %resource_id, "resource up to date, skipping");
                self.nodes.mark_status(&resource_id, previous).await;
                self.relationships.create_subscription_relationship(record).await;
                self.relationships
                    .create_resource_group_relationships(record)
                    .await;
                Ok(Disposition::Skipped)
            }
            Decision::Process { keep_description } => {
                let (description, source) = self.describe(record, keep_description).await;
                record.insert("description", Value::String(description));

                if !self
                    .nodes
                    .upsert_resource(record, ProcessingStatus::Completed)
                    .await
                {
                    return Err(ProcessingError::WriteFailed { resource_id });
                }

                // counted once the description is stored, not per attempt
                {
                    let mut run = state.lock();
                    match source {
                        DescriptionSource::Generated => run.stats.description_generated += 1,
                        DescriptionSource::Kept | DescriptionSource::Fallback => {
                            run.stats.description_skipped += 1
                        }
                    }
                }

                self.relate(record).await;
                Ok(Disposition::Processed)
            }
        }
    }

    async fn describe(
        &self,
        record: &ResourceRecord,
        keep_description: Option<String>,
    ) -> (String, DescriptionSource) {
        if let Some(existing) = keep_description {
            return (existing, DescriptionSource::Kept);
        }

        if self.descriptions_enabled() {
            if let Some(generator) = self.generator.as_ref() {
                match generator.generate_resource_description(record).await {
                    Ok(text) if !text.trim().is_empty() => {
                        return (text, DescriptionSource::Generated);
                    }
                    Ok(_) => {
                        tracing::debug!(resource_id = %record.id(), "generator returned empty description");
                    }
                    Err(err) => {
                        tracing::warn!(
                            resource_id = %record.id(),
                            error = %err,
                            "description generation failed, using fallback"
                        );
                    }
                }
            }
        }

        (self.fallback.resource(record), DescriptionSource::Fallback)
    }

    async fn relate(&self, record: &ResourceRecord) {
        let id = record.id();
        let rel = &self.relationships;

        rel.create_subscription_relationship(record).await;
        rel.create_resource_group_relationships(record).await;

        for target in depends_on(record) {
            rel.create_relationship(id, DEPENDS_ON, &target).await;
        }
        for workspace in log_workspaces(record) {
            rel.create_relationship(id, LOGS_TO, &workspace).await;
        }

        for link in emit_all(record) {
            rel.queue_generic(link).await;
        }
    }
}

/// Targets of `dependsOn`, given as ID strings or `{id}` objects
fn depends_on(record: &ResourceRecord) -> Vec<String> {
    record
        .get("dependsOn")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(id) => Some(id.clone()),
                    other => other.get("id").and_then(Value::as_str).map(str::to_string),
                })
                .filter(|id| !id.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn log_workspaces(record: &ResourceRecord) -> Vec<String> {
    record
        .get("diagnosticSettings")
        .and_then(Value::as_array)
        .map(|settings| {
            settings
                .iter()
                .filter_map(|s| {
                    s.get("workspaceId")
                        .or_else(|| s.get("properties").and_then(|p| p.get("workspaceId")))
                        .and_then(Value::as_str)
                        .filter(|w| !w.is_empty())
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}
