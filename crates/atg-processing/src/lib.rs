//! Tenant Grapher Processing: resource records → dual graph
//!
//! This crate turns a stream of enumerated cloud resources into two linked
//! graphs: an Original graph keyed by real provider IDs and an Abstracted graph
//! keyed by tenant-scoped pseudonyms.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                      RESOURCE PROCESSING PIPELINE                        │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  records ──► ResourceProcessor ──► RetryQueueScheduler                   │
//! │                    │                 (bounded workers, backoff, poison)  │
//! │                    │                          │                          │
//! │                    │                  per-resource workflow              │
//! │                    ▼                          ▼                          │
//! │  ┌──────────────────────┐   ┌──────────────┐   ┌────────────────────┐    │
//! │  │ StateOracle (reads)  │   │ NodeWriter   │   │ RelationshipWriter │    │
//! │  └──────────────────────┘   │ Original +   │   │ CONTAINS, TAGGED…  │    │
//! │                             │ Abstracted + │   │ both graphs        │    │
//! │  ┌──────────────────────┐   │ SCAN_SOURCE  │   └────────────────────┘    │
//! │  │ TenantSeedManager    │──►│ (IdAbstractor)│            │               │
//! │  └──────────────────────┘   └──────────────┘             │               │
//! │                                      │                   │               │
//! │                                      ▼                   ▼               │
//! │                              ┌─────────────────────────────────┐         │
//! │                              │ GraphSession → dyn GraphStore   │         │
//! │                              └─────────────────────────────────┘         │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//! - Each resource's two nodes and their link are written in one transaction
//! - Every write is a MERGE, so re-running a batch converges to the same graph
//! - A failing resource is retried with exponential backoff, then poisoned;
//!   it never aborts the run
//! - Missing or invalid tenant seeds abort the run before any work starts

pub mod abstraction;
pub mod config;
pub mod describe;
pub mod error;
pub mod node_writer;
pub mod processor;
pub mod record;
pub mod relationships;
pub mod rules;
pub mod scheduler;
pub mod seed;
pub mod serialize;
pub mod state;
pub mod stats;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use abstraction::IdAbstractor;
pub use config::{AtgConfig, ProcessorConfig};
pub use describe::{DescriptionGenerator, FallbackDescriptions};
pub use error::{ProcessingError, ProcessingResult, SeedError, ValidationError};
pub use node_writer::NodeWriter;
pub use processor::{EdgeCountComparison, ProgressCallback, ResourceProcessor};
pub use record::ResourceRecord;
pub use relationships::RelationshipWriter;
pub use rules::RelationshipRule;
pub use scheduler::{
    Clock, ManualClock, PoisonedItem, RetryQueueScheduler, SchedulerConfig, SchedulerProgress,
    SchedulerReport, SystemClock, WorkOutcome,
};
pub use seed::TenantSeedManager;
pub use state::{ProcessingMetadata, StateOracle};
pub use stats::{ProcessingStats, ProgressSnapshot};

// ============================================================================
// Graph Schema
// ============================================================================

pub const RESOURCE_LABEL: &str = "Resource";
pub const ORIGINAL_LABEL: &str = "Original";
pub const SUBSCRIPTION_LABEL: &str = "Subscription";
pub const RESOURCE_GROUP_LABEL: &str = "ResourceGroup";
pub const TENANT_LABEL: &str = "Tenant";
pub const TAG_LABEL: &str = "Tag";

pub const CONTAINS: &str = "CONTAINS";
pub const SCAN_SOURCE_NODE: &str = "SCAN_SOURCE_NODE";
pub const DEPENDS_ON: &str = "DEPENDS_ON";
pub const LOGS_TO: &str = "LOGS_TO";

/// Lifecycle marker stored on Original nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "pending" => Some(ProcessingStatus::Pending),
            "processing" => Some(ProcessingStatus::Processing),
            "completed" => Some(ProcessingStatus::Completed),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
