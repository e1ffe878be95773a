//! Processing configuration

use crate::error::{ProcessingError, ProcessingResult};
use crate::scheduler::SchedulerConfig;
use crate::serialize::DEFAULT_MAX_JSON_LENGTH;
use atg_storage::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a processing run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Concurrent worker slots
    pub max_workers: usize,
    /// Attempts per resource before it is poisoned
    pub max_retries: u32,
    /// Backoff base; attempt k waits `base * 2^(k-1)`
    pub retry_base_delay_ms: u64,
    /// Idle wait when nothing is eligible to run
    pub poll_interval_ms: u64,
    /// Emit a progress log line every N completions
    pub progress_every: usize,
    /// Cap for JSON-encoded map properties
    pub max_json_length: usize,
    /// Hard cap on resources per run
    pub resource_limit: Option<usize>,
    pub enable_descriptions: bool,
    /// Used in fallback descriptions
    pub provider_name: String,
    /// Buffered relationship writes per transaction
    pub relationship_batch_size: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            poll_interval_ms: 500,
            progress_every: 50,
            max_json_length: DEFAULT_MAX_JSON_LENGTH,
            resource_limit: None,
            enable_descriptions: true,
            provider_name: "Azure".to_string(),
            relationship_batch_size: 100,
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> ProcessingResult<()> {
        if self.max_workers == 0 {
            return Err(ProcessingError::Config("max_workers must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(ProcessingError::Config("max_retries must be at least 1".into()));
        }
        if self.relationship_batch_size == 0 {
            return Err(ProcessingError::Config(
                "relationship_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn scheduler_config(&self, max_workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_workers: max_workers.max(1),
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            log_every: self.progress_every,
        }
    }
}

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AtgConfig {
    pub store: StoreConfig,
    pub processing: ProcessorConfig,
}

impl AtgConfig {
    /// Load from a JSON file; absent sections take their defaults
    pub fn from_file(path: &Path) -> ProcessingResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            ProcessingError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|err| {
            ProcessingError::Config(format!("cannot parse {}: {err}", path.display()))
        })?;
        config.processing.validate()?;
        Ok(config)
    }
}
