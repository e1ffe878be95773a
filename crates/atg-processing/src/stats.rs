//! Run statistics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate counters for one processing run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_resources: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub description_generated: usize,
    pub description_skipped: usize,
    /// IDs of resources that exhausted their retries or failed fatally
    pub poisoned: Vec<String>,
}

impl ProcessingStats {
    pub fn new(total_resources: usize) -> Self {
        Self {
            total_resources,
            ..Default::default()
        }
    }

    /// Percentage of processed resources that succeeded (skips count as
    /// successes)
    pub fn success_rate(&self) -> f64 {
        (self.successful + self.skipped) as f64 / self.processed.max(1) as f64 * 100.0
    }

    pub fn progress_percentage(&self) -> f64 {
        self.processed as f64 / self.total_resources.max(1) as f64 * 100.0
    }

    /// JSON summary including derived rates
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "total_resources": self.total_resources,
            "processed": self.processed,
            "successful": self.successful,
            "failed": self.failed,
            "skipped": self.skipped,
            "description_generated": self.description_generated,
            "description_skipped": self.description_skipped,
            "poisoned": self.poisoned,
            "success_rate": self.success_rate(),
            "progress_percentage": self.progress_percentage(),
        })
    }
}

impl fmt::Display for ProcessingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Processing summary")?;
        writeln!(f, "  total:       {}", self.total_resources)?;
        writeln!(f, "  processed:   {}", self.processed)?;
        writeln!(f, "  successful:  {}", self.successful)?;
        writeln!(f, "  skipped:     {}", self.skipped)?;
        writeln!(f, "  failed:      {}", self.failed)?;
        writeln!(
            f,
            "  descriptions: {} generated, {} skipped",
            self.description_generated, self.description_skipped
        )?;
        write!(f, "  success rate: {:.1}%", self.success_rate())?;
        if !self.poisoned.is_empty() {
            write!(f, "\n  poisoned:    {}", self.poisoned.join(", "))?;
        }
        Ok(())
    }
}

/// Running totals handed to progress callbacks after each completion
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub retrying: usize,
    pub in_flight: usize,
    pub description_generated: usize,
}

impl ProgressSnapshot {
    pub fn percentage(&self) -> f64 {
        self.processed as f64 / self.total.max(1) as f64 * 100.0
    }
}
