// src/models/run.rs

//! Per-cycle audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a source fared during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOutcome {
    /// Listing fetched directly
    Succeeded,
    /// Listing fetched only through the rendered fallback
    FellBack,
    /// Listing or persistence failed
    Failed,
}

/// Counts and outcome for one source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceReport {
    pub source_id: String,
    pub outcome: SourceOutcome,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Detail pages that could not be fetched or extracted
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    pub fn failed(source_id: impl Into<String>, error: impl ToString) -> Self {
        Self {
            source_id: source_id.into(),
            outcome: SourceOutcome::Failed,
            new: 0,
            updated: 0,
            unchanged: 0,
            failed: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Append-only record of one orchestrated cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub sources: Vec<SourceReport>,
    #[serde(default)]
    pub notifications_sent: usize,
    #[serde(default)]
    pub cancelled: bool,
}

impl FetchRun {
    /// Start a new run stamped with the current time.
    pub fn start() -> Self {
        let started_at = Utc::now();
        Self {
            run_id: started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string(),
            started_at,
            finished_at: None,
            sources: Vec::new(),
            notifications_sent: 0,
            cancelled: false,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn total_new(&self) -> usize {
        self.sources.iter().map(|s| s.new).sum()
    }

    pub fn total_updated(&self) -> usize {
        self.sources.iter().map(|s| s.updated).sum()
    }

    pub fn failed_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.outcome == SourceOutcome::Failed)
            .count()
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "run {}: {} sources, {} new, {} updated, {} failed sources, {} notifications{}",
            self.run_id,
            self.sources.len(),
            self.total_new(),
            self.total_updated(),
            self.failed_sources(),
            self.notifications_sent,
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}
