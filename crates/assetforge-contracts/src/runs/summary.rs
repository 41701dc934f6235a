use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::manifest::ManifestEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationFailure {
    /// 1-based variation number.
    pub variation: u32,
    pub filename: String,
    pub error: String,
}

/// Outcome of one live invocation: every saved entry plus the variations that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub asset_type: String,
    pub description: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub requested: u32,
    pub succeeded: Vec<ManifestEntry>,
    pub failed: Vec<VariationFailure>,
}

impl RunSummary {
    pub fn start(run_id: &str, asset_type: &str, description: &str, requested: u32) -> Self {
        Self {
            run_id: run_id.to_string(),
            asset_type: asset_type.to_string(),
            description: description.to_string(),
            started_at: now_utc_iso(),
            finished_at: None,
            requested,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(now_utc_iso());
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.succeeded.len() == self.requested as usize
    }
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}

pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
