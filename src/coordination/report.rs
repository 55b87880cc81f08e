//! Per-file outcomes and the optional JSON run report

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::orchestrator::{Phase, PhaseSummary};

/// Rows affected per target table. Conflicting no-op inserts count as 0.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub songs: u64,
    pub artists: u64,
    pub users: u64,
    pub time: u64,
    pub songplays: u64,
}

impl RowCounts {
    pub fn total(&self) -> u64 {
        self.songs + self.artists + self.users + self.time + self.songplays
    }
}

impl AddAssign for RowCounts {
    fn add_assign(&mut self, other: Self) {
        self.songs += other.songs;
        self.artists += other.artists;
        self.users += other.users;
        self.time += other.time;
        self.songplays += other.songplays;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Loaded,
    Failed,
}

/// What happened to one source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: FileStatus,
    pub rows: RowCounts,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn is_failed(&self) -> bool {
        self.status == FileStatus::Failed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub root: PathBuf,
    pub files_found: usize,
    pub files_failed: usize,
    pub rows: RowCounts,
    pub duration_secs: f64,
    pub files: Vec<FileOutcome>,
}

impl From<&PhaseSummary> for PhaseReport {
    fn from(summary: &PhaseSummary) -> Self {
        PhaseReport {
            phase: summary.phase,
            root: summary.root.clone(),
            files_found: summary.outcomes.len(),
            files_failed: summary.files_failed(),
            rows: summary.rows(),
            duration_secs: summary.duration.as_secs_f64(),
            files: summary.outcomes.clone(),
        }
    }
}

/// Everything one run did, written as pretty JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    /// RFC 3339
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub files_failed: usize,
    pub phases: Vec<PhaseReport>,
}

impl RunReport {
    pub fn new(
        run_id: &str,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        phases: &[&PhaseSummary],
    ) -> Self {
        let phases: Vec<PhaseReport> = phases.iter().map(|s| PhaseReport::from(*s)).collect();
        RunReport {
            run_id: run_id.to_string(),
            started_at,
            completed_at,
            files_failed: phases.iter().map(|p| p.files_failed).sum(),
            phases,
        }
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create report directory")?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;

        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;

        Ok(())
    }
}
