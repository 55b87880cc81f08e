use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;

use super::report::{FileOutcome, RowCounts};
use super::worker::FileWorker;
use crate::db::Pool;
use crate::error::EtlError;
use crate::io::locate;
use crate::telemetry::{ProgressStats, TelemetryEvent};

/// A logical load phase. Catalog runs before events so that song plays can
/// be enriched from the loaded songs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Catalog,
    Event,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Phase::Catalog => "catalog",
            Phase::Event => "event",
        })
    }
}

/// Result of one phase
#[derive(Debug, Clone)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub root: PathBuf,
    /// In processing order
    pub outcomes: Vec<FileOutcome>,
    pub duration: Duration,
}

impl PhaseSummary {
    pub fn files_found(&self) -> usize {
        self.outcomes.len()
    }

    pub fn files_failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn rows(&self) -> RowCounts {
        let mut rows = RowCounts::default();
        for outcome in &self.outcomes {
            rows += outcome.rows;
        }
        rows
    }
}

/// Drives one phase at a time: discover the file set, then process each file
/// in order, one transaction per file.
pub struct Orchestrator {
    pool: Pool,
    pattern: String,
    exclude: String,
    quiet: bool,
}

impl Orchestrator {
    pub fn new(pool: Pool, pattern: impl Into<String>, exclude: impl Into<String>, quiet: bool) -> Self {
        Self {
            pool,
            pattern: pattern.into(),
            exclude: exclude.into(),
            quiet,
        }
    }

    /// Run a phase to completion.
    ///
    /// Only fatal errors are returned. A failing file is rolled back,
    /// recorded in the summary and the phase moves on.
    pub async fn run_phase(&self, phase: Phase, root: &Path) -> Result<PhaseSummary, EtlError> {
        let start = Instant::now();

        let files = locate(root, &self.pattern, &self.exclude)?;
        let num_files = files.len();
        info!("{} files found in {}", num_files, root.display());

        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
        let worker = FileWorker::new(self.pool.clone(), telemetry_tx);
        let prog_jh = Self::setup_progress_tracking(phase, num_files, self.quiet, telemetry_rx);

        let mut outcomes = Vec::with_capacity(num_files);
        for (i, path) in files.iter().enumerate() {
            outcomes.push(worker.process_file(phase, path).await?);
            info!("{}/{} files processed.", i + 1, num_files);
        }

        // Closes the telemetry channel
        drop(worker);
        if let Some(jh) = prog_jh {
            let _ = jh.await;
        }

        let summary = PhaseSummary {
            phase,
            root: root.to_path_buf(),
            outcomes,
            duration: start.elapsed(),
        };

        info!(
            "{} phase complete: {} files, {} failed, {} rows written in {:.2}s",
            phase,
            summary.files_found(),
            summary.files_failed(),
            summary.rows().total(),
            summary.duration.as_secs_f64()
        );

        Ok(summary)
    }

    /// Setup a progress bar fed by the worker's telemetry
    fn setup_progress_tracking(
        phase: Phase,
        total_files: usize,
        quiet: bool,
        mut telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if quiet {
            return None;
        }

        let file_bar = ProgressBar::new(total_files as u64);
        file_bar.set_style(
            ProgressStyle::default_bar()
                .template(&format!(
                    "[{{elapsed_precise}}] {:<8} [{{bar:30.cyan/blue}}] {{pos}}/{{len}} files | {{msg}}",
                    phase
                ))
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        Some(tokio::spawn(async move {
            let mut stats = ProgressStats::new();

            while let Some(event) = telemetry_rx.recv().await {
                stats.update(&event);
                file_bar.set_position(stats.files_processed() as u64);
                file_bar.set_message(progress_message(&stats));
            }

            file_bar.finish_with_message(progress_message(&stats));
        }))
    }
}

fn progress_message(stats: &ProgressStats) -> String {
    let mut message = format!("{} rows, {} failed", stats.rows_written, stats.files_failed);
    if let (Some(p50), Some(p90), Some(p99)) = stats.get_percentiles() {
        message.push_str(&format!(" | p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99));
    }
    message
}
