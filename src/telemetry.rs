/// Telemetry events sent from the file worker to the progress display
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// A file was committed
    FileLoaded { rows_written: u64, duration_ms: u64 },
    /// A file was rolled back or could not be transformed
    FileFailed { duration_ms: u64 },
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub files_loaded: usize,
    pub files_failed: usize,
    pub rows_written: u64,
    pub file_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::FileLoaded {
                rows_written,
                duration_ms,
            } => {
                self.files_loaded += 1;
                self.rows_written += rows_written;
                self.file_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::FileFailed { duration_ms } => {
                self.files_failed += 1;
                self.file_durations_ms.push(*duration_ms);
            }
        }
    }

    pub fn files_processed(&self) -> usize {
        self.files_loaded + self.files_failed
    }

    /// Calculate percentile from per-file durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.file_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.file_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}
