use std::path::Path;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::orchestrator::Phase;
use super::report::{FileOutcome, FileStatus, RowCounts};
use crate::db::schema::{SONGPLAYS, SONGS};
use crate::db::{FileTransaction, Pool, SONGPLAY_COLUMNS, bulk_load};
use crate::error::EtlError;
use crate::formats::{CatalogDocument, EventDocument};
use crate::io::LocalFileReader;
use crate::telemetry::TelemetryEvent;
use crate::transform::rows::EventRows;
use crate::transform::{transform_catalog_record, transform_event_batch};

/// Transforms and loads one source file at a time, each inside its own
/// transaction
pub struct FileWorker {
    pool: Pool,
    telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl FileWorker {
    pub fn new(pool: Pool, telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>) -> Self {
        Self { pool, telemetry_tx }
    }

    /// Process one file. File-scoped errors are recorded in the outcome, only
    /// fatal ones are returned.
    pub async fn process_file(&self, phase: Phase, path: &Path) -> Result<FileOutcome, EtlError> {
        let start = Instant::now();

        let result = match phase {
            Phase::Catalog => self.load_catalog_file(path).await,
            Phase::Event => self.load_event_file(path).await,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(rows) => {
                debug!(
                    "{}: {} rows written ({} songplays) in {}ms",
                    path.display(),
                    rows.total(),
                    rows.songplays,
                    duration_ms
                );
                let _ = self.telemetry_tx.send(TelemetryEvent::FileLoaded {
                    rows_written: rows.total(),
                    duration_ms,
                });
                Ok(FileOutcome {
                    path: path.to_path_buf(),
                    status: FileStatus::Loaded,
                    rows,
                    duration_ms,
                    error: None,
                })
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Failed to process {}: {}", path.display(), e);
                let _ = self
                    .telemetry_tx
                    .send(TelemetryEvent::FileFailed { duration_ms });
                Ok(FileOutcome {
                    path: path.to_path_buf(),
                    status: FileStatus::Failed,
                    rows: RowCounts::default(),
                    duration_ms,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// One song document: one song row and one artist row
    async fn load_catalog_file(&self, path: &Path) -> Result<RowCounts, EtlError> {
        let text = LocalFileReader::new(path).read_to_string().await?;
        let doc = CatalogDocument::parse(&text)?;
        let (song, artist) = transform_catalog_record(&doc)?;

        let mut tx = self.begin(SONGS.name).await?;
        let written = async {
            Ok::<_, EtlError>(RowCounts {
                songs: tx.insert_song(&song).await?,
                artists: tx.insert_artist(&artist).await?,
                ..Default::default()
            })
        }
        .await;

        match written {
            Ok(rows) => {
                tx.commit().await.map_err(|e| EtlError::load(SONGS.name, e))?;
                Ok(rows)
            }
            Err(e) => {
                abort(tx).await;
                Err(e)
            }
        }
    }

    /// One day of events: time and user dimensions row by row, then all song
    /// plays in a single bulk copy
    async fn load_event_file(&self, path: &Path) -> Result<RowCounts, EtlError> {
        let text = LocalFileReader::new(path).read_to_string().await?;
        let docs = EventDocument::parse_lines(&text)?;

        let mut tx = self.begin(SONGPLAYS.name).await?;
        let (rows, mut counts) = match stage_event_rows(&mut tx, &docs).await {
            Ok(staged) => staged,
            Err(e) => {
                abort(tx).await;
                return Err(e);
            }
        };

        let (tx, copied) = bulk_load(
            tx,
            &rows.songplays,
            SONGPLAYS.name,
            Some(SONGPLAY_COLUMNS),
        )
        .await?;
        counts.songplays = copied;

        tx.commit()
            .await
            .map_err(|e| EtlError::load(SONGPLAYS.name, e))?;
        Ok(counts)
    }

    async fn begin(&self, table: &str) -> Result<FileTransaction, EtlError> {
        self.pool.begin().await.map_err(|e| EtlError::load(table, e))
    }
}

/// Transform the batch against the open transaction and write the dimension
/// rows. The song plays are returned for the bulk copy.
async fn stage_event_rows(
    tx: &mut FileTransaction,
    docs: &[EventDocument],
) -> Result<(EventRows, RowCounts), EtlError> {
    let rows = transform_event_batch(docs, tx).await?;
    let mut counts = RowCounts::default();

    for time in &rows.times {
        counts.time += tx.insert_time(time).await?;
    }
    for user in &rows.users {
        counts.users += tx.upsert_user(user).await?;
    }

    Ok((rows, counts))
}

async fn abort(tx: FileTransaction) {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback failed: {}", e);
    }
}
