//! Statement-level access to the star schema.
//!
//! Every write for one source file goes through a single `FileTransaction`,
//! one method per statement. Nothing is visible to other sessions until the
//! caller commits.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use super::bulk;
use crate::error::EtlError;
use crate::transform::event::{SongLookup, SongMatch};
use crate::transform::rows::{ArtistRow, SongRow, TimeRow, UserRow};

const INSERT_SONG: &str = r#"
    INSERT INTO songs (song_id, title, artist_id, year, duration_str, duration_float)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (song_id) DO NOTHING
"#;

const INSERT_ARTIST: &str = r#"
    INSERT INTO artists (artist_id, name, location, latitude, longitude)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (artist_id) DO NOTHING
"#;

// Only the level changes on a known user.
const UPSERT_USER: &str = r#"
    INSERT INTO users (user_id, first_name, last_name, gender, level)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (user_id) DO UPDATE SET level = EXCLUDED.level
"#;

const INSERT_TIME: &str = r#"
    INSERT INTO time (start_time, hour, day, week, month, year, weekday)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (start_time) DO NOTHING
"#;

const SELECT_SONG: &str = r#"
    SELECT s.song_id, s.artist_id
    FROM songs AS s
    JOIN artists AS a ON s.artist_id = a.artist_id
    WHERE s.title = $1 AND a.name = $2 AND s.duration_str = $3
    ORDER BY s.song_id
    LIMIT 1
"#;

/// The transaction that scopes one source file
pub enum FileTransaction {
    Postgres(Transaction<'static, Postgres>),
    #[cfg(test)]
    Sqlite(Transaction<'static, sqlx::Sqlite>),
}

impl FileTransaction {
    /// Returns 0 when the song id already exists
    pub async fn insert_song(&mut self, row: &SongRow) -> Result<u64, EtlError> {
        let result = match self {
            FileTransaction::Postgres(tx) => sqlx::query(INSERT_SONG)
                .bind(&row.song_id)
                .bind(&row.title)
                .bind(&row.artist_id)
                .bind(row.year)
                .bind(&row.duration_str)
                .bind(row.duration)
                .execute(&mut **tx)
                .await
                .map(|r| r.rows_affected()),
            #[cfg(test)]
            FileTransaction::Sqlite(tx) => sqlx::query(&sqlite_placeholders(INSERT_SONG))
                .bind(&row.song_id)
                .bind(&row.title)
                .bind(&row.artist_id)
                .bind(row.year)
                .bind(&row.duration_str)
                .bind(row.duration)
                .execute(&mut **tx)
                .await
                .map(|r| r.rows_affected()),
        };
        result.map_err(|e| EtlError::load("songs", e))
    }

    /// Returns 0 when the artist id already exists
    pub async fn insert_artist(&mut self, row: &ArtistRow) -> Result<u64, EtlError> {
        let result = match self {
            FileTransaction::Postgres(tx) => sqlx::query(INSERT_ARTIST)
                .bind(&row.artist_id)
                .bind(&row.name)
                .bind(&row.location)
                .bind(row.latitude)
                .bind(row.longitude)
                .execute(&mut **tx)
                .await
                .map(|r| r.rows_affected()),
            #[cfg(test)]
            FileTransaction::Sqlite(tx) => sqlx::query(&sqlite_placeholders(INSERT_ARTIST))
                .bind(&row.artist_id)
                .bind(&row.name)
                .bind(&row.location)
                .bind(row.latitude)
                .bind(row.longitude)
                .execute(&mut **tx)
                .await
                .map(|r| r.rows_affected()),
        };
        result.map_err(|e| EtlError::load("artists", e))
    }

    /// Insert a user, or overwrite the level of an existing one
    pub async fn upsert_user(&mut self, row: &UserRow) -> Result<u64, EtlError> {
        let result = match self {
            FileTransaction::Postgres(tx) => sqlx::query(UPSERT_USER)
                .bind(row.user_id)
                .bind(&row.first_name)
                .bind(&row.last_name)
                .bind(&row.gender)
                .bind(&row.level)
                .execute(&mut **tx)
                .await
                .map(|r| r.rows_affected()),
            #[cfg(test)]
            FileTransaction::Sqlite(tx) => sqlx::query(&sqlite_placeholders(UPSERT_USER))
                .bind(row.user_id)
                .bind(&row.first_name)
                .bind(&row.last_name)
                .bind(&row.gender)
                .bind(&row.level)
                .execute(&mut **tx)
                .await
                .map(|r| r.rows_affected()),
        };
        result.map_err(|e| EtlError::load("users", e))
    }

    /// Returns 0 when the timestamp already exists
    pub async fn insert_time(&mut self, row: &TimeRow) -> Result<u64, EtlError> {
        let result = match self {
            FileTransaction::Postgres(tx) => sqlx::query(INSERT_TIME)
                .bind(row.start_time)
                .bind(row.hour)
                .bind(row.day)
                .bind(row.week)
                .bind(row.month)
                .bind(row.year)
                .bind(row.weekday)
                .execute(&mut **tx)
                .await
                .map(|r| r.rows_affected()),
            #[cfg(test)]
            FileTransaction::Sqlite(tx) => sqlx::query(&sqlite_placeholders(INSERT_TIME))
                .bind(row.start_time)
                .bind(row.hour)
                .bind(row.day)
                .bind(row.week)
                .bind(row.month)
                .bind(row.year)
                .bind(row.weekday)
                .execute(&mut **tx)
                .await
                .map(|r| r.rows_affected()),
        };
        result.map_err(|e| EtlError::load("time", e))
    }

    /// Bulk copy an encoded buffer into `table`. Returns the number of rows
    /// copied.
    pub(crate) async fn copy_rows(
        &mut self,
        table: &str,
        columns: Option<&[&str]>,
        buffer: &[u8],
    ) -> Result<u64, sqlx::Error> {
        match self {
            FileTransaction::Postgres(tx) => {
                let statement = bulk::copy_statement(table, columns);
                let mut copy = tx.copy_in_raw(&statement).await?;

                let sent = copy.send(buffer).await.map(|_| ());
                if let Err(e) = sent {
                    let _ = copy.abort(e.to_string()).await;
                    return Err(e);
                }
                copy.finish().await
            }
            #[cfg(test)]
            FileTransaction::Sqlite(tx) => {
                // No COPY in SQLite: decode the buffer and insert row by row
                let records = bulk::decode_copy_buffer(buffer).map_err(sqlx::Error::Protocol)?;
                let mut copied = 0u64;
                for fields in &records {
                    let column_list = columns
                        .map(|cols| format!(" ({})", bulk::quoted_list(cols)))
                        .unwrap_or_default();
                    let placeholders = vec!["?"; fields.len()].join(", ");
                    let sql = format!(
                        "INSERT INTO \"{}\"{} VALUES ({})",
                        table, column_list, placeholders
                    );
                    let mut query = sqlx::query(&sql);
                    for field in fields {
                        query = query.bind(field.as_deref());
                    }
                    copied += query.execute(&mut **tx).await?.rows_affected();
                }
                Ok(copied)
            }
        }
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        match self {
            FileTransaction::Postgres(tx) => tx.commit().await,
            #[cfg(test)]
            FileTransaction::Sqlite(tx) => tx.commit().await,
        }
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            FileTransaction::Postgres(tx) => tx.rollback().await,
            #[cfg(test)]
            FileTransaction::Sqlite(tx) => tx.rollback().await,
        }
    }
}

#[async_trait]
impl SongLookup for FileTransaction {
    async fn find_song(
        &mut self,
        title: &str,
        artist: &str,
        duration: &str,
    ) -> Result<Option<SongMatch>, EtlError> {
        let row: Option<(String, String)> = match self {
            FileTransaction::Postgres(tx) => {
                sqlx::query_as(SELECT_SONG)
                    .bind(title)
                    .bind(artist)
                    .bind(duration)
                    .fetch_optional(&mut **tx)
                    .await
            }
            #[cfg(test)]
            FileTransaction::Sqlite(tx) => {
                sqlx::query_as(&sqlite_placeholders(SELECT_SONG))
                    .bind(title)
                    .bind(artist)
                    .bind(duration)
                    .fetch_optional(&mut **tx)
                    .await
            }
        }
        .map_err(|e| EtlError::load("songs", e))?;

        Ok(row.map(|(song_id, artist_id)| SongMatch { song_id, artist_id }))
    }
}

/// Convert Postgres-style placeholders ($1, $2, ...) to SQLite-style (?, ?, ...)
#[cfg(test)]
fn sqlite_placeholders(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                chars.next();
            }
            result.push('?');
        } else {
            result.push(ch);
        }
    }

    result
}
