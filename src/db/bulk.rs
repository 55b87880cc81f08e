//! Bulk copy of fact rows.
//!
//! Rows are serialized into one tab-delimited, header-less buffer and sent to
//! the store in a single `COPY ... FROM STDIN`. Every non-null field is
//! wrapped in double quotes (embedded quotes doubled) so that a bare `NULL`
//! stays distinguishable from the string `"NULL"` and from `""`.

use std::time::Instant;
use tracing::{debug, warn};

use super::repository::FileTransaction;
use crate::config::{COPY_DELIMITER, COPY_NULL_SENTINEL, COPY_TIMESTAMP_FORMAT};
use crate::error::EtlError;
use crate::transform::rows::SongPlayRow;

/// Fact table columns, minus the serial `songplay_id`
pub const SONGPLAY_COLUMNS: &[&str] = &[
    "start_time",
    "user_id",
    "level",
    "song_id",
    "artist_id",
    "session_id",
    "location",
    "user_agent",
];

/// A row that can be written by a bulk copy. Field order must match the
/// column list passed to [`bulk_load`].
pub trait CopyRow {
    fn copy_fields(&self) -> Vec<Option<String>>;
}

impl CopyRow for SongPlayRow {
    fn copy_fields(&self) -> Vec<Option<String>> {
        vec![
            Some(self.start_time.format(COPY_TIMESTAMP_FORMAT).to_string()),
            Some(self.user_id.to_string()),
            Some(self.level.clone()),
            self.song_id.clone(),
            self.artist_id.clone(),
            Some(self.session_id.clone()),
            self.location.clone(),
            self.user_agent.clone(),
        ]
    }
}

/// Copy `rows` into `table` inside `tx`.
///
/// On success the transaction is handed back uncommitted, together with the
/// number of rows copied. On failure the transaction has already been rolled
/// back.
pub async fn bulk_load<R: CopyRow>(
    mut tx: FileTransaction,
    rows: &[R],
    table: &str,
    columns: Option<&[&str]>,
) -> Result<(FileTransaction, u64), EtlError> {
    if rows.is_empty() {
        debug!("no rows to copy into {}", table);
        return Ok((tx, 0));
    }

    let buffer = encode_copy_buffer(rows);
    let start = Instant::now();

    match tx.copy_rows(table, columns, &buffer).await {
        Ok(copied) => {
            debug!(
                "copied {} rows ({} bytes) into {} in {:?}",
                copied,
                buffer.len(),
                table,
                start.elapsed()
            );
            Ok((tx, copied))
        }
        Err(e) => {
            warn!("bulk copy into {} failed, rolling back: {}", table, e);
            if let Err(rollback_err) = tx.rollback().await {
                warn!("rollback after failed copy also failed: {}", rollback_err);
            }
            Err(EtlError::load(table, e))
        }
    }
}

/// Serialize rows into the copy wire format
pub fn encode_copy_buffer<R: CopyRow>(rows: &[R]) -> Vec<u8> {
    let mut buffer = String::with_capacity(rows.len() * 128);

    for row in rows {
        for (i, field) in row.copy_fields().iter().enumerate() {
            if i > 0 {
                buffer.push(COPY_DELIMITER);
            }
            match field {
                Some(value) => {
                    buffer.push('"');
                    buffer.push_str(&value.replace('"', "\"\""));
                    buffer.push('"');
                }
                None => buffer.push_str(COPY_NULL_SENTINEL),
            }
        }
        buffer.push('\n');
    }

    buffer.into_bytes()
}

pub(crate) fn copy_statement(table: &str, columns: Option<&[&str]>) -> String {
    let column_list = columns
        .map(|cols| format!(" ({})", quoted_list(cols)))
        .unwrap_or_default();

    format!(
        "COPY \"{}\"{} FROM STDIN WITH (FORMAT csv, DELIMITER E'{}', NULL '{}', QUOTE '\"', ESCAPE '\"')",
        table,
        column_list,
        COPY_DELIMITER.escape_default(),
        COPY_NULL_SENTINEL
    )
}

pub(crate) fn quoted_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a buffer produced by [`encode_copy_buffer`] back into fields, the
/// way the server does on the receiving side of a copy.
#[cfg(test)]
pub(crate) fn decode_copy_buffer(buffer: &[u8]) -> Result<Vec<Vec<Option<String>>>, String> {
    let text = std::str::from_utf8(buffer).map_err(|e| e.to_string())?;
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
            continue;
        }

        match ch {
            '"' if field.is_empty() && !quoted => {
                quoted = true;
                in_quotes = true;
            }
            c if c == COPY_DELIMITER || c == '\n' => {
                let value = std::mem::take(&mut field);
                fields.push(if !quoted && value == COPY_NULL_SENTINEL {
                    None
                } else {
                    Some(value)
                });
                quoted = false;
                if c == '\n' {
                    records.push(std::mem::take(&mut fields));
                }
            }
            c => field.push(c),
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    if !field.is_empty() || !fields.is_empty() {
        return Err("missing row terminator".to_string());
    }
    Ok(records)
}
