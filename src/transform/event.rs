use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use serde_json::Value;
use std::collections::HashSet;

use super::rows::{EventRows, SongPlayRow, TimeRow, UserRow};
use crate::error::{EtlError, TransformError};
use crate::formats::EventDocument;

/// Catalog ids a played track resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongMatch {
    pub song_id: String,
    pub artist_id: String,
}

/// Resolves a played track to catalog ids.
///
/// Matching is exact on song title, artist name and the duration's source
/// text.
#[async_trait]
pub trait SongLookup: Send {
    async fn find_song(
        &mut self,
        title: &str,
        artist: &str,
        duration: &str,
    ) -> Result<Option<SongMatch>, EtlError>;
}

/// A song play event with its required fields checked
struct PlayEvent<'a> {
    doc: &'a EventDocument,
    ts: i64,
    time: TimeRow,
    user_id: i32,
    level: &'a str,
    session_id: String,
}

impl<'a> TryFrom<&'a EventDocument> for PlayEvent<'a> {
    type Error = TransformError;

    fn try_from(doc: &'a EventDocument) -> Result<Self, Self::Error> {
        let line = doc.line;
        let missing = |field| TransformError::MissingField { field, line };

        let ts = doc.ts.ok_or_else(|| missing("ts"))?;
        let level = doc.level.as_deref().ok_or_else(|| missing("level"))?;
        let user_id = parse_user_id(doc.user_id.as_ref()).map_err(|e| match e {
            None => missing("userId"),
            Some(e) => e,
        })?;
        let session_id = match &doc.session_id {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => return Err(missing("sessionId")),
        };

        Ok(Self {
            doc,
            ts,
            time: decompose_timestamp(ts)?,
            user_id,
            level,
            session_id,
        })
    }
}

/// `Err(None)` means the id is absent
fn parse_user_id(value: Option<&Value>) -> Result<i32, Option<TransformError>> {
    match value {
        Some(Value::String(s)) => s
            .trim()
            .parse::<i32>()
            .map_err(|_| Some(TransformError::InvalidUserId(s.clone()))),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|id| i32::try_from(id).ok())
            .ok_or_else(|| Some(TransformError::InvalidUserId(n.to_string()))),
        Some(Value::Null) | None => Err(None),
        Some(other) => Err(Some(TransformError::InvalidUserId(other.to_string()))),
    }
}

/// Decode epoch milliseconds (UTC) into a time dimension row
pub fn decompose_timestamp(ts_millis: i64) -> Result<TimeRow, TransformError> {
    let out_of_range = || TransformError::InvalidTimestamp(ts_millis);
    let start_time: NaiveDateTime = DateTime::from_timestamp_millis(ts_millis)
        .ok_or_else(out_of_range)?
        .naive_utc();
    let year = i16::try_from(start_time.year()).map_err(|_| out_of_range())?;

    Ok(TimeRow {
        start_time,
        hour: start_time.hour() as i16,
        day: start_time.day() as i16,
        week: start_time.iso_week().week() as i16,
        month: start_time.month() as i16,
        year,
        weekday: start_time.weekday().num_days_from_monday() as i16,
    })
}

/// Turn one event log into time, user and song play rows.
///
/// Only `NextSong` events contribute anything. Song plays keep the log's
/// order; users are resolved newest event first.
pub async fn transform_event_batch<L>(
    docs: &[EventDocument],
    lookup: &mut L,
) -> Result<EventRows, EtlError>
where
    L: SongLookup + ?Sized,
{
    let plays = docs
        .iter()
        .filter(|doc| doc.is_song_play())
        .map(PlayEvent::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let times = distinct_times(&plays);
    let users = resolve_users(&plays);

    let mut songplays = Vec::with_capacity(plays.len());
    for play in &plays {
        let song_match = match (&play.doc.song, &play.doc.artist, play.doc.length()?) {
            (Some(title), Some(artist), Some(length)) => {
                lookup.find_song(title, artist, &length.text).await?
            }
            _ => None,
        };
        let (song_id, artist_id) = match song_match {
            Some(m) => (Some(m.song_id), Some(m.artist_id)),
            None => (None, None),
        };

        songplays.push(SongPlayRow {
            start_time: play.time.start_time,
            user_id: play.user_id,
            level: play.level.to_string(),
            song_id,
            artist_id,
            session_id: play.session_id.clone(),
            location: play.doc.location.clone(),
            user_agent: play
                .doc
                .user_agent
                .as_deref()
                .map(|ua| strip_enclosing_quotes(ua).to_string()),
        });
    }

    Ok(EventRows {
        times,
        users,
        songplays,
    })
}

fn distinct_times(plays: &[PlayEvent<'_>]) -> Vec<TimeRow> {
    let mut seen = HashSet::with_capacity(plays.len());
    plays
        .iter()
        .filter(|play| seen.insert(play.time.start_time))
        .map(|play| play.time.clone())
        .collect()
}

/// A user's level changes over time, so the newest event in the batch wins.
/// Ties keep log order.
fn resolve_users(plays: &[PlayEvent<'_>]) -> Vec<UserRow> {
    let mut newest_first: Vec<&PlayEvent<'_>> = plays.iter().collect();
    newest_first.sort_by(|a, b| b.ts.cmp(&a.ts));

    let mut seen = HashSet::new();
    newest_first
        .into_iter()
        .filter(|play| seen.insert(play.user_id))
        .map(|play| UserRow {
            user_id: play.user_id,
            first_name: play.doc.first_name.clone(),
            last_name: play.doc.last_name.clone(),
            gender: play.doc.gender.clone(),
            level: play.level.to_string(),
        })
        .collect()
}

/// The log double-quotes user agents; drop exactly one enclosing pair
fn strip_enclosing_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(value)
}
