use serde::Deserialize;
use serde_json::Value;
use serde_json::value::RawValue;

use super::VerbatimNumber;
use crate::config::NEXT_SONG_PAGE;
use crate::error::TransformError;

/// One line of an event log.
///
/// Parsing is lenient: most fields are null on events that are not song
/// plays (logged-out users have an empty `userId`, page views have no song).
/// Required fields are enforced only for events that survive the page filter.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDocument {
    /// 1-based line number in the source file
    #[serde(skip)]
    pub line: usize,
    pub ts: Option<i64>,
    pub page: Option<String>,
    pub user_id: Option<Value>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: Option<String>,
    pub song: Option<String>,
    pub artist: Option<String>,
    length: Option<Box<RawValue>>,
    pub session_id: Option<Value>,
    pub location: Option<String>,
    pub user_agent: Option<String>,
}

impl EventDocument {
    /// Parse a JSON-lines log. Blank lines are ignored.
    pub fn parse_lines(text: &str) -> Result<Vec<Self>, TransformError> {
        let mut events = Vec::with_capacity(text.lines().count());

        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mut event: EventDocument =
                serde_json::from_str(line).map_err(|source| TransformError::Json {
                    line: idx + 1,
                    source,
                })?;
            event.line = idx + 1;
            events.push(event);
        }

        Ok(events)
    }

    pub fn is_song_play(&self) -> bool {
        self.page.as_deref() == Some(NEXT_SONG_PAGE)
    }

    /// Song length exactly as logged, if the event has one
    pub fn length(&self) -> Result<Option<VerbatimNumber>, TransformError> {
        self.length
            .as_deref()
            .map(|raw| VerbatimNumber::from_raw("length", raw))
            .transpose()
    }
}
