use serde::Deserialize;
use serde::de::IgnoredAny;
use serde_json::value::RawValue;
use std::collections::HashMap;

use super::{VerbatimNumber, required_nullable};
use crate::error::TransformError;

/// One song catalog document (one JSON object per file).
///
/// Every field must be present. Only the two ids must also be non-null.
#[derive(Debug, Deserialize)]
pub struct CatalogDocument {
    pub song_id: String,
    #[serde(deserialize_with = "required_nullable")]
    pub title: Option<String>,
    pub artist_id: String,
    #[serde(deserialize_with = "required_nullable")]
    pub year: Option<i16>,
    #[serde(deserialize_with = "required_nullable")]
    duration: Option<Box<RawValue>>,
    #[serde(deserialize_with = "required_nullable")]
    pub artist_name: Option<String>,
    #[serde(deserialize_with = "required_nullable")]
    pub artist_location: Option<String>,
    #[serde(deserialize_with = "required_nullable")]
    pub artist_latitude: Option<f64>,
    #[serde(deserialize_with = "required_nullable")]
    pub artist_longitude: Option<f64>,
}

const FIELDS: [&str; 9] = [
    "song_id",
    "title",
    "artist_id",
    "year",
    "duration",
    "artist_name",
    "artist_location",
    "artist_latitude",
    "artist_longitude",
];

fn json_error(source: serde_json::Error) -> TransformError {
    TransformError::Json {
        line: source.line(),
        source,
    }
}

impl CatalogDocument {
    pub fn parse(text: &str) -> Result<Self, TransformError> {
        let present: HashMap<String, IgnoredAny> =
            serde_json::from_str(text).map_err(json_error)?;
        if let Some(field) = FIELDS.into_iter().find(|f| !present.contains_key(*f)) {
            return Err(TransformError::MissingField { field, line: 1 });
        }

        serde_json::from_str(text).map_err(json_error)
    }

    /// Duration exactly as written in the source plus its numeric value
    pub fn duration(&self) -> Result<Option<VerbatimNumber>, TransformError> {
        self.duration
            .as_deref()
            .map(|raw| VerbatimNumber::from_raw("duration", raw))
            .transpose()
    }
}
