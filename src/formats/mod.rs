//! Source document formats: catalog JSON objects and JSON-lines event logs

pub mod catalog;
pub mod event;

pub use catalog::CatalogDocument;
pub use event::EventDocument;

use serde::{Deserialize, Deserializer};
use serde_json::value::RawValue;

use crate::error::TransformError;

/// A JSON number kept both as its source text and as a float.
///
/// The text form is what song lookups compare on. Comparing floats that went
/// through different parsers would miss exact matches.
#[derive(Debug, Clone, PartialEq)]
pub struct VerbatimNumber {
    pub text: String,
    pub value: f64,
}

impl VerbatimNumber {
    /// Accepts a bare JSON number or a JSON string holding one
    pub(crate) fn from_raw(field: &'static str, raw: &RawValue) -> Result<Self, TransformError> {
        let token = raw.get().trim();
        let text = if token.starts_with('"') {
            serde_json::from_str::<String>(token).map_err(|_| TransformError::InvalidNumber {
                field,
                value: token.to_string(),
            })?
        } else {
            token.to_string()
        };

        let value = text
            .trim()
            .parse::<f64>()
            .map_err(|_| TransformError::InvalidNumber {
                field,
                value: text.clone(),
            })?;

        Ok(Self { text, value })
    }
}

/// Makes an `Option` field mandatory while still accepting `null`
pub(crate) fn required_nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}
