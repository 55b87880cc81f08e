use crate::error::TransformError;
use crate::formats::CatalogDocument;

use super::rows::{ArtistRow, SongRow};

/// Split one catalog document into its song and artist rows.
///
/// No filtering and no validation beyond what parsing already enforced.
pub fn transform_catalog_record(
    doc: &CatalogDocument,
) -> Result<(SongRow, ArtistRow), TransformError> {
    let duration = doc.duration()?;
    let (duration_str, duration) = match duration {
        Some(d) => (Some(d.text), Some(d.value as f32)),
        None => (None, None),
    };

    let song = SongRow {
        song_id: doc.song_id.clone(),
        title: doc.title.clone(),
        artist_id: doc.artist_id.clone(),
        year: doc.year,
        duration_str,
        duration,
    };

    let artist = ArtistRow {
        artist_id: doc.artist_id.clone(),
        name: doc.artist_name.clone(),
        location: doc.artist_location.clone(),
        latitude: doc.artist_latitude.map(|v| v as f32),
        longitude: doc.artist_longitude.map(|v| v as f32),
    };

    Ok((song, artist))
}
