//! Typed rows for the five target tables

use chrono::NaiveDateTime;

#[derive(Debug, Clone, PartialEq)]
pub struct SongRow {
    pub song_id: String,
    pub title: Option<String>,
    pub artist_id: String,
    pub year: Option<i16>,
    /// Duration as written in the source, the song lookup key
    pub duration_str: Option<String>,
    pub duration: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtistRow {
    pub artist_id: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f32>,
    pub longitude: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub user_id: i32,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeRow {
    pub start_time: NaiveDateTime,
    pub hour: i16,
    pub day: i16,
    /// ISO 8601 week number
    pub week: i16,
    pub month: i16,
    pub year: i16,
    /// Monday is 0
    pub weekday: i16,
}

/// One song play. `songplay_id` is assigned by the database.
#[derive(Debug, Clone, PartialEq)]
pub struct SongPlayRow {
    pub start_time: NaiveDateTime,
    pub user_id: i32,
    pub level: String,
    pub song_id: Option<String>,
    pub artist_id: Option<String>,
    pub session_id: String,
    pub location: Option<String>,
    pub user_agent: Option<String>,
}

/// Everything one event log file contributes
#[derive(Debug, Default)]
pub struct EventRows {
    pub times: Vec<TimeRow>,
    pub users: Vec<UserRow>,
    pub songplays: Vec<SongPlayRow>,
}
