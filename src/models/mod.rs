use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Anime,
    Manga,
}

impl MediaType {
    pub const ALL: [MediaType; 2] = [MediaType::Anime, MediaType::Manga];

    pub fn is_anime(&self) -> bool {
        matches!(self, MediaType::Anime)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Anime => "anime",
            MediaType::Manga => "manga",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anime" => Ok(MediaType::Anime),
            "manga" => Ok(MediaType::Manga),
            other => Err(Error::InvalidInput(format!("unknown media type: {}", other))),
        }
    }
}

/// Lifecycle status of a library entry. Every bucket is one status per media type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Planned,
    InProgress,
    Completed,
    OnHold,
    Dropped,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Planned,
        Status::InProgress,
        Status::Completed,
        Status::OnHold,
        Status::Dropped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Planned => "planned",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::OnHold => "on_hold",
            Status::Dropped => "dropped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "planned" | "plan_to_watch" => Ok(Status::Planned),
            "in_progress" | "watching" | "reading" => Ok(Status::InProgress),
            "completed" => Ok(Status::Completed),
            "on_hold" => Ok(Status::OnHold),
            "dropped" => Ok(Status::Dropped),
            other => Err(Error::InvalidInput(format!("unknown status: {}", other))),
        }
    }
}

/// Identity of a title within one media universe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub media_id: i64,
    pub media_type: MediaType,
}

impl ItemKey {
    pub fn new(media_id: i64, media_type: MediaType) -> Self {
        Self { media_id, media_type }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.media_type, self.media_id)
    }
}

/// Storage identity shared by both persistence backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub media_id: i64,
    pub media_type: MediaType,
    pub is_rewatch: bool,
    pub rewatch_count: u32,
}

impl RecordKey {
    pub fn primary(key: ItemKey) -> Self {
        Self {
            media_id: key.media_id,
            media_type: key.media_type,
            is_rewatch: false,
            rewatch_count: 0,
        }
    }

    pub fn rewatch(key: ItemKey, rewatch_count: u32) -> Self {
        Self {
            media_id: key.media_id,
            media_type: key.media_type,
            is_rewatch: true,
            rewatch_count,
        }
    }

    pub fn item_key(&self) -> ItemKey {
        ItemKey::new(self.media_id, self.media_type)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_rewatch {
            write!(f, "{}:{}#{}", self.media_type, self.media_id, self.rewatch_count)
        } else {
            write!(f, "{}:{}", self.media_type, self.media_id)
        }
    }
}

/// A `(media type, status)` bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Category {
    pub media_type: MediaType,
    pub status: Status,
}

impl Category {
    pub fn new(media_type: MediaType, status: Status) -> Self {
        Self { media_type, status }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.media_type, self.status)
    }
}

/// Where a record lives in memory. Completed rewatches are kept apart from the
/// plain Completed bucket so first completions stay independently queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shelf {
    Bucket(Status),
    CompletedRewatches,
}

impl Shelf {
    pub fn for_record(is_rewatch: bool, status: Status) -> Self {
        match (is_rewatch, status) {
            (true, Status::Completed) => Shelf::CompletedRewatches,
            (_, status) => Shelf::Bucket(status),
        }
    }
}

/// One tracked entry: a primary record or one numbered rewatch of a title.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub media_id: i64,
    pub media_type: MediaType,
    pub title: String,
    pub cover_image: String,
    pub genres: Option<Vec<String>>,
    pub summary: Option<String>,
    pub total_units: Option<u32>,
    pub status: Status,
    pub progress: u32,
    /// 0 means unranked.
    pub rank: u32,
    /// 0 means unrated.
    pub score: u32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_rewatch: bool,
    pub rewatch_count: u32,
}

impl Item {
    pub fn new(
        media_id: i64,
        media_type: MediaType,
        title: impl Into<String>,
        status: Status,
    ) -> Self {
        Self {
            media_id,
            media_type,
            title: title.into(),
            cover_image: String::new(),
            genres: None,
            summary: None,
            total_units: None,
            status,
            progress: 0,
            rank: 0,
            score: 0,
            start_date: None,
            end_date: None,
            is_rewatch: false,
            rewatch_count: 0,
        }
    }

    pub fn item_key(&self) -> ItemKey {
        ItemKey::new(self.media_id, self.media_type)
    }

    pub fn record_key(&self) -> RecordKey {
        RecordKey {
            media_id: self.media_id,
            media_type: self.media_type,
            is_rewatch: self.is_rewatch,
            rewatch_count: self.rewatch_count,
        }
    }

    pub fn shelf(&self) -> Shelf {
        Shelf::for_record(self.is_rewatch, self.status)
    }

    pub fn with_status(&self, status: Status) -> Self {
        Self { status, ..self.clone() }
    }

    pub fn with_progress(&self, progress: u32) -> Self {
        Self { progress, ..self.clone() }
    }

    pub fn with_rank(&self, rank: u32) -> Self {
        Self { rank, ..self.clone() }
    }

    pub fn with_score(&self, score: u32) -> Self {
        Self { score, ..self.clone() }
    }

    pub fn with_dates(
        &self,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            start_date,
            end_date,
            ..self.clone()
        }
    }

    pub fn with_rewatch_count(&self, rewatch_count: u32) -> Self {
        Self {
            rewatch_count,
            ..self.clone()
        }
    }

    /// Fresh in-progress rewatch instance of this title.
    pub fn as_rewatch(&self, rewatch_count: u32, started: DateTime<Utc>) -> Self {
        Self {
            status: Status::InProgress,
            progress: 0,
            rank: 0,
            score: 0,
            start_date: Some(started),
            end_date: None,
            is_rewatch: true,
            rewatch_count,
            ..self.clone()
        }
    }

    /// Completed copy keeping the cycle number and start date.
    pub fn completed_at(&self, end_date: DateTime<Utc>) -> Self {
        Self {
            status: Status::Completed,
            progress: self.total_units.unwrap_or(self.progress),
            end_date: Some(end_date),
            ..self.clone()
        }
    }
}
