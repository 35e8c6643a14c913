use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the current store generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub url: String,
    pub added_at: DateTime<Utc>,
    pub processed: bool,
}

impl Entry {
    pub fn tags(&self) -> Tags {
        Tags {
            title: self.title.clone(),
            artist: self.artist.clone(),
            url: self.url.clone(),
            added_at: self.added_at,
        }
    }
}

/// Insert request for the store. Fields are optional so that incomplete
/// metadata is rejected at the store boundary instead of being written.
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub url: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
    pub processed: bool,
}

impl NewEntry {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        added_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            title: Some(title.into()),
            artist: Some(artist.into()),
            added_at: Some(added_at),
            processed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tags {
    pub title: String,
    pub artist: String,
    pub url: String,
    pub added_at: DateTime<Utc>,
}
