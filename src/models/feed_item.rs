use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::NewEntry;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// One playlist entry as reported by the playlist feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub video_id: String,
    pub channel: String,
    pub channel_id: String,
    pub added_at: DateTime<Utc>,
}

impl FeedItem {
    pub fn url(&self) -> String {
        format!("{WATCH_URL}{}", self.video_id)
    }

    pub fn artist(&self) -> &str {
        &self.channel
    }

    pub fn to_new_entry(&self) -> NewEntry {
        NewEntry::new(self.url(), &self.title, self.artist(), self.added_at)
    }
}

/// Metadata for a URL supplied by hand on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedItem {
    pub title: String,
    pub source_id: String,
    pub url: String,
    pub artist: String,
    pub added_at: DateTime<Utc>,
}

impl ResolvedItem {
    pub fn to_new_entry(&self) -> NewEntry {
        NewEntry::new(&self.url, &self.title, &self.artist, self.added_at)
    }
}
