use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{Entry, NewEntry};

use super::generations::{default_generations, UrlGeneration};
use super::schema::SCHEMA;

/// Durable record of every URL ever seen and whether it has been downloaded and tagged.
pub struct Repository {
    conn: Connection,
    generations: Arc<Vec<Box<dyn UrlGeneration>>>,
}

impl Repository {
    pub async fn open(db_path: &Path) -> Result<Self> {
        Self::open_with_generations(db_path, default_generations()).await
    }

    pub async fn open_with_generations(
        db_path: &Path,
        generations: Vec<Box<dyn UrlGeneration>>,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        tracing::debug!("Opened store at {}", db_path.display());

        Ok(Self {
            conn,
            generations: Arc::new(generations),
        })
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    /// Name of the first generation that knows `url`, if any.
    pub async fn known_in(&self, url: &str) -> Result<Option<&'static str>> {
        let generations = Arc::clone(&self.generations);
        let url = url.to_string();
        let found = self
            .conn
            .call(move |conn| {
                for generation in generations.iter() {
                    if generation.contains(conn, &url)? {
                        return Ok(Some(generation.name()));
                    }
                }
                Ok(None)
            })
            .await?;
        Ok(found)
    }

    pub async fn has_url(&self, url: &str) -> Result<bool> {
        Ok(self.known_in(url).await?.is_some())
    }

    /// Appends a row without checking for an existing `url`; callers dedupe with `has_url`.
    pub async fn add_url(&self, entry: NewEntry) -> Result<i64> {
        let (title, artist, added_at) = validate(&entry)?;
        let NewEntry { url, processed, .. } = entry;

        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO music_v2 (title, artist, url, added_at, processed) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![title, artist, url, added_at.to_rfc3339(), processed],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn unprocessed_items(&self) -> Result<Vec<Entry>> {
        let entries = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT rowid, title, artist, url, added_at, processed FROM music_v2 WHERE processed = 0 ORDER BY rowid",
                )?;
                let entries = stmt
                    .query_map([], entry_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }

    /// Sets the flag on every row carrying `url` and returns how many rows changed.
    pub async fn mark_processed(&self, url: &str, processed: bool) -> Result<usize> {
        let url = url.to_string();
        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE music_v2 SET processed = ?1 WHERE url = ?2",
                    params![processed, url],
                )?;
                Ok(updated)
            })
            .await?;
        Ok(updated)
    }

    #[cfg(test)]
    pub async fn entries(&self) -> Result<Vec<Entry>> {
        let entries = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT rowid, title, artist, url, added_at, processed FROM music_v2 ORDER BY rowid",
                )?;
                let entries = stmt
                    .query_map([], entry_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }
}

fn validate(entry: &NewEntry) -> Result<(String, String, DateTime<Utc>)> {
    if entry.url.trim().is_empty() {
        return Err(AppError::Validation("url must be provided".to_string()));
    }
    let title = match entry.title.as_deref() {
        Some(title) if !title.trim().is_empty() => title.to_string(),
        _ => return Err(AppError::Validation("title must be provided".to_string())),
    };
    let artist = match entry.artist.as_deref() {
        Some(artist) if !artist.trim().is_empty() => artist.to_string(),
        _ => return Err(AppError::Validation("artist must be provided".to_string())),
    };
    let added_at = entry
        .added_at
        .ok_or_else(|| AppError::Validation("added_at must be provided".to_string()))?;
    Ok((title, artist, added_at))
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // RFC3339, as written by this program (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime with an offset (e.g., "2026-01-11 12:34:56.123456+00:00")
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive SQLite datetime, assumed UTC (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    None
}

fn entry_from_row(row: &Row) -> rusqlite::Result<Entry> {
    let url: String = row.get(3)?;
    let raw_added_at: String = row.get(4)?;
    let added_at = parse_datetime(&raw_added_at).unwrap_or_else(|| {
        tracing::warn!(url = %url, "Unrecognised added_at {:?}, using the current time", raw_added_at);
        Utc::now()
    });

    Ok(Entry {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        url,
        added_at,
        processed: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::generations::CurrentGeneration;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    async fn setup_repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let repo = Repository::open(&temp_dir.path().join("database.sqlite"))
            .await
            .expect("Failed to open store");
        (repo, temp_dir)
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 8, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn fresh_store_lifecycle() {
        let (repo, _dir) = setup_repo().await;

        assert!(!repo.has_url("u1").await.unwrap());
        assert_ok!(repo.add_url(NewEntry::new("u1", "A", "B", at(1))).await);
        assert!(repo.has_url("u1").await.unwrap());

        let pending = repo.unprocessed_items().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "u1");
        assert_eq!(pending[0].title, "A");
        assert_eq!(pending[0].artist, "B");
        assert_eq!(pending[0].added_at, at(1));
        assert!(!pending[0].processed);

        assert_eq!(repo.mark_processed("u1", true).await.unwrap(), 1);
        assert!(repo.unprocessed_items().await.unwrap().is_empty());
        assert!(repo.has_url("u1").await.unwrap());
    }

    #[tokio::test]
    async fn add_url_rejects_missing_fields() {
        let (repo, _dir) = setup_repo().await;

        let missing_title = NewEntry {
            title: None,
            ..NewEntry::new("u1", "A", "B", at(1))
        };
        let missing_artist = NewEntry {
            artist: Some("  ".to_string()),
            ..NewEntry::new("u1", "A", "B", at(1))
        };
        let missing_added_at = NewEntry {
            added_at: None,
            ..NewEntry::new("u1", "A", "B", at(1))
        };

        for entry in [missing_title, missing_artist, missing_added_at] {
            let err = assert_err!(repo.add_url(entry).await);
            assert!(matches!(err, AppError::Validation(_)));
        }
        assert!(!repo.has_url("u1").await.unwrap());
    }

    #[tokio::test]
    async fn add_url_does_not_dedupe() {
        let (repo, _dir) = setup_repo().await;

        repo.add_url(NewEntry::new("u1", "A", "B", at(1))).await.unwrap();
        repo.add_url(NewEntry::new("u1", "A again", "B", at(2))).await.unwrap();

        assert_eq!(repo.entries().await.unwrap().len(), 2);
        assert_eq!(repo.mark_processed("u1", true).await.unwrap(), 2);
        assert!(repo.unprocessed_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_processed_only_touches_target() {
        let (repo, _dir) = setup_repo().await;

        for (i, url) in ["u1", "u2", "u3"].into_iter().enumerate() {
            repo.add_url(NewEntry::new(url, "T", "A", at(i as u32 + 1)))
                .await
                .unwrap();
        }

        repo.mark_processed("u2", true).await.unwrap();

        let entries = repo.entries().await.unwrap();
        let flags: Vec<_> = entries.iter().map(|e| (e.url.as_str(), e.processed)).collect();
        assert_eq!(flags, vec![("u1", false), ("u2", true), ("u3", false)]);

        assert_eq!(repo.mark_processed("missing", true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unprocessed_items_keep_insertion_order() {
        let (repo, _dir) = setup_repo().await;

        for (url, day) in [("c", 3), ("a", 1), ("b", 2)] {
            repo.add_url(NewEntry::new(url, "T", "A", at(day))).await.unwrap();
        }

        let urls: Vec<_> = repo
            .unprocessed_items()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.url)
            .collect();
        assert_eq!(urls, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn already_processed_inserts_are_not_pending() {
        let (repo, _dir) = setup_repo().await;

        let entry = NewEntry {
            processed: true,
            ..NewEntry::new("u1", "A", "B", at(1))
        };
        repo.add_url(entry).await.unwrap();

        assert!(repo.has_url("u1").await.unwrap());
        assert!(repo.unprocessed_items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn legacy_urls_are_known_but_never_pending() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("database.sqlite");

        // A store created by the first schema: only the `music` table exists.
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE music (id INTEGER PRIMARY KEY, title TEXT, artist TEXT, url TEXT);
                 INSERT INTO music (title, artist, url) VALUES ('Old', 'Someone', 'legacy-url');",
            )
            .unwrap();
        }

        let repo = Repository::open(&path).await.unwrap();
        assert!(repo.has_url("legacy-url").await.unwrap());
        assert_eq!(repo.known_in("legacy-url").await.unwrap(), Some("music"));
        assert!(repo.unprocessed_items().await.unwrap().is_empty());

        // A stale duplicate in v1 does not hide the live v2 row.
        repo.add_url(NewEntry::new("legacy-url", "New", "Someone", at(1)))
            .await
            .unwrap();
        assert_eq!(repo.known_in("legacy-url").await.unwrap(), Some("music_v2"));
        repo.close().await.unwrap();
    }

    #[tokio::test]
    async fn reopening_keeps_state() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("database.sqlite");

        let repo = Repository::open(&path).await.unwrap();
        repo.add_url(NewEntry::new("u1", "A", "B", at(1))).await.unwrap();
        repo.add_url(NewEntry::new("u2", "C", "D", at(2))).await.unwrap();
        repo.mark_processed("u1", true).await.unwrap();
        repo.close().await.unwrap();

        let repo = Repository::open(&path).await.unwrap();
        assert!(repo.has_url("u1").await.unwrap());
        let pending = repo.unprocessed_items().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "u2");
    }

    #[tokio::test]
    async fn generations_are_consulted_in_order() {
        struct Everything;

        impl UrlGeneration for Everything {
            fn name(&self) -> &'static str {
                "everything"
            }

            fn contains(&self, _conn: &rusqlite::Connection, _url: &str) -> rusqlite::Result<bool> {
                Ok(true)
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let generations: Vec<Box<dyn UrlGeneration>> =
            vec![Box::new(CurrentGeneration), Box::new(Everything)];
        let repo = Repository::open_with_generations(&temp_dir.path().join("db.sqlite"), generations)
            .await
            .unwrap();

        repo.add_url(NewEntry::new("u1", "A", "B", at(1))).await.unwrap();
        assert_eq!(repo.known_in("u1").await.unwrap(), Some("music_v2"));
        assert_eq!(repo.known_in("anything").await.unwrap(), Some("everything"));
    }

    #[tokio::test]
    async fn unreadable_timestamp_does_not_hide_other_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("database.sqlite");

        let repo = Repository::open(&path).await.unwrap();
        repo.add_url(NewEntry::new("u1", "A", "B", at(1))).await.unwrap();
        repo.close().await.unwrap();

        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute(
            "INSERT INTO music_v2 (title, artist, url, added_at) VALUES ('C', 'D', 'u2', 'last tuesday')",
            [],
        )
        .unwrap();
        drop(raw);

        let before = Utc::now();
        let repo = Repository::open(&path).await.unwrap();
        let pending = repo.unprocessed_items().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].added_at, at(1));
        assert_eq!(pending[1].url, "u2");
        assert!(pending[1].added_at >= before);
    }

    #[test]
    fn parses_legacy_timestamp_layouts() {
        let expected = Utc.with_ymd_and_hms(2023, 9, 14, 7, 5, 3).unwrap();
        assert_eq!(parse_datetime("2023-09-14T07:05:03+00:00"), Some(expected));
        assert_eq!(parse_datetime("2023-09-14 07:05:03"), Some(expected));
        assert_eq!(parse_datetime("2023-09-14 07:05:03+00:00"), Some(expected));
        assert_eq!(
            parse_datetime("2023-09-14 07:05:03.250000+00:00"),
            Some(expected + chrono::Duration::milliseconds(250))
        );
        assert_eq!(parse_datetime("yesterday"), None);
    }
}
