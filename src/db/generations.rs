use rusqlite::{params, Connection, OptionalExtension};

/// One generation of stored URLs. `Repository::has_url` walks an ordered list of
/// these and stops at the first generation that knows the URL.
pub trait UrlGeneration: Send + Sync {
    fn name(&self) -> &'static str;

    fn contains(&self, conn: &Connection, url: &str) -> rusqlite::Result<bool>;
}

/// `music_v2`: the table this program writes to.
pub struct CurrentGeneration;

impl UrlGeneration for CurrentGeneration {
    fn name(&self) -> &'static str {
        "music_v2"
    }

    fn contains(&self, conn: &Connection, url: &str) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT rowid FROM music_v2 WHERE url = ?1 LIMIT 1",
            params![url],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
    }
}

/// `music`: url history left behind by the first schema. Read-only.
pub struct LegacyGeneration;

impl UrlGeneration for LegacyGeneration {
    fn name(&self) -> &'static str {
        "music"
    }

    fn contains(&self, conn: &Connection, url: &str) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT id FROM music WHERE url = ?1 LIMIT 1",
            params![url],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
    }
}

/// Newest generation first.
pub fn default_generations() -> Vec<Box<dyn UrlGeneration>> {
    vec![Box::new(CurrentGeneration), Box::new(LegacyGeneration)]
}
