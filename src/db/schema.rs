/// Both storage generations. The legacy `music` table predates `music_v2` and is
/// only ever read; it is created empty on a fresh store so lookups stay uniform.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- legacy table (schema v1)
CREATE TABLE IF NOT EXISTS music (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT,
    artist TEXT,
    url TEXT
);

CREATE INDEX IF NOT EXISTS index_music_title ON music(title);
CREATE INDEX IF NOT EXISTS index_music_artist ON music(artist);
CREATE INDEX IF NOT EXISTS index_music_url ON music(url);

-- current table (schema v2)
CREATE TABLE IF NOT EXISTS music_v2 (
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    url TEXT NOT NULL,
    added_at DATETIME NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS index_music_v2_title ON music_v2(title);
CREATE INDEX IF NOT EXISTS index_music_v2_artist ON music_v2(artist);
CREATE INDEX IF NOT EXISTS index_music_v2_url ON music_v2(url);
"#;
