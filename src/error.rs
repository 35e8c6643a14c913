use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Playlist item {position} is inaccessible: {reason}")]
    InaccessibleItem { position: usize, reason: String },

    #[error("Download of {url} produced {count} output files, expected exactly one")]
    AmbiguousOutput { url: String, count: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("YouTube API error: {0}")]
    YouTubeApi(String),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tagging error: {0}")]
    Tag(#[from] lofty::error::LoftyError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Errors that point at a single unreachable playlist slot rather than at the feed itself.
    pub fn is_inaccessible_item(&self) -> bool {
        matches!(self, AppError::InaccessibleItem { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
