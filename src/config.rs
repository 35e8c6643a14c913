use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

const APP_DIR: &str = "m-dl";
const PLAYLIST_DIR: &str = "Downloaded Playlist";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    #[serde(default = "default_playlist_id")]
    pub playlist_id: String,

    #[serde(default = "default_seen_limit")]
    pub seen_limit: usize,

    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,

    #[serde(default = "default_yt_dlp_path")]
    pub yt_dlp_path: String,

    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    #[serde(default = "default_audio_quality")]
    pub audio_quality: String,

    /// Site credentials keyed by a substring of the URLs they apply to.
    #[serde(default)]
    pub auth: BTreeMap<String, SiteAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteAuth {
    pub username: String,
    pub password: String,
}

fn playlist_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PLAYLIST_DIR)
}

fn default_store_path() -> PathBuf {
    playlist_dir().join("database.sqlite")
}

fn default_backup_dir() -> PathBuf {
    playlist_dir().join("backups")
}

fn default_download_dir() -> PathBuf {
    playlist_dir()
}

fn default_playlist_id() -> String {
    "LL".to_string()
}

fn default_seen_limit() -> usize {
    50
}

fn default_yt_dlp_path() -> String {
    "yt-dlp".to_string()
}

fn default_audio_format() -> String {
    "best".to_string()
}

fn default_audio_quality() -> String {
    "3".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            backup_dir: default_backup_dir(),
            download_dir: default_download_dir(),
            playlist_id: default_playlist_id(),
            seen_limit: default_seen_limit(),
            client_id: None,
            client_secret: None,
            refresh_token: None,
            yt_dlp_path: default_yt_dlp_path(),
            audio_format: default_audio_format(),
            audio_quality: default_audio_quality(),
            auth: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from an explicit path, or from the first config file found in the usual places.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(AppError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            return Self::from_file(path);
        }

        for candidate in Self::candidate_paths() {
            tracing::debug!("Checking {}", candidate.display());
            if candidate.exists() {
                return Self::from_file(&candidate);
            }
        }

        tracing::warn!("Config not found, using defaults");
        Ok(Config::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::info!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.seen_limit == 0 {
            return Err(AppError::Config("seen_limit must be at least 1".to_string()));
        }
        Ok(config)
    }

    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(APP_DIR).join("config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(format!("{APP_DIR}.toml")));
            paths.push(home.join(APP_DIR).join("config.toml"));
        }
        paths
    }
}

/// Credentials for the first configured site whose key appears in `url`, ignoring case.
pub fn site_auth_for<'a>(
    auth: &'a BTreeMap<String, SiteAuth>,
    url: &str,
) -> Option<(&'a str, &'a SiteAuth)> {
    let url = url.to_lowercase();
    auth.iter()
        .find(|(site, _)| url.contains(&site.to_lowercase()))
        .map(|(site, auth)| (site.as_str(), auth))
}
