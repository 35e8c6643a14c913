use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;

use crate::config::{site_auth_for, Config, SiteAuth};
use crate::error::{AppError, Result};
use crate::models::ResolvedItem;

use super::{Downloader, Resolver};

const OUTPUT_TEMPLATE: &str = "%(title)s %(id)s.%(ext)s";

static NOT_FOUND_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn looks_not_found(stderr: &str) -> bool {
    NOT_FOUND_RE
        .get_or_init(|| {
            Regex::new(
                r"(?i)(video unavailable|private video|has been removed|does not exist|HTTP Error 404|no video formats found)",
            )
            .ok()
        })
        .as_ref()
        .is_some_and(|re| re.is_match(stderr))
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    id: String,
    title: String,
    webpage_url: String,
    uploader: Option<String>,
}

/// yt-dlp driven as a subprocess, for both metadata lookups and audio downloads.
pub struct YtDlp {
    program: String,
    audio_format: String,
    audio_quality: String,
    auth: BTreeMap<String, SiteAuth>,
}

impl YtDlp {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.yt_dlp_path.clone(),
            audio_format: config.audio_format.clone(),
            audio_quality: config.audio_quality.clone(),
            auth: config.auth.clone(),
        }
    }

    fn download_args(&self, url: &str, folder: &Path) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-mtime".to_string(),
            "--format".to_string(),
            "bestaudio/best".to_string(),
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            self.audio_format.clone(),
            "--audio-quality".to_string(),
            self.audio_quality.clone(),
            "--output".to_string(),
            folder.join(OUTPUT_TEMPLATE).to_string_lossy().to_string(),
            // Report the final path after post-processing, one line per file.
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "--no-simulate".to_string(),
        ];

        if let Some((site, auth)) = site_auth_for(&self.auth, url) {
            tracing::info!(
                "Url '{}' matches auth site '{}', adding authentication options",
                url,
                site
            );
            args.push("--username".to_string());
            args.push(auth.username.clone());
            args.push("--password".to_string());
            args.push(auth.password.clone());
        }

        // URL goes last
        args.push(url.to_string());
        args
    }

    async fn run(&self, args: &[String], url: &str) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Download(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if looks_not_found(stderr) {
                return Err(AppError::NotFound(format!("{url}: {stderr}")));
            }
            return Err(AppError::Download(format!(
                "yt-dlp exited with {} for {url}: {stderr}",
                output.status
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Downloader for YtDlp {
    async fn fetch(&self, url: &str, folder: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(folder).await?;

        let args = self.download_args(url, folder);
        tracing::debug!(url = %url, folder = %folder.display(), "Running yt-dlp");

        let stdout = self.run(&args, url).await?;
        single_output(url, &String::from_utf8_lossy(&stdout))
    }
}

#[async_trait]
impl Resolver for YtDlp {
    async fn resolve(&self, url: &str) -> Result<ResolvedItem> {
        let args = vec![
            "--dump-single-json".to_string(),
            "--no-playlist".to_string(),
            "--skip-download".to_string(),
            url.to_string(),
        ];
        tracing::debug!(url = %url, "Fetching video metadata");

        let stdout = self.run(&args, url).await?;
        parse_video_info(&stdout, Utc::now())
    }
}

/// The one path yt-dlp printed, checked to exist on disk.
fn single_output(url: &str, stdout: &str) -> Result<PathBuf> {
    let paths: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let [path] = paths.as_slice() else {
        return Err(AppError::AmbiguousOutput {
            url: url.to_string(),
            count: paths.len(),
        });
    };

    let path = PathBuf::from(*path);
    if !path.is_file() {
        return Err(AppError::NotFound(format!(
            "yt-dlp reported {} for {url} but no such file exists",
            path.display()
        )));
    }
    Ok(path)
}

fn parse_video_info(json: &[u8], added_at: DateTime<Utc>) -> Result<ResolvedItem> {
    let info: VideoInfo = serde_json::from_slice(json)?;
    Ok(ResolvedItem {
        title: info.title,
        source_id: info.id,
        url: info.webpage_url,
        artist: info.uploader.unwrap_or_else(|| "Unknown".to_string()),
        added_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ytdlp_with_auth() -> YtDlp {
        let mut config = Config::default();
        config.auth.insert(
            "nicovideo".to_string(),
            SiteAuth {
                username: "user".to_string(),
                password: "pass".to_string(),
            },
        );
        YtDlp::new(&config)
    }

    #[test]
    fn download_args_extract_audio_into_folder() {
        let ytdlp = ytdlp_with_auth();
        let args = ytdlp.download_args("https://www.youtube.com/watch?v=x", Path::new("/music"));

        assert_eq!(args.last().map(String::as_str), Some("https://www.youtube.com/watch?v=x"));
        assert!(args.contains(&"--extract-audio".to_string()));
        assert!(args.contains(&"--no-mtime".to_string()));
        assert!(args.contains(&"/music/%(title)s %(id)s.%(ext)s".to_string()));
        assert!(!args.contains(&"--username".to_string()));
    }

    #[test]
    fn download_args_add_matching_site_credentials() {
        let ytdlp = ytdlp_with_auth();
        let args = ytdlp.download_args("https://www.NicoVideo.jp/watch/sm9", Path::new("/music"));

        let user = args.iter().position(|a| a == "--username").unwrap();
        assert_eq!(args[user + 1], "user");
        let pass = args.iter().position(|a| a == "--password").unwrap();
        assert_eq!(args[pass + 1], "pass");
    }

    #[test]
    fn single_output_requires_exactly_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Song abc.opus");
        std::fs::write(&file, b"audio").unwrap();

        let stdout = format!("{}\n", file.display());
        assert_eq!(single_output("u", &stdout).unwrap(), file);

        let err = single_output("u", "\n  \n").unwrap_err();
        assert!(matches!(err, AppError::AmbiguousOutput { count: 0, .. }));

        let two = format!("{0}\n{0}\n", file.display());
        let err = single_output("u", &two).unwrap_err();
        assert!(matches!(err, AppError::AmbiguousOutput { count: 2, .. }));

        let missing = format!("{}\n", dir.path().join("gone.opus").display());
        let err = single_output("u", &missing).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn parses_video_info() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let json = br#"{"id": "abc", "title": "Song", "webpage_url": "https://www.youtube.com/watch?v=abc", "uploader": "Band", "duration": 200}"#;

        let item = parse_video_info(json, now).unwrap();
        assert_eq!(item.title, "Song");
        assert_eq!(item.source_id, "abc");
        assert_eq!(item.url, "https://www.youtube.com/watch?v=abc");
        assert_eq!(item.artist, "Band");
        assert_eq!(item.added_at, now);
    }

    #[test]
    fn missing_uploader_becomes_unknown() {
        let json = br#"{"id": "sm9", "title": "Song", "webpage_url": "https://www.nicovideo.jp/watch/sm9"}"#;
        let item = parse_video_info(json, Utc::now()).unwrap();
        assert_eq!(item.artist, "Unknown");
    }

    #[test]
    fn classifies_not_found_errors() {
        assert!(looks_not_found("ERROR: [youtube] abc: Video unavailable"));
        assert!(looks_not_found("ERROR: unable to download webpage: HTTP Error 404: Not Found"));
        assert!(!looks_not_found("ERROR: unable to download: connection reset"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_download_error() {
        let mut config = Config::default();
        config.yt_dlp_path = "/nonexistent/yt-dlp".to_string();
        let ytdlp = YtDlp::new(&config);
        let dir = tempfile::tempdir().unwrap();

        let err = ytdlp.fetch("https://example.com/v", dir.path()).await.unwrap_err();
        assert!(matches!(err, AppError::Download(_)));
    }
}
