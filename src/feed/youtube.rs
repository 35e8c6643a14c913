use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::FeedItem;

use super::PlaylistSource;

const PLAYLIST_ITEMS_URL: &str = "https://www.googleapis.com/youtube/v3/playlistItems";
const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REDIRECT_URI: &str = "https://localhost/";
const SCOPE: &str = "https://www.googleapis.com/auth/youtube.readonly";
/// Largest page the API hands out.
const PAGE_SIZE: u32 = 50;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemListResponse {
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<ApiPlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylistItem {
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: Option<String>,
    published_at: Option<DateTime<Utc>>,
    video_owner_channel_title: Option<String>,
    video_owner_channel_id: Option<String>,
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

impl ApiPlaylistItem {
    /// Private and deleted videos stay in the playlist but lose their owner
    /// channel, so any missing field marks the slot as inaccessible.
    fn into_feed_item(self, position: usize) -> Result<FeedItem> {
        let inaccessible = |reason: &str| AppError::InaccessibleItem {
            position,
            reason: reason.to_string(),
        };

        let snippet = self.snippet.ok_or_else(|| inaccessible("no snippet"))?;
        let video_id = snippet
            .resource_id
            .and_then(|r| r.video_id)
            .ok_or_else(|| inaccessible("no video id"))?;
        let title = snippet
            .title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| inaccessible(&format!("{video_id} has no title")))?;
        let channel = snippet
            .video_owner_channel_title
            .ok_or_else(|| inaccessible(&format!("{video_id} ({title}) has no owner channel")))?;
        let channel_id = snippet
            .video_owner_channel_id
            .ok_or_else(|| inaccessible(&format!("{video_id} ({title}) has no owner channel id")))?;
        let added_at = snippet
            .published_at
            .ok_or_else(|| inaccessible(&format!("{video_id} has no publish date")))?;

        Ok(FeedItem {
            title,
            video_id,
            channel,
            channel_id,
            added_at,
        })
    }
}

struct PageCursor {
    playlist_id: String,
    buffer: VecDeque<Result<FeedItem>>,
    next_page: Option<String>,
    position: usize,
    exhausted: bool,
}

pub struct YouTubeClient {
    client: Client,
    access_token: String,
}

impl YouTubeClient {
    fn http_client() -> Result<Client> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("m-dl/1.0")
            .build()?;
        Ok(client)
    }

    /// Authenticate with the configured OAuth client.
    ///
    /// With a refresh token this is non-interactive; without one the consent
    /// page is opened in the browser and the redirect URL is read from stdin.
    pub async fn connect(config: &Config) -> Result<Self> {
        let (client_id, client_secret) = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) => (id.as_str(), secret.as_str()),
            _ => {
                return Err(AppError::Config(
                    "Both client_id and client_secret must be provided".to_string(),
                ))
            }
        };

        let client = Self::http_client()?;
        let access_token = match &config.refresh_token {
            Some(refresh_token) => {
                tracing::info!("Refreshing existing YouTube session");
                refresh_session(&client, client_id, client_secret, refresh_token).await?
            }
            None => {
                tracing::info!("Creating a new YouTube session");
                new_session(&client, client_id, client_secret).await?
            }
        };

        Ok(Self {
            client,
            access_token,
        })
    }

    async fn fetch_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<PlaylistItemListResponse> {
        let mut query = vec![
            ("part", "snippet".to_string()),
            ("playlistId", playlist_id.to_string()),
            ("maxResults", PAGE_SIZE.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .client
            .get(PLAYLIST_ITEMS_URL)
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::YouTubeApi(format!(
                "playlistItems returned HTTP {status}: {error_text}"
            )));
        }

        let bytes = response.bytes().await?;
        let page: PlaylistItemListResponse = serde_json::from_slice(&bytes)?;
        tracing::debug!("Fetched {} items", page.items.len());
        Ok(page)
    }
}

impl PlaylistSource for YouTubeClient {
    fn playlist_items<'a>(&'a self, playlist_id: &str) -> BoxStream<'a, Result<FeedItem>> {
        tracing::debug!("Fetching items from playlist {}", playlist_id);

        let cursor = PageCursor {
            playlist_id: playlist_id.to_string(),
            buffer: VecDeque::new(),
            next_page: None,
            position: 0,
            exhausted: false,
        };

        stream::unfold(cursor, move |mut cursor| async move {
            loop {
                if let Some(item) = cursor.buffer.pop_front() {
                    return Some((item, cursor));
                }
                if cursor.exhausted {
                    return None;
                }

                match self
                    .fetch_page(&cursor.playlist_id, cursor.next_page.as_deref())
                    .await
                {
                    Ok(page) => {
                        cursor.next_page = page.next_page_token;
                        cursor.exhausted = cursor.next_page.is_none();
                        for item in page.items {
                            cursor.buffer.push_back(item.into_feed_item(cursor.position));
                            cursor.position += 1;
                        }
                    }
                    Err(e) => {
                        cursor.exhausted = true;
                        return Some((Err(e), cursor));
                    }
                }
            }
        })
        .boxed()
    }
}

async fn refresh_session(
    client: &Client,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<String> {
    let token = request_token(
        client,
        &[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ],
    )
    .await?;
    Ok(token.access_token)
}

async fn new_session(client: &Client, client_id: &str, client_secret: &str) -> Result<String> {
    let authorize_url = authorize_url(client_id)?;
    if let Err(e) = open::that(authorize_url.as_str()) {
        tracing::warn!("Could not open a browser: {}", e);
    }
    println!("Visit this URL to authorize access:\n  {authorize_url}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("Please input the authorization response:");
        let Some(line) = lines.next_line().await? else {
            return Err(AppError::Config(
                "stdin closed before an authorization response was entered".to_string(),
            ));
        };

        let exchanged = match authorization_code(line.trim()) {
            Some(code) => {
                request_token(
                    client,
                    &[
                        ("client_id", client_id),
                        ("client_secret", client_secret),
                        ("code", code.as_str()),
                        ("redirect_uri", REDIRECT_URI),
                        ("grant_type", "authorization_code"),
                    ],
                )
                .await
            }
            None => Err(AppError::YouTubeApi(
                "no authorization code in response".to_string(),
            )),
        };

        match exchanged {
            Ok(TokenResponse {
                access_token,
                refresh_token: Some(refresh_token),
            }) if !access_token.is_empty() && !refresh_token.is_empty() => {
                tracing::info!(
                    "New refresh token issued, add it to the config as refresh_token = \"{}\"",
                    refresh_token
                );
                return Ok(access_token);
            }
            Ok(_) => {
                tracing::error!("Token response did not include both access and refresh tokens");
                println!("    Invalid authorization response, please try again...");
            }
            Err(e) => {
                tracing::error!("Error when generating access token: {}", e);
                println!("    Invalid authorization response, please try again...");
            }
        }
    }
}

async fn request_token(client: &Client, form: &[(&str, &str)]) -> Result<TokenResponse> {
    let response = client.post(TOKEN_URL).form(form).send().await?;
    if !response.status().is_success() {
        let error_text = response.text().await?;
        return Err(AppError::YouTubeApi(format!("token request failed: {error_text}")));
    }
    let token: TokenResponse = response.json().await?;
    if token.access_token.is_empty() {
        return Err(AppError::YouTubeApi("empty access token".to_string()));
    }
    Ok(token)
}

fn authorize_url(client_id: &str) -> Result<Url> {
    Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("client_id", client_id),
            ("redirect_uri", REDIRECT_URI),
            ("response_type", "code"),
            ("scope", SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| AppError::Config(format!("invalid authorization URL: {e}")))
}

/// Accepts either the full redirect URL or just the code.
fn authorization_code(response: &str) -> Option<String> {
    if response.is_empty() {
        return None;
    }
    match Url::parse(response) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned()),
        Err(_) if !response.contains(char::is_whitespace) => Some(response.to_string()),
        Err(_) => None,
    }
}
