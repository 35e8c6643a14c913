mod novelty;
mod youtube;

use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::FeedItem;

pub use novelty::{NoveltyFilter, SeenLimit};
pub use youtube::YouTubeClient;

/// A playlist exposed as a lazy, newest-first stream of items.
///
/// Each call starts again from the first page. Pages are only requested as the
/// stream is polled, so a consumer that stops early never pays for the rest.
pub trait PlaylistSource: Send + Sync {
    fn playlist_items<'a>(&'a self, playlist_id: &str) -> BoxStream<'a, Result<FeedItem>>;
}
