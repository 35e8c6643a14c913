use futures::{pin_mut, Stream, StreamExt};

use crate::db::Repository;
use crate::error::Result;
use crate::models::FeedItem;

/// Counters for one pass over a feed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub consumed: usize,
    /// Items already in the store. Cumulative over the whole scan: a new item
    /// in between does not reset it.
    pub seen: usize,
    pub new: usize,
    pub inaccessible: usize,
}

/// Decides, after each consumed item, whether the rest of the feed is worth reading.
pub trait StopPolicy {
    fn should_stop(&self, stats: &ScanStats) -> bool;
}

/// Stop once more than `limit` known items have gone by. The feed is
/// newest-first, so that many known items means the remainder is old.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenLimit {
    pub limit: usize,
}

impl Default for SeenLimit {
    fn default() -> Self {
        Self { limit: 50 }
    }
}

impl StopPolicy for SeenLimit {
    fn should_stop(&self, stats: &ScanStats) -> bool {
        stats.seen > self.limit
    }
}

pub struct NoveltyFilter<'a, P> {
    repository: &'a Repository,
    policy: P,
}

impl<'a, P: StopPolicy> NoveltyFilter<'a, P> {
    pub fn new(repository: &'a Repository, policy: P) -> Self {
        Self { repository, policy }
    }

    /// Items of `feed` the store does not know yet, in feed order.
    ///
    /// Inaccessible items are logged and skipped. Any other feed error ends the scan.
    pub async fn new_items<S>(&self, feed: S) -> Result<(Vec<FeedItem>, ScanStats)>
    where
        S: Stream<Item = Result<FeedItem>>,
    {
        pin_mut!(feed);

        let mut stats = ScanStats::default();
        let mut new_items = Vec::new();

        while let Some(next) = feed.next().await {
            stats.consumed += 1;

            match next {
                Ok(item) => {
                    let url = item.url();
                    if self.repository.has_url(&url).await? {
                        stats.seen += 1;
                    } else {
                        tracing::debug!(url = %url, title = %item.title, "New playlist item");
                        stats.new += 1;
                        new_items.push(item);
                    }
                }
                Err(e) if e.is_inaccessible_item() => {
                    tracing::warn!("Skipping playlist item: {}", e);
                    stats.inaccessible += 1;
                }
                Err(e) => return Err(e),
            }

            if self.policy.should_stop(&stats) {
                tracing::debug!(
                    seen = stats.seen,
                    consumed = stats.consumed,
                    "Enough known items seen, not reading further"
                );
                break;
            }
        }

        tracing::info!(
            consumed = stats.consumed,
            seen = stats.seen,
            new = stats.new,
            inaccessible = stats.inaccessible,
            "Scanned playlist"
        );

        Ok((new_items, stats))
    }
}
