mod entry;
mod feed_item;

pub use entry::{Entry, NewEntry, Tags};
pub use feed_item::{FeedItem, ResolvedItem};
