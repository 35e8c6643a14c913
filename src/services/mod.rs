mod tagger;
mod ytdlp;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ResolvedItem, Tags};

pub use tagger::LoftyTagger;
pub use ytdlp::YtDlp;

/// Turns a single URL into the metadata needed to store it.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<ResolvedItem>;
}

/// Fetches the media behind `url` into `folder`.
///
/// Exactly one file must come out of a call; anything else is an
/// `AmbiguousOutput` error rather than a guess.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str, folder: &Path) -> Result<PathBuf>;
}

pub trait Tagger: Send + Sync {
    fn write_tags(&self, path: &Path, tags: &Tags) -> Result<()>;
}
