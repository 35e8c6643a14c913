use std::fmt;
use std::path::PathBuf;

use chrono::Utc;

use crate::config::Config;
use crate::db::{backup, Repository};
use crate::error::{AppError, Result};
use crate::feed::{NoveltyFilter, PlaylistSource, SeenLimit};
use crate::interrupt::Interrupt;
use crate::models::Entry;
use crate::services::{Downloader, Resolver, Tagger};

/// The external collaborators a run talks to.
pub struct Services {
    pub resolver: Box<dyn Resolver>,
    pub downloader: Box<dyn Downloader>,
    pub tagger: Box<dyn Tagger>,
    /// `None` when feed ingestion is skipped.
    pub feed: Option<Box<dyn PlaylistSource>>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub manual_urls: Vec<String>,
    pub skip_feed: bool,
    pub allow_duplicates: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BackingUp,
    IngestManual,
    IngestFeed,
    Processing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::BackingUp => "backing-up",
            Stage::IngestManual => "ingest-manual",
            Stage::IngestFeed => "ingest-feed",
            Stage::Processing => "processing",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub backup: Option<PathBuf>,
    pub manual_added: usize,
    pub manual_skipped: usize,
    pub manual_failed: usize,
    pub feed_added: usize,
    pub processed: usize,
    pub failed: usize,
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManualOutcome {
    Added,
    DuplicateSkipped,
    Failed,
}

/// The step of an item's processing that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemStep {
    Download,
    Tag,
    MarkProcessed,
}

impl fmt::Display for ItemStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemStep::Download => "download",
            ItemStep::Tag => "tag",
            ItemStep::MarkProcessed => "mark-processed",
        };
        f.write_str(name)
    }
}

pub struct App<'a> {
    config: &'a Config,
    repository: Repository,
    services: Services,
    interrupt: Interrupt,
    backup: Option<PathBuf>,
    stage: Stage,
}

impl<'a> App<'a> {
    /// Snapshot the store, then open it. Failures here end the run.
    pub async fn start(config: &'a Config, services: Services, interrupt: Interrupt) -> Result<Self> {
        tracing::info!(stage = %Stage::BackingUp, "Starting run");
        let backup = backup::snapshot(&config.store_path, &config.backup_dir, Utc::now()).await?;
        let repository = Repository::open(&config.store_path).await?;

        Ok(Self {
            config,
            repository,
            services,
            interrupt,
            backup,
            stage: Stage::BackingUp,
        })
    }

    #[cfg(test)]
    fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(from = %self.stage, to = %stage, "Stage change");
        self.stage = stage;
    }

    pub async fn run(mut self, options: &RunOptions) -> Result<RunSummary> {
        let mut summary = RunSummary {
            backup: self.backup.clone(),
            ..RunSummary::default()
        };

        self.enter(Stage::IngestManual);
        for url in &options.manual_urls {
            if self.interrupt.is_triggered() {
                return self.finish(summary, true).await;
            }
            match self.ingest_manual(url, options.allow_duplicates).await? {
                ManualOutcome::Added => summary.manual_added += 1,
                ManualOutcome::DuplicateSkipped => summary.manual_skipped += 1,
                ManualOutcome::Failed => summary.manual_failed += 1,
            }
        }

        if options.skip_feed {
            tracing::info!("Skipping playlist ingestion");
        } else {
            self.enter(Stage::IngestFeed);
            match self.ingest_feed().await? {
                Some(added) => summary.feed_added = added,
                None => return self.finish(summary, true).await,
            }
        }

        self.enter(Stage::Processing);
        let interrupted = self.process_pending(&mut summary).await?;
        self.finish(summary, interrupted).await
    }

    async fn finish(mut self, mut summary: RunSummary, interrupted: bool) -> Result<RunSummary> {
        summary.interrupted = interrupted;
        if interrupted {
            tracing::info!(stage = %self.stage, "Run interrupted");
        }
        self.enter(Stage::Done);
        self.repository.close().await?;

        tracing::info!(
            manual_added = summary.manual_added,
            manual_skipped = summary.manual_skipped,
            feed_added = summary.feed_added,
            processed = summary.processed,
            failed = summary.failed,
            interrupted = summary.interrupted,
            "Run finished"
        );
        Ok(summary)
    }

    async fn ingest_manual(&self, url: &str, allow_duplicates: bool) -> Result<ManualOutcome> {
        let resolved = match self.services.resolver.resolve(url).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(url = %url, stage = %Stage::IngestManual, "Could not resolve url: {}", e);
                return Ok(ManualOutcome::Failed);
            }
        };

        if !allow_duplicates && self.repository.has_url(&resolved.url).await? {
            tracing::info!(
                url = %resolved.url,
                "Already in the store, skipping (pass --allow-duplicate to queue it again)"
            );
            return Ok(ManualOutcome::DuplicateSkipped);
        }

        match self.repository.add_url(resolved.to_new_entry()).await {
            Ok(_) => {}
            Err(AppError::Validation(reason)) => {
                tracing::error!(url = %url, stage = %Stage::IngestManual, "Rejected by the store: {}", reason);
                return Ok(ManualOutcome::Failed);
            }
            Err(e) => return Err(e),
        }
        tracing::info!(
            url = %resolved.url,
            source_id = %resolved.source_id,
            title = %resolved.title,
            "Queued manual url"
        );
        Ok(ManualOutcome::Added)
    }

    /// Number of playlist items queued, or `None` if interrupted during the scan.
    async fn ingest_feed(&self) -> Result<Option<usize>> {
        let Some(feed) = self.services.feed.as_deref() else {
            tracing::warn!("No playlist source available, skipping playlist ingestion");
            return Ok(Some(0));
        };

        let filter = NoveltyFilter::new(
            &self.repository,
            SeenLimit {
                limit: self.config.seen_limit,
            },
        );

        let mut interrupt = self.interrupt.clone();
        let (items, _stats) = tokio::select! {
            biased;
            scanned = filter.new_items(feed.playlist_items(&self.config.playlist_id)) => scanned?,
            _ = interrupt.triggered() => return Ok(None),
        };

        let mut added = 0;
        for item in items {
            let url = item.url();
            // The same video can show up twice within one scan.
            if self.repository.has_url(&url).await? {
                tracing::debug!(url = %url, "Already queued during this scan");
                continue;
            }
            match self.repository.add_url(item.to_new_entry()).await {
                Ok(_) => {}
                Err(AppError::Validation(reason)) => {
                    tracing::error!(url = %url, stage = %Stage::IngestFeed, "Rejected by the store: {}", reason);
                    continue;
                }
                Err(e) => return Err(e),
            }
            tracing::info!(url = %url, title = %item.title, "Queued playlist item");
            added += 1;
        }
        Ok(Some(added))
    }

    /// Returns whether the loop was interrupted.
    async fn process_pending(&self, summary: &mut RunSummary) -> Result<bool> {
        let pending = self.repository.unprocessed_items().await?;
        tracing::info!("{} items to process", pending.len());

        let mut interrupt = self.interrupt.clone();
        for entry in pending {
            if interrupt.is_triggered() {
                return Ok(true);
            }

            let outcome = tokio::select! {
                biased;
                result = self.download_and_tag(&entry) => Some(result),
                _ = interrupt.triggered() => None,
            };

            match outcome {
                Some(Ok(path)) => match self.mark_processed(&entry).await {
                    Ok(()) => {
                        summary.processed += 1;
                        tracing::info!(url = %entry.url, path = %path.display(), "Processed");
                    }
                    Err(e) => {
                        summary.failed += 1;
                        tracing::error!(
                            url = %entry.url,
                            step = %ItemStep::MarkProcessed,
                            "Downloaded and tagged but could not mark processed: {}",
                            e
                        );
                    }
                },
                // A Ctrl-C also reaches yt-dlp, which then exits with an error.
                Some(Err(_)) if interrupt.is_triggered() => {
                    tracing::info!(url = %entry.url, "Interrupted, item stays queued");
                    return Ok(true);
                }
                Some(Err((step, e))) => {
                    summary.failed += 1;
                    tracing::error!(
                        url = %entry.url,
                        title = %entry.title,
                        step = %step,
                        "Failed to process item, it stays queued for the next run: {}",
                        e
                    );
                }
                None => {
                    tracing::info!(url = %entry.url, "Interrupted, item stays queued");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn download_and_tag(&self, entry: &Entry) -> std::result::Result<PathBuf, (ItemStep, AppError)> {
        tracing::info!(url = %entry.url, title = %entry.title, "Downloading");
        let path = self
            .services
            .downloader
            .fetch(&entry.url, &self.config.download_dir)
            .await
            .map_err(|e| (ItemStep::Download, e))?;

        self.services
            .tagger
            .write_tags(&path, &entry.tags())
            .map_err(|e| (ItemStep::Tag, e))?;

        Ok(path)
    }

    /// Not raced against the interrupt: once the file is tagged the flag is written.
    async fn mark_processed(&self, entry: &Entry) -> Result<()> {
        let updated = self.repository.mark_processed(&entry.url, true).await?;
        if updated == 0 {
            tracing::warn!(url = %entry.url, "No stored row matched while marking processed");
        }
        Ok(())
    }
}
