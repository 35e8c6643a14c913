use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;

mod app;
mod config;
mod db;
mod error;
mod feed;
mod interrupt;
mod models;
mod services;

use app::{App, RunOptions, Services};
use config::Config;
use feed::{PlaylistSource, YouTubeClient};
use interrupt::Interrupt;
use models::Tags;
use services::{LoftyTagger, Tagger, YtDlp};

/// Download new liked videos as tagged audio files.
#[derive(Debug, Parser)]
#[command(name = "m-dl", version, about)]
struct Cli {
    /// Also download this URL (repeatable)
    #[arg(short = 'u', long = "url", value_name = "URL")]
    urls: Vec<String>,

    /// Do not read the playlist; only handle --url and the existing queue
    #[arg(long)]
    skip_feed: bool,

    /// Config file to use instead of the default locations
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Queue --url entries even if they were downloaded before
    #[arg(long)]
    allow_duplicate: bool,

    /// Tag an existing file and exit
    #[arg(long, value_name = "PATH", requires_all = ["title", "artist", "source_url"])]
    tag_file: Option<PathBuf>,

    #[arg(long, requires = "tag_file")]
    title: Option<String>,

    #[arg(long, requires = "tag_file")]
    artist: Option<String>,

    #[arg(long, value_name = "URL", requires = "tag_file")]
    source_url: Option<String>,

    /// RFC 3339 timestamp written as the added date (defaults to now)
    #[arg(long, requires = "tag_file")]
    added_at: Option<DateTime<Utc>>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(path) = &cli.tag_file {
        return tag_file(&cli, path);
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let feed = if cli.skip_feed {
        None
    } else {
        let client = YouTubeClient::connect(&config)
            .await
            .context("Failed to connect to YouTube")?;
        Some(Box::new(client) as Box<dyn PlaylistSource>)
    };

    let services = Services {
        resolver: Box::new(YtDlp::new(&config)),
        downloader: Box::new(YtDlp::new(&config)),
        tagger: Box::new(LoftyTagger),
        feed,
    };

    let app = App::start(&config, services, Interrupt::on_ctrl_c())
        .await
        .context("Failed to prepare the store")?;

    let options = RunOptions {
        manual_urls: cli.urls,
        skip_feed: cli.skip_feed,
        allow_duplicates: cli.allow_duplicate,
    };
    let summary = app.run(&options).await?;

    println!(
        "Processed {} items ({} failed, {} queued from the playlist)",
        summary.processed, summary.failed, summary.feed_added
    );
    if summary.interrupted {
        println!("Interrupted; remaining items will be picked up on the next run");
    }

    Ok(())
}

fn tag_file(cli: &Cli, path: &Path) -> anyhow::Result<()> {
    let (Some(title), Some(artist), Some(url)) = (&cli.title, &cli.artist, &cli.source_url) else {
        anyhow::bail!("--tag-file needs --title, --artist and --source-url");
    };

    let tags = Tags {
        title: title.clone(),
        artist: artist.clone(),
        url: url.clone(),
        added_at: cli.added_at.unwrap_or_else(Utc::now),
    };

    LoftyTagger
        .write_tags(path, &tags)
        .with_context(|| format!("Failed to tag {}", path.display()))?;
    println!("Tagged {}", path.display());
    Ok(())
}
