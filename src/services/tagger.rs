use std::path::Path;

use chrono::{DateTime, Utc};
use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, ItemValue, Tag, TagItem};

use crate::error::{AppError, Result};
use crate::models::Tags;

use super::Tagger;

pub const ALBUM: &str = "Downloaded Playlist";

/// Writes tags with lofty into whatever tag format the file's container prefers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagger;

impl Tagger for LoftyTagger {
    fn write_tags(&self, path: &Path, tags: &Tags) -> Result<()> {
        let mut tagged_file = Probe::open(path)?.read()?;

        if tagged_file.primary_tag().is_none() {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file.primary_tag_mut().ok_or_else(|| {
            AppError::NotFound(format!("no writable tag in {}", path.display()))
        })?;

        apply_tags(tag, tags);
        tag.save_to_path(path, WriteOptions::default())?;

        tracing::debug!(path = %path.display(), title = %tags.title, "Wrote tags");
        Ok(())
    }
}

fn apply_tags(tag: &mut Tag, tags: &Tags) {
    tag.set_title(tags.title.clone());
    tag.set_artist(tags.artist.clone());
    tag.set_album(ALBUM.to_string());
    tag.set_comment(comment_timestamp(tags.added_at));
    tag.insert_text(
        ItemKey::RecordingDate,
        tags.added_at.format("%Y-%m-%d").to_string(),
    );
    tag.insert_text(ItemKey::Label, tags.url.clone());
    tag.insert(TagItem::new(
        ItemKey::AudioSourceUrl,
        ItemValue::Locator(tags.url.clone()),
    ));
}

fn comment_timestamp(added_at: DateTime<Utc>) -> String {
    added_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lofty::tag::TagType;

    fn tags() -> Tags {
        Tags {
            title: "Song".to_string(),
            artist: "Band".to_string(),
            url: "https://www.youtube.com/watch?v=abc".to_string(),
            added_at: Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap(),
        }
    }

    #[test]
    fn comment_is_utc_timestamp() {
        assert_eq!(comment_timestamp(tags().added_at), "2024-02-03T04:05:06Z");
    }

    #[test]
    fn applies_all_fields() {
        let mut tag = Tag::new(TagType::VorbisComments);
        apply_tags(&mut tag, &tags());

        assert_eq!(tag.title().as_deref(), Some("Song"));
        assert_eq!(tag.artist().as_deref(), Some("Band"));
        assert_eq!(tag.album().as_deref(), Some(ALBUM));
        assert_eq!(tag.comment().as_deref(), Some("2024-02-03T04:05:06Z"));
        assert_eq!(tag.get_string(&ItemKey::RecordingDate), Some("2024-02-03"));
        assert_eq!(
            tag.get_string(&ItemKey::Label),
            Some("https://www.youtube.com/watch?v=abc")
        );
    }

    #[test]
    fn non_audio_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"definitely not audio").unwrap();

        let err = LoftyTagger.write_tags(&path, &tags()).unwrap_err();
        assert!(matches!(err, AppError::Tag(_)));
    }
}
