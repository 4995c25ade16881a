//! Shared data model (§3): the row shapes persisted by `storage` and passed
//! between the extractor, transcoder, pipeline and uploader.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform a canonical URL was classified as belonging to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Instagram,
    Tiktok,
    Youtube,
    Soundcloud,
    Other,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Tiktok => "tiktok",
            Platform::Youtube => "youtube",
            Platform::Soundcloud => "soundcloud",
            Platform::Other => "other",
        }
    }
}

/// Advisory content-type label inferred from URL path shape (§4.C). The
/// extractor ladder switches on this plus the platform, not on the platform
/// alone; a mislabel is corrected downstream by the fallback ladder, never
/// trusted blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentLabel {
    Photo,
    Video,
    Audio,
}

/// Closed sum type for a cache row's aggregate kind (§9: the source carries
/// this as a free-form string; here it's a closed enum with an explicit
/// `Carousel` member rather than inferring plurality from list length alone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Carousel,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Carousel => "carousel",
        }
    }

    pub fn from_str(s: &str) -> MediaKind {
        match s {
            "photo" => MediaKind::Photo,
            "audio" => MediaKind::Audio,
            "carousel" => MediaKind::Carousel,
            _ => MediaKind::Video,
        }
    }

    /// `save_cache` coerces the kind to `Carousel` whenever more than one
    /// transport id is being stored, regardless of the kind the caller passed.
    pub fn coerce_for_count(self, id_count: usize) -> MediaKind {
        if id_count > 1 {
            MediaKind::Carousel
        } else {
            self
        }
    }

    pub fn classify_extension(ext: &str) -> MediaKind {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "gif" => MediaKind::Photo,
            "mp3" | "m4a" | "ogg" | "opus" | "wav" | "flac" => MediaKind::Audio,
            _ => MediaKind::Video,
        }
    }
}

/// A `file_cache` row: a canonical URL mapped to the transport ids produced
/// by the one upload that filled it in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: i64,
    pub url: String,
    pub transport_ids: Vec<String>,
    pub media_kind: MediaKind,
    pub uploader_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A `downloaded_files` row: an on-disk artifact kept around for reuse until
/// its TTL expires (§3, §4.J).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadedFile {
    pub id: i64,
    pub url: String,
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub file_type: String,
    pub media_kind: MediaKind,
    pub task_dir: PathBuf,
    pub downloaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cache_ref: Option<i64>,
}

/// A `transcriptions` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub id: i64,
    pub source_unique_id: String,
    pub user_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A `users` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub transport_user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub locale: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The outcome of a successful extraction before transcoding: one or more
/// files on disk under a shared task directory, plus whatever metadata the
/// extractor could recover. More than one file makes this a carousel.
#[derive(Debug, Clone)]
pub struct ExtractedMedia {
    pub files: Vec<PathBuf>,
    pub task_dir: PathBuf,
    pub platform: Platform,
    pub title: Option<String>,
    pub performer: Option<String>,
    pub duration_secs: Option<u32>,
    pub cover_path: Option<PathBuf>,
}

/// The fulfilled value of a `PendingDownload` promise (§3, §4.E): what every
/// follower of a single-flight fetch eventually observes.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub transport_ids: Vec<String>,
    pub media_kind: MediaKind,
}

/// A single request flowing through the pipeline (§4.G).
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub canonical_url: String,
    pub raw_url: String,
    pub chat_id: i64,
    pub user_id: i64,
}

/// One buffered voice/video-note message awaiting aggregation (§4.I). Voice
/// batches are sorted by `message_id`, not arrival order, before flush. The
/// audio itself is downloaded at flush time, not at arrival, into `path`.
#[derive(Debug, Clone)]
pub struct VoiceNote {
    pub message_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub source_unique_id: String,
    pub transport_file_id: String,
    pub path: PathBuf,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_for_count_promotes_multi_item_to_carousel() {
        assert_eq!(MediaKind::Photo.coerce_for_count(3), MediaKind::Carousel);
        assert_eq!(MediaKind::Video.coerce_for_count(1), MediaKind::Video);
    }

    #[test]
    fn classify_extension_groups_known_suffixes() {
        assert_eq!(MediaKind::classify_extension("JPG"), MediaKind::Photo);
        assert_eq!(MediaKind::classify_extension("mp3"), MediaKind::Audio);
        assert_eq!(MediaKind::classify_extension("mp4"), MediaKind::Video);
    }
}
