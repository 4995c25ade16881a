//! Extractor facade (component C, §4.C).
//!
//! Given a canonical URL, produces a set of files on local disk under a
//! unique task directory, choosing among three extraction strategies driven
//! by content-type inference (§4.C) and, on failure, by keyword-classified
//! error text rather than the platform alone.

mod cookies;
mod gallery;
mod general;
mod longvideo;

pub use cookies::CookieJar;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult, ExtractError};
use crate::types::{ContentLabel, ExtractedMedia, Platform};
use gallery::GallerySource;
use general::{ExtractOptions, GeneralSource};
use longvideo::LongVideoSource;

/// A strategy for extracting media from one URL into `dest_dir`.
#[async_trait]
pub trait DownloadSource: Send + Sync {
    fn supports(&self, platform: Platform) -> bool;
    async fn extract(&self, url: &str, dest_dir: &Path) -> Result<ExtractedMedia, ExtractError>;
}

/// Infer the advisory content label from a URL's path shape (§4.C). Mirrors
/// the source's path-based guess; wrong guesses are corrected by the
/// fallback ladder on extractor error, never trusted blindly.
pub fn infer_content_label(url: &str, platform: Platform) -> ContentLabel {
    let path = url::Url::parse(url).map(|u| u.path().to_lowercase()).unwrap_or_default();

    match platform {
        Platform::Soundcloud => ContentLabel::Audio,
        Platform::Youtube => ContentLabel::Video,
        Platform::Instagram => {
            if path.contains("/p/") && !path.contains("/reel") {
                ContentLabel::Photo
            } else {
                ContentLabel::Video
            }
        }
        Platform::Tiktok => {
            if path.contains("/photo/") {
                ContentLabel::Photo
            } else {
                ContentLabel::Video
            }
        }
        Platform::Other => ContentLabel::Video,
    }
}

const MIN_SALVAGE_BYTES: u64 = 100 * 1024;

pub struct ExtractorFacade {
    longvideo: LongVideoSource,
    general_no_creds: GeneralSource,
    general_default: GeneralSource,
    general_with_creds: GeneralSource,
    gallery: GallerySource,
    timeout: Duration,
}

impl ExtractorFacade {
    pub fn new(cookies: Option<CookieJar>, proxy: Option<String>, timeout: Duration) -> Self {
        Self {
            longvideo: LongVideoSource::new(cookies.clone(), proxy.clone()),
            general_no_creds: GeneralSource::new(cookies.clone(), proxy.clone())
                .with_options(ExtractOptions { mobile_user_agent: true, ..Default::default() }),
            general_default: GeneralSource::new(cookies.clone(), proxy.clone()),
            general_with_creds: GeneralSource::new(cookies.clone(), proxy.clone())
                .with_options(ExtractOptions { use_cookies: true, ..Default::default() }),
            gallery: GallerySource::new(cookies, proxy),
            timeout,
        }
    }

    /// Run the strategy ladder for `url`, applying the hard per-URL timeout
    /// (§5) and falling back to partial-file salvage if it is hit.
    pub async fn extract(&self, url: &str, dest_dir: &Path) -> EngineResult<ExtractedMedia> {
        let platform = crate::canon::classify(url);
        let label = infer_content_label(url, platform);

        let attempt = tokio::time::timeout(self.timeout, self.run_ladder(url, platform, label, dest_dir)).await;

        let result = match attempt {
            Ok(result) => result.map(|media| filter_post_extraction(media, platform)),
            Err(_elapsed) => match salvage_partial_files(dest_dir).await {
                Some(files) => Ok(filter_post_extraction(
                    ExtractedMedia {
                        files,
                        task_dir: dest_dir.to_path_buf(),
                        platform,
                        title: None,
                        performer: None,
                        duration_secs: None,
                        cover_path: None,
                    },
                    platform,
                )),
                None => Err(EngineError::Extract(ExtractError::Timeout)),
            },
        };

        crate::metrics::record_extract_outcome(outcome_label(&result));
        result
    }

    async fn run_ladder(
        &self,
        url: &str,
        platform: Platform,
        label: ContentLabel,
        dest_dir: &Path,
    ) -> EngineResult<ExtractedMedia> {
        match label {
            ContentLabel::Audio => self
                .general_default
                .extract(url, dest_dir)
                .await
                .map_err(EngineError::Extract),

            ContentLabel::Photo => match self.gallery.extract(url, dest_dir).await {
                Ok(media) => Ok(media),
                Err(_) => self.general_default.extract(url, dest_dir).await.map_err(EngineError::Extract),
            },

            ContentLabel::Video if platform == Platform::Youtube => {
                self.longvideo.extract(url, dest_dir).await.map_err(EngineError::Extract)
            }

            ContentLabel::Video if platform == Platform::Instagram => {
                match self.general_no_creds.extract(url, dest_dir).await {
                    Ok(media) => Ok(media),
                    Err(err) if is_auth_adjacent(&err) => {
                        self.general_with_creds.extract(url, dest_dir).await.map_err(EngineError::Extract)
                    }
                    Err(_) => self.general_default.extract(url, dest_dir).await.map_err(EngineError::Extract),
                }
            }

            ContentLabel::Video => match self.general_default.extract(url, dest_dir).await {
                Ok(media) => Ok(media),
                Err(err) if should_retry_gallery(&err) || platform == Platform::Tiktok => {
                    self.gallery.extract(url, dest_dir).await.map_err(EngineError::Extract)
                }
                Err(err) => Err(EngineError::Extract(err)),
            },
        }
    }
}

/// Label for the fallback-counter metric: the classified failure variant, or
/// "success".
fn outcome_label(result: &EngineResult<ExtractedMedia>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(EngineError::Extract(ExtractError::RateLimited)) => "rate_limited",
        Err(EngineError::Extract(ExtractError::AuthRequired)) => "auth_required",
        Err(EngineError::Extract(ExtractError::NoFormats)) => "no_formats",
        Err(EngineError::Extract(ExtractError::PhotoRedirect)) => "photo_redirect",
        Err(EngineError::Extract(ExtractError::Timeout)) => "timeout",
        Err(EngineError::Extract(ExtractError::BotDetected)) => "bot_detected",
        Err(EngineError::Extract(ExtractError::Generic(_))) => "generic",
        Err(_) => "other",
    }
}

fn is_auth_adjacent(err: &ExtractError) -> bool {
    matches!(err, ExtractError::AuthRequired)
}

/// "unsupported url", "no formats", or a photo-redirect in the error text
/// (§4.C: this heuristic also fires unconditionally on the short-video host,
/// handled by the caller).
fn should_retry_gallery(err: &ExtractError) -> bool {
    matches!(err, ExtractError::NoFormats | ExtractError::PhotoRedirect)
}

async fn salvage_partial_files(dest_dir: &Path) -> Option<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dest_dir).await.ok()?;
    let mut salvaged = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let name = path.file_name()?.to_string_lossy().to_string();
        if name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        if let Ok(meta) = entry.metadata().await {
            if meta.is_file() && meta.len() >= MIN_SALVAGE_BYTES {
                salvaged.push(path);
            }
        }
    }
    if salvaged.is_empty() {
        None
    } else {
        Some(salvaged)
    }
}

/// Prune temporary and zero-size artifacts; separate audio from cover-image
/// files for the audio host so only the audio file is primary (§4.C).
fn filter_post_extraction(mut media: ExtractedMedia, platform: Platform) -> ExtractedMedia {
    media.files.retain(|p| {
        let name = p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        !name.ends_with(".part") && !name.ends_with(".ytdl")
    });

    if platform == Platform::Soundcloud && media.cover_path.is_none() {
        if let Some(pos) = media.files.iter().position(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("jpg") | Some("jpeg") | Some("png") | Some("webp")
            )
        }) {
            media.cover_path = Some(media.files.remove(pos));
        }
    }

    media
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_content_label_treats_soundcloud_as_audio() {
        assert_eq!(infer_content_label("https://soundcloud.com/a/b", Platform::Soundcloud), ContentLabel::Audio);
    }

    #[test]
    fn infer_content_label_treats_instagram_p_path_as_photo() {
        assert_eq!(infer_content_label("https://www.instagram.com/p/ABC/", Platform::Instagram), ContentLabel::Photo);
    }

    #[test]
    fn infer_content_label_treats_instagram_reel_as_video() {
        assert_eq!(
            infer_content_label("https://www.instagram.com/reel/ABC/", Platform::Instagram),
            ContentLabel::Video
        );
    }

    #[test]
    fn should_retry_gallery_fires_on_no_formats_and_photo_redirect() {
        assert!(should_retry_gallery(&ExtractError::NoFormats));
        assert!(should_retry_gallery(&ExtractError::PhotoRedirect));
        assert!(!should_retry_gallery(&ExtractError::Timeout));
    }

    #[tokio::test]
    async fn filter_post_extraction_drops_temp_suffixes() {
        let media = ExtractedMedia {
            files: vec![PathBuf::from("/tmp/a.mp4"), PathBuf::from("/tmp/a.mp4.part")],
            task_dir: PathBuf::from("/tmp"),
            platform: Platform::Youtube,
            title: None,
            performer: None,
            duration_secs: None,
            cover_path: None,
        };
        let filtered = filter_post_extraction(media, Platform::Youtube);
        assert_eq!(filtered.files, vec![PathBuf::from("/tmp/a.mp4")]);
    }

    #[tokio::test]
    async fn filter_post_extraction_splits_cover_image_for_audio_host() {
        let media = ExtractedMedia {
            files: vec![PathBuf::from("/tmp/a.mp3"), PathBuf::from("/tmp/a.jpg")],
            task_dir: PathBuf::from("/tmp"),
            platform: Platform::Soundcloud,
            title: None,
            performer: None,
            duration_secs: None,
            cover_path: None,
        };
        let filtered = filter_post_extraction(media, Platform::Soundcloud);
        assert_eq!(filtered.files, vec![PathBuf::from("/tmp/a.mp3")]);
        assert_eq!(filtered.cover_path, Some(PathBuf::from("/tmp/a.jpg")));
    }
}
