//! Gallery extractor strategy: shells out to an external image-gallery
//! downloader for photo carousels. Tried first for the `photo` content
//! label, and as a fallback for `video`-labeled URLs whose error text
//! suggests a photo-post mislabel (§4.C).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::ExtractError;
use crate::extract::cookies::CookieJar;
use crate::extract::DownloadSource;
use crate::types::Platform;

pub struct GallerySource {
    cookies: Option<CookieJar>,
    proxy: Option<String>,
}

impl GallerySource {
    pub fn new(cookies: Option<CookieJar>, proxy: Option<String>) -> Self {
        Self { cookies, proxy }
    }

    /// Download every file in the carousel into `dest_dir`, returning their
    /// paths in the order the gallery tool wrote them.
    pub async fn download(&self, url: &str, dest_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
        let mut args = vec![
            "-D".to_string(),
            dest_dir.to_string_lossy().to_string(),
            "--no-mtime".to_string(),
        ];
        if let Some(jar) = &self.cookies {
            if jar.exists() {
                args.push("--cookies".to_string());
                args.push(jar.path().to_string_lossy().to_string());
            }
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args.push(url.to_string());

        let output = Command::new("gallery-dl")
            .args(&args)
            .output()
            .await
            .map_err(|e| ExtractError::Generic(format!("failed to launch gallery-dl: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::classify_from_text(&stderr));
        }

        let mut files = Vec::new();
        if let Ok(mut entries) = tokio::fs::read_dir(dest_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.path().is_file() {
                    files.push(entry.path());
                }
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(ExtractError::NoFormats);
        }
        Ok(files)
    }
}

#[async_trait]
impl DownloadSource for GallerySource {
    fn supports(&self, platform: Platform) -> bool {
        matches!(platform, Platform::Instagram | Platform::Tiktok)
    }

    async fn extract(
        &self,
        url: &str,
        dest_dir: &Path,
    ) -> Result<crate::types::ExtractedMedia, ExtractError> {
        let files = self.download(url, dest_dir).await?;
        Ok(crate::types::ExtractedMedia {
            files,
            task_dir: dest_dir.to_path_buf(),
            platform: crate::canon::classify(url),
            title: None,
            performer: None,
            duration_secs: None,
            cover_path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_supports_carousel_capable_hosts() {
        let source = GallerySource::new(None, None);
        assert!(source.supports(Platform::Instagram));
        assert!(!source.supports(Platform::Youtube));
        assert!(!source.supports(Platform::Soundcloud));
    }
}
