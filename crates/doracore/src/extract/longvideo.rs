//! Long-video host strategy (YouTube and its shortener, §4.C): capped at
//! 1080p, preferring a single progressive stream; when the source only
//! offers split video/audio tracks, `yt-dlp` downloads each and merges them
//! with an external muxer itself (`--merge-output-format`). On a
//! bot-detection error, retries through the general extractor with a cookie
//! file and an alternate client identifier; further failure aborts the URL.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::ExtractError;
use crate::extract::cookies::CookieJar;
use crate::extract::general::{ExtractOptions, GeneralSource};
use crate::extract::DownloadSource;
use crate::types::{ExtractedMedia, Platform};

const MAX_HEIGHT: u32 = 1080;

pub struct LongVideoSource {
    cookies: Option<CookieJar>,
    proxy: Option<String>,
}

impl LongVideoSource {
    pub fn new(cookies: Option<CookieJar>, proxy: Option<String>) -> Self {
        Self { cookies, proxy }
    }

    fn args(&self, out_template: &str) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "-f".to_string(),
            format!("best[height<={MAX_HEIGHT}]/bestvideo[height<={MAX_HEIGHT}]+bestaudio"),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "-o".to_string(),
            out_template.to_string(),
        ];
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args
    }
}

#[derive(Deserialize)]
struct YtDlpInfo {
    id: String,
    ext: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[async_trait]
impl DownloadSource for LongVideoSource {
    fn supports(&self, platform: Platform) -> bool {
        matches!(platform, Platform::Youtube)
    }

    async fn extract(&self, url: &str, dest_dir: &Path) -> Result<ExtractedMedia, ExtractError> {
        match run_progressive(self, url, dest_dir).await {
            Err(ExtractError::BotDetected) => {
                let fallback = GeneralSource::new(self.cookies.clone(), self.proxy.clone()).with_options(
                    ExtractOptions { use_cookies: true, player_client: Some("android".to_string()), ..Default::default() },
                );
                fallback.extract(url, dest_dir).await
            }
            other => other,
        }
    }
}

async fn run_progressive(source: &LongVideoSource, url: &str, dest_dir: &Path) -> Result<ExtractedMedia, ExtractError> {
    let out_template = dest_dir.join("%(id)s.%(ext)s").to_string_lossy().to_string();

    let mut probe_args = source.args(&out_template);
    probe_args.push("-j".to_string());
    probe_args.push(url.to_string());

    let probe = Command::new("yt-dlp")
        .args(&probe_args)
        .output()
        .await
        .map_err(|e| ExtractError::Generic(format!("failed to launch yt-dlp: {e}")))?;

    if !probe.status.success() {
        let stderr = String::from_utf8_lossy(&probe.stderr);
        return Err(ExtractError::classify_from_text(&stderr));
    }

    let stdout = String::from_utf8_lossy(&probe.stdout);
    let info: YtDlpInfo = serde_json::from_str(stdout.trim().lines().next().unwrap_or(""))
        .map_err(|e| ExtractError::Generic(format!("failed to parse yt-dlp metadata: {e}")))?;

    let mut download_args = source.args(&out_template);
    download_args.push(url.to_string());
    let download = Command::new("yt-dlp")
        .args(&download_args)
        .output()
        .await
        .map_err(|e| ExtractError::Generic(format!("failed to launch yt-dlp: {e}")))?;

    if !download.status.success() {
        let stderr = String::from_utf8_lossy(&download.stderr);
        return Err(ExtractError::classify_from_text(&stderr));
    }

    Ok(ExtractedMedia {
        files: vec![PathBuf::from(dest_dir).join(format!("{}.{}", info.id, info.ext))],
        task_dir: dest_dir.to_path_buf(),
        platform: Platform::Youtube,
        title: info.title,
        performer: None,
        duration_secs: info.duration.map(|d| d.round() as u32),
        cover_path: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_supports_youtube() {
        let source = LongVideoSource::new(None, None);
        assert!(source.supports(Platform::Youtube));
        assert!(!source.supports(Platform::Tiktok));
        assert!(!source.supports(Platform::Instagram));
    }

    #[test]
    fn args_cap_height_at_1080() {
        let source = LongVideoSource::new(None, None);
        let args = source.args("out.%(ext)s");
        assert!(args.iter().any(|a| a.contains("height<=1080")));
    }
}
