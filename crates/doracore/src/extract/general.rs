//! General-purpose extractor strategy: shells out to the `yt-dlp` binary,
//! which covers the bulk of supported hosts directly and backs the other
//! strategies' fallbacks. Parameterized per call site (§4.C): audio
//! extraction for the audio host, credential-free mobile-UA requests for the
//! reel path, and an alternate client identifier for the long-video
//! bot-detection fallback.
//!
//! **Concurrency discipline.** The underlying extractor library is not known
//! to be re-entrant with respect to its internal progress-state machinery; a
//! process-wide mutex guards every invocation so only one `yt-dlp` child runs
//! at a time, even though other strategies may run concurrently with it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::ExtractError;
use crate::extract::cookies::CookieJar;
use crate::extract::DownloadSource;
use crate::types::{ExtractedMedia, Platform};

const MOBILE_USER_AGENT: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

/// Guards every `yt-dlp` invocation process-wide; not per-`GeneralSource`
/// instance, since all instances shell out to the same non-reentrant binary.
static INVOCATION_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub extract_audio: bool,
    pub use_cookies: bool,
    pub mobile_user_agent: bool,
    pub player_client: Option<String>,
}

pub struct GeneralSource {
    cookies: Option<CookieJar>,
    proxy: Option<String>,
    options: ExtractOptions,
}

impl GeneralSource {
    pub fn new(cookies: Option<CookieJar>, proxy: Option<String>) -> Self {
        Self { cookies, proxy, options: ExtractOptions::default() }
    }

    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    fn build_args(&self, out_template: &str) -> Vec<String> {
        let mut args = vec!["--no-playlist".to_string(), "--no-progress".to_string()];

        if self.options.extract_audio {
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push("mp3".to_string());
            args.push("--audio-quality".to_string());
            args.push("0".to_string());
            args.push("--write-thumbnail".to_string());
        }
        if self.options.mobile_user_agent {
            args.push("--user-agent".to_string());
            args.push(MOBILE_USER_AGENT.to_string());
        }
        if let Some(client) = &self.options.player_client {
            args.push("--extractor-args".to_string());
            args.push(format!("youtube:player_client={client}"));
        }
        if self.options.use_cookies {
            if let Some(jar) = &self.cookies {
                if jar.exists() {
                    args.push("--cookies".to_string());
                    args.push(jar.path().to_string_lossy().to_string());
                }
            }
        }
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push("-o".to_string());
        args.push(out_template.to_string());
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
    uploader: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[async_trait]
impl DownloadSource for GeneralSource {
    fn supports(&self, platform: Platform) -> bool {
        matches!(
            platform,
            Platform::Instagram | Platform::Tiktok | Platform::Soundcloud | Platform::Youtube | Platform::Other
        )
    }

    async fn extract(&self, url: &str, dest_dir: &Path) -> Result<ExtractedMedia, ExtractError> {
        let out_template = dest_dir.join("%(id)s.%(ext)s").to_string_lossy().to_string();

        let _guard = INVOCATION_LOCK.lock().await;

        let mut probe_args = self.build_args(&out_template);
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

        let mut download_args = self.build_args(&out_template);
        download_args.push(url.to_string());

        let download = Command::new("yt-dlp")
            .args(&download_args)
            .output()
            .await
            .map_err(|e| ExtractError::Generic(format!("failed to launch yt-dlp: {e}")))?;

        if !download.status.success() {
            let stderr = String::from_utf8_lossy(&download.stderr);

            // Network timeouts may still have left a usable partial file
            // behind (§4.C partial-file salvage); the facade re-scans on
            // `Timeout`, so surface that class distinctly here.
            return Err(ExtractError::classify_from_text(&stderr));
        }

        let ext = if self.options.extract_audio { "mp3".to_string() } else { info.ext };
        let path = PathBuf::from(dest_dir).join(format!("{}.{}", info.id, ext));
        let cover_path = if self.options.extract_audio {
            find_sibling_thumbnail(dest_dir, &info.id).await
        } else {
            None
        };

        Ok(ExtractedMedia {
            files: vec![path],
            task_dir: dest_dir.to_path_buf(),
            platform: crate::canon::classify(url),
            title: info.title,
            performer: info.uploader,
            duration_secs: info.duration.map(|d| d.round() as u32),
            cover_path,
        })
    }
}

async fn find_sibling_thumbnail(dest_dir: &Path, id: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dest_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(id) && (name.ends_with(".jpg") || name.ends_with(".png") || name.ends_with(".webp")) {
            return Some(entry.path());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_user_agent_option_is_applied() {
        let source = GeneralSource::new(None, None)
            .with_options(ExtractOptions { mobile_user_agent: true, ..Default::default() });
        let args = source.build_args("out.%(ext)s");
        assert!(args.contains(&MOBILE_USER_AGENT.to_string()));
    }

    #[test]
    fn cookies_omitted_when_use_cookies_is_false() {
        let source = GeneralSource::new(Some(CookieJar::from_path("/tmp/cookies.txt")), None);
        let args = source.build_args("out.%(ext)s");
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn audio_extraction_flags_are_present_when_requested() {
        let source = GeneralSource::new(None, None)
            .with_options(ExtractOptions { extract_audio: true, ..Default::default() });
        let args = source.build_args("out.%(ext)s");
        assert!(args.contains(&"-x".to_string()));
        assert!(args.contains(&"mp3".to_string()));
    }
}
