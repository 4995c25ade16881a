//! Request pipeline (component G, §4.G): the thirteen-step happy path from a
//! raw URL to delivered media, shared by the message and inline paths.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::canon;
use crate::error::{EngineError, EngineResult};
use crate::extract::ExtractorFacade;
use crate::governor::Governor;
use crate::inflight::{InflightRegistry, Lease};
use crate::ratelimit::RateLimiter;
use crate::storage::Store;
use crate::transcode::Transcoder;
use crate::types::{DownloadRequest, DownloadedFile, FetchOutcome, MediaKind};
use crate::upload::{UploadItem, Uploader};

/// The inline query path answers within 10s (§5); its wait on an in-flight
/// promise is cancellation-shielded so the download outlives the answer.
pub const INLINE_DEADLINE: Duration = Duration::from_secs(10);
/// The message path tolerates a much longer in-flight wait (§4.E, §5).
pub const MESSAGE_DEADLINE: Duration = Duration::from_secs(300);
/// Per-URL extraction hard timeout (§4.C, §5).
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(600);
/// Hard ceiling a transcoded artifact must meet before it can be delivered (§4.D).
const DELIVERY_CEILING_BYTES: u64 = 48 * 1024 * 1024;

/// Outcome of running the pipeline for one URL.
pub enum PipelineOutcome {
    /// Transport ids are available now (cache hit, reused on-disk file, or a
    /// completed fresh download).
    Delivered(FetchOutcome),
    /// A follower's deadline elapsed before the leader finished; the caller
    /// gets nothing now, the leader keeps running (§4.E deadline inversion).
    Deferred,
    /// The URL's host isn't in the supported set (§4.G step 1, §6).
    UnsupportedHost,
    /// The requesting user is still within their cooldown window; carries
    /// the remaining wait.
    RateLimited(Duration),
}

pub struct Pipeline {
    store: Store,
    inflight: Arc<InflightRegistry>,
    governor: Arc<Governor>,
    extractor: Arc<ExtractorFacade>,
    transcoder: Arc<Transcoder>,
    uploader: Arc<Uploader>,
    rate_limiter: RateLimiter,
    downloads_root: PathBuf,
    downloaded_file_ttl: chrono::Duration,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        inflight: Arc<InflightRegistry>,
        governor: Arc<Governor>,
        extractor: Arc<ExtractorFacade>,
        transcoder: Arc<Transcoder>,
        uploader: Arc<Uploader>,
        rate_limiter: RateLimiter,
        downloads_root: PathBuf,
        downloaded_file_ttl_hours: i64,
    ) -> Self {
        Self {
            store,
            inflight,
            governor,
            extractor,
            transcoder,
            uploader,
            rate_limiter,
            downloads_root,
            downloaded_file_ttl: chrono::Duration::hours(downloaded_file_ttl_hours),
        }
    }

    /// Run the full pipeline for `request` against `wait_deadline` — the
    /// per-path budget applied only while joining another caller's in-flight
    /// work (§4.E). A deadline never cancels the leader, only the follower's
    /// own wait.
    pub async fn run(&self, request: DownloadRequest, wait_deadline: Duration) -> EngineResult<PipelineOutcome> {
        if !canon::is_supported_host(&request.raw_url) {
            return Ok(PipelineOutcome::UnsupportedHost);
        }

        if let Some(outcome) = self.dispatch_from_cache(&request.canonical_url).await? {
            return Ok(PipelineOutcome::Delivered(outcome));
        }

        match self.inflight.join_or_lead(&request.canonical_url).await {
            Lease::Follower { future } => {
                match tokio::time::timeout(wait_deadline, future).await {
                    Ok(Ok(outcome)) => Ok(PipelineOutcome::Delivered(outcome)),
                    Ok(Err(_failed_arc)) => {
                        // The leader failed; re-check the cache in case a
                        // concurrent leader for a re-registered attempt
                        // populated it, otherwise surface as deferred.
                        match self.dispatch_from_cache(&request.canonical_url).await? {
                            Some(outcome) => Ok(PipelineOutcome::Delivered(outcome)),
                            None => Ok(PipelineOutcome::Deferred),
                        }
                    }
                    Err(_elapsed) => Ok(PipelineOutcome::Deferred),
                }
            }
            Lease::Leader => {
                // Rate limiting only gates fresh downloads (§1.2); a cache
                // hit never reaches this branch, and a rate-limited user
                // simply isn't allowed to become a leader this time.
                if let Some(remaining) = self.rate_limiter.remaining(request.user_id).await {
                    return Ok(PipelineOutcome::RateLimited(remaining));
                }
                self.rate_limiter.record(request.user_id).await;

                let request = request.clone();
                let pipeline = self.clone_handles();
                let key = request.canonical_url.clone();
                let future = self
                    .inflight
                    .register_leader(key, async move { pipeline.lead(request).await })
                    .await;
                // The leader's own work is cancellation-shielded by
                // register_leader's detached task; a deadline here only
                // bounds this caller's wait, never the download itself.
                match tokio::time::timeout(wait_deadline, future).await {
                    Ok(Ok(outcome)) => Ok(PipelineOutcome::Delivered(outcome)),
                    Ok(Err(arc)) => Err(clone_engine_error(&arc)),
                    Err(_elapsed) => Ok(PipelineOutcome::Deferred),
                }
            }
        }
    }

    fn clone_handles(&self) -> Pipeline {
        Pipeline {
            store: self.store.clone(),
            inflight: self.inflight.clone(),
            governor: self.governor.clone(),
            extractor: self.extractor.clone(),
            transcoder: self.transcoder.clone(),
            uploader: self.uploader.clone(),
            rate_limiter: self.rate_limiter.clone(),
            downloads_root: self.downloads_root.clone(),
            downloaded_file_ttl: self.downloaded_file_ttl,
        }
    }

    /// Step 3/4 re-check: cache lookup, returning ids if present.
    async fn dispatch_from_cache(&self, url: &str) -> EngineResult<Option<FetchOutcome>> {
        match self.store.get_cache(url).await? {
            Some((transport_ids, media_kind)) => {
                crate::metrics::record_cache_hit();
                Ok(Some(FetchOutcome { transport_ids, media_kind }))
            }
            None => {
                crate::metrics::record_cache_miss();
                Ok(None)
            }
        }
    }

    /// The leader's actual work: on-disk reuse check, extraction, transcode,
    /// upload, and persistence (§4.G steps 5-13).
    async fn lead(&self, request: DownloadRequest) -> EngineResult<FetchOutcome> {
        let url = request.canonical_url.clone();

        if let Some(reused) = self.try_on_disk_reuse(&url, &request).await? {
            return Ok(reused);
        }

        let _permit = self.governor.acquire_download().await;
        let task_dir = self.downloads_root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&task_dir).await?;

        // The facade itself enforces the 600s hard timeout and runs partial-
        // file salvage on elapse (§4.C); no need to wrap it again here.
        let media = self.extractor.extract(&request.raw_url, &task_dir).await?;
        drop(_permit);

        let items = self.build_upload_items(&media).await?;
        if items.is_empty() {
            return Err(EngineError::Validation("extraction produced no files".to_string()));
        }

        // A single-file result is worth retaining for on-disk reuse (§4.G
        // step 12); the retained copy lives outside the task dir so the
        // uploader's post-upload eviction never touches it.
        let retained = if items.len() == 1 {
            self.retain_for_reuse(&url, &items[0]).await
        } else {
            None
        };

        let caption = media.title.clone().unwrap_or_default();
        let upload = self
            .uploader
            .upload_and_cache(request.chat_id, request.user_id, &url, &caption, items)
            .await?;

        if let Some((retained_path, file_type, kind, size)) = retained {
            let file = DownloadedFile {
                id: 0,
                url: url.clone(),
                file_path: retained_path,
                size_bytes: size,
                file_type,
                media_kind: kind,
                task_dir: self.downloads_root.clone(),
                downloaded_at: chrono::Utc::now(),
                expires_at: chrono::Utc::now() + self.downloaded_file_ttl,
                cache_ref: Some(upload.cache_id),
            };
            if let Err(e) = self.store.save_downloaded_file(&file).await {
                warn!(url, error = %e, "failed to persist downloaded-file row");
            }
        }

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::remove_dir_all(&task_dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %task_dir.display(), error = %e, "failed to remove task directory");
                }
            }
        });

        Ok(FetchOutcome { transport_ids: upload.transport_ids, media_kind: upload.media_kind })
    }

    async fn try_on_disk_reuse(&self, url: &str, request: &DownloadRequest) -> EngineResult<Option<FetchOutcome>> {
        let Some(file) = self.store.get_downloaded_file(url).await? else {
            return Ok(None);
        };

        if file.expires_at <= chrono::Utc::now() {
            self.store.delete_downloaded_file(url).await?;
            return Ok(None);
        }

        if tokio::fs::metadata(&file.file_path).await.is_err() {
            self.store.delete_downloaded_file(url).await?;
            return Ok(None);
        }

        let item = UploadItem {
            path: file.file_path.clone(),
            kind: file.media_kind,
            probe: Some(self.transcoder.probe(&file.file_path).await),
            thumbnail: None,
            title: None,
            performer: None,
            cover: None,
        };

        let upload = self
            .uploader
            .upload_and_cache(request.chat_id, request.user_id, url, "", vec![item])
            .await?;

        info!(url, "served from on-disk cache");
        Ok(Some(FetchOutcome { transport_ids: upload.transport_ids, media_kind: upload.media_kind }))
    }

    /// Classify, transcode, and thumbnail the extracted artifacts (§4.G steps 8-10).
    async fn build_upload_items(&self, media: &crate::types::ExtractedMedia) -> EngineResult<Vec<UploadItem>> {
        let mut items = Vec::with_capacity(media.files.len());
        let is_carousel = media.files.len() > 1;

        for path in &media.files {
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            let mut kind = MediaKind::classify_extension(extension);
            if is_carousel {
                kind = kind.coerce_for_count(media.files.len());
            }

            let (path, thumbnail) = if matches!(kind, MediaKind::Video) {
                self.transcode_video(path).await?
            } else {
                (path.clone(), None)
            };

            let probe = if matches!(kind, MediaKind::Video) { Some(self.transcoder.probe(&path).await) } else { None };

            let cover = if matches!(kind, MediaKind::Audio) { media.cover_path.clone() } else { None };

            items.push(UploadItem {
                path,
                kind,
                probe,
                thumbnail,
                title: media.title.clone(),
                performer: media.performer.clone(),
                cover,
            });
        }

        Ok(items)
    }

    /// Optimize, compress-if-still-oversize, and thumbnail one video artifact
    /// (§4.G step 9-10). Aborts the whole URL if compression can't meet the
    /// ceiling (§4.D failure policy: compression failure is fatal).
    async fn transcode_video(&self, path: &PathBuf) -> EngineResult<(PathBuf, Option<PathBuf>)> {
        let metadata = tokio::fs::metadata(path).await?;
        let size = metadata.len();

        let (needs_optimization, _reason) = self.transcoder.needs_transport_optimization(path, size).await;
        let mut current = path.clone();

        if needs_optimization {
            let _permit = self.governor.acquire_optimization().await;
            match self.transcoder.optimize(&current).await {
                Some(optimized) => current = optimized,
                None => warn!(path = %path.display(), "optimization failed, delivering original"),
            }
        }

        let current_size = tokio::fs::metadata(&current).await.map(|m| m.len()).unwrap_or(size);
        if current_size > DELIVERY_CEILING_BYTES {
            let _permit = self.governor.acquire_optimization().await;
            let target_mb = DELIVERY_CEILING_BYTES / (1024 * 1024);
            match self.transcoder.compress(&current, target_mb).await {
                Some(compressed) => {
                    crate::metrics::record_compression_outcome("success");
                    current = compressed;
                }
                None => {
                    crate::metrics::record_compression_outcome("failure");
                    return Err(EngineError::Transcode(format!(
                        "{} still exceeds the {} MB ceiling after compression",
                        current.display(),
                        target_mb
                    )))
                }
            }
        }

        let thumbnail = {
            let _permit = self.governor.acquire_conversion().await;
            self.transcoder.thumbnail(&current, Duration::from_secs(1)).await
        };

        Ok((current, thumbnail))
    }

    /// Copy `item`'s file into the downloads root under a name keyed on the
    /// url, ahead of the upload that will evict the original. Best-effort:
    /// a copy failure just means this URL isn't served from disk next time.
    async fn retain_for_reuse(&self, url: &str, item: &UploadItem) -> Option<(PathBuf, String, MediaKind, u64)> {
        let extension = item.path.extension().and_then(|e| e.to_str()).unwrap_or("bin");
        let retained_path = self.downloads_root.join(format!("{}.{extension}", Uuid::new_v4()));

        match tokio::fs::copy(&item.path, &retained_path).await {
            Ok(size) => Some((retained_path, extension.to_string(), item.kind, size)),
            Err(e) => {
                warn!(url, error = %e, "failed to retain file for on-disk reuse");
                None
            }
        }
    }
}

fn clone_engine_error(arc: &Arc<EngineError>) -> EngineError {
    EngineError::Other(anyhow::anyhow!(arc.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlines_match_the_documented_budgets() {
        assert_eq!(INLINE_DEADLINE, Duration::from_secs(10));
        assert_eq!(MESSAGE_DEADLINE, Duration::from_secs(300));
        assert_eq!(EXTRACT_TIMEOUT, Duration::from_secs(600));
    }
}
