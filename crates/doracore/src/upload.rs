//! Uploader + cache writer (component H, §4.H).

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::error::EngineResult;
use crate::storage::Store;
use crate::transcode::ProbeInfo;
use crate::transport::{OutboundItem, Transport};
use crate::types::MediaKind;

const MEDIA_GROUP_CHUNK: usize = 10;

/// One file ready to upload, with whatever metadata the pipeline recovered.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub probe: Option<ProbeInfo>,
    pub thumbnail: Option<PathBuf>,
    pub title: Option<String>,
    pub performer: Option<String>,
    /// Cover image for an audio item; sent as a standalone photo but never
    /// harvested into the cache row (§9 open question: preserved as-is).
    pub cover: Option<PathBuf>,
}

pub struct UploadOutcome {
    pub transport_ids: Vec<String>,
    pub media_kind: MediaKind,
    pub cache_id: i64,
}

pub struct Uploader {
    transport: Arc<dyn Transport>,
    store: Store,
}

impl Uploader {
    pub fn new(transport: Arc<dyn Transport>, store: Store) -> Self {
        Self { transport, store }
    }

    /// Upload `items` for `url`, write the cache row, attach the action menu
    /// for single-file sends, and evict the on-disk files as they're
    /// harvested. Returns the harvested ids and the media kind actually used.
    pub async fn upload_and_cache(
        &self,
        chat_id: i64,
        uploader_id: i64,
        url: &str,
        caption: &str,
        items: Vec<UploadItem>,
    ) -> EngineResult<UploadOutcome> {
        let is_single = items.len() == 1;
        let first_kind = items.first().map(|item| item.kind).unwrap_or(MediaKind::Video);
        let (transport_ids, menu_message_id) = if is_single {
            self.send_single(chat_id, caption, items.into_iter().next().expect("len checked")).await?
        } else {
            (self.send_carousel(chat_id, caption, items).await?, None)
        };

        let kind = first_kind.coerce_for_count(transport_ids.len());
        let cache_id = self.store.save_cache(url, &transport_ids, kind, uploader_id).await?;

        if let Some(message_id) = menu_message_id {
            if let Err(e) = self.transport.attach_action_menu(chat_id, message_id, cache_id).await {
                warn!(error = %e, "failed to attach action menu");
            }
        }

        Ok(UploadOutcome { transport_ids, media_kind: kind, cache_id })
    }

    async fn send_single(
        &self,
        chat_id: i64,
        caption: &str,
        item: UploadItem,
    ) -> EngineResult<(Vec<String>, Option<i64>)> {
        let outbound = OutboundItem {
            path: item.path.clone(),
            kind: item.kind,
            caption: Some(caption.to_string()),
            thumbnail: item.thumbnail.clone(),
            width: item.probe.as_ref().and_then(|p| p.width),
            height: item.probe.as_ref().and_then(|p| p.height),
            duration_secs: item.probe.as_ref().and_then(|p| p.duration_secs).map(|d| d.round() as u32),
            performer: item.performer.clone(),
            title: item.title.clone(),
        };

        let sent = self.transport.send_single(chat_id, &outbound).await?;
        evict(&item.path).await;

        // For audio from the audio host, the cover is sent standalone for
        // visual consistency but its id is never harvested (§9 open question).
        if let Some(cover) = &item.cover {
            let cover_item = OutboundItem {
                path: cover.clone(),
                kind: MediaKind::Photo,
                caption: None,
                thumbnail: None,
                width: None,
                height: None,
                duration_secs: None,
                performer: None,
                title: None,
            };
            if let Err(e) = self.transport.send_single(chat_id, &cover_item).await {
                warn!(error = %e, "failed to send standalone cover image");
            }
            evict(cover).await;
        }

        let menu_message_id = matches!(item.kind, MediaKind::Video | MediaKind::Audio).then_some(sent.message_id);

        Ok((vec![sent.file_id], menu_message_id))
    }

    async fn send_carousel(&self, chat_id: i64, caption: &str, items: Vec<UploadItem>) -> EngineResult<Vec<String>> {
        let mut ids = Vec::with_capacity(items.len());

        for (chunk_index, chunk) in items.chunks(MEDIA_GROUP_CHUNK).enumerate() {
            let outbound: Vec<OutboundItem> = chunk
                .iter()
                .enumerate()
                .map(|(i, item)| OutboundItem {
                    path: item.path.clone(),
                    kind: item.kind,
                    caption: if chunk_index == 0 && i == 0 { Some(caption.to_string()) } else { None },
                    thumbnail: item.thumbnail.clone(),
                    width: item.probe.as_ref().and_then(|p| p.width),
                    height: item.probe.as_ref().and_then(|p| p.height),
                    duration_secs: item.probe.as_ref().and_then(|p| p.duration_secs).map(|d| d.round() as u32),
                    performer: item.performer.clone(),
                    title: item.title.clone(),
                })
                .collect();

            match self.transport.send_media_group(chat_id, &outbound).await {
                Ok(sent) => {
                    for (item, message) in chunk.iter().zip(sent.into_iter()) {
                        ids.push(message.file_id);
                        evict(&item.path).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "media group send failed, falling back to individual sends");
                    for (i, item) in chunk.iter().enumerate() {
                        let caption = if chunk_index == 0 && i == 0 { Some(caption.to_string()) } else { None };
                        let outbound = OutboundItem {
                            path: item.path.clone(),
                            kind: item.kind,
                            caption,
                            thumbnail: item.thumbnail.clone(),
                            width: item.probe.as_ref().and_then(|p| p.width),
                            height: item.probe.as_ref().and_then(|p| p.height),
                            duration_secs: item.probe.as_ref().and_then(|p| p.duration_secs).map(|d| d.round() as u32),
                            performer: item.performer.clone(),
                            title: item.title.clone(),
                        };
                        let sent = self.transport.send_single(chat_id, &outbound).await?;
                        ids.push(sent.file_id);
                        evict(&item.path).await;
                    }
                }
            }
        }

        Ok(ids)
    }
}

async fn evict(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to evict uploaded file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_group_chunking_splits_eleven_into_ten_and_one() {
        let items: Vec<i32> = (0..11).collect();
        let chunks: Vec<&[i32]> = items.chunks(MEDIA_GROUP_CHUNK).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[1].len(), 1);
    }
}
