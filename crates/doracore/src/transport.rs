//! Chat transport abstraction (§6): the core treats the chat platform as an
//! opaque client interface so the pipeline and uploader are transport-
//! agnostic. `dorabot` supplies the `teloxide`-backed implementation.

use std::path::Path;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::MediaKind;

/// One outbound item: a local file plus the metadata the transport should
/// attach (caption, thumbnail, dimensions, duration).
#[derive(Debug, Clone)]
pub struct OutboundItem {
    pub path: std::path::PathBuf,
    pub kind: MediaKind,
    pub caption: Option<String>,
    pub thumbnail: Option<std::path::PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<u32>,
    pub performer: Option<String>,
    pub title: Option<String>,
}

/// The transport's report of one sent message: enough to harvest a
/// transport-assigned file id (§4.H transport-id harvest).
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message_id: i64,
    pub file_id: String,
}

/// Everything the core needs from the chat transport, kept deliberately
/// narrow (§1 out-of-scope: only the interface the core consumes).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one item, returning the message the transport created.
    async fn send_single(&self, chat_id: i64, item: &OutboundItem) -> EngineResult<SentMessage>;

    /// Send up to 10 items as a single media group; returns one message per item.
    async fn send_media_group(&self, chat_id: i64, items: &[OutboundItem]) -> EngineResult<Vec<SentMessage>>;

    /// Edit a previously sent message to attach a deep-link action button.
    async fn attach_action_menu(&self, chat_id: i64, message_id: i64, cache_id: i64) -> EngineResult<()>;

    /// Attach an arbitrary callback-data button to a previously sent message
    /// (§4.I step 7: the voice-batch summary action).
    async fn attach_callback_button(
        &self,
        chat_id: i64,
        message_id: i64,
        label: &str,
        callback_data: &str,
    ) -> EngineResult<()>;

    /// Send a plain text reply, splitting on word boundaries if it exceeds
    /// the transport's single-message length ceiling (§4.I step 6). Returns
    /// the id of the sent message so a caller can attach a button to it.
    async fn send_text(&self, chat_id: i64, text: &str) -> EngineResult<i64>;

    /// Download a transport-hosted file (e.g. an incoming voice note) to `dest`.
    async fn download_to(&self, file_id: &str, dest: &Path) -> EngineResult<()>;

    /// The transport's hard per-message payload ceiling in bytes.
    fn max_payload_bytes(&self) -> u64 {
        50 * 1024 * 1024
    }

    /// The transport's single-message text length ceiling.
    fn max_text_chars(&self) -> usize {
        4096
    }
}
