//! Deep-link conversion menu (§1.2 supplemented feature, grounded in
//! `bot.py`'s `get_convert_keyboard`): `/start file_<id>` and the inline
//! "Convert" button both resolve to the same cached upload and resend its
//! already-harvested transport ids without touching the pipeline again.

use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile};
use tracing::warn;

use doracore::storage::Store;
use doracore::types::MediaKind;

const DEEP_LINK_PREFIX: &str = "file_";

/// Parse a `/start` payload of the form `file_<cache_id>`.
pub fn parse_deep_link(payload: &str) -> Option<i64> {
    payload.strip_prefix(DEEP_LINK_PREFIX)?.parse().ok()
}

/// Resend every transport id a cache row holds, in its original kind. No
/// re-download, no re-extraction — the whole point of the cache hit.
pub async fn open_conversion_menu(bot: &Bot, store: &Store, chat_id: ChatId, cache_id: i64) -> ResponseResult<()> {
    let entry = match store.get_cache_by_id(cache_id).await {
        Ok(entry) => entry,
        Err(e) => {
            warn!(cache_id, error = %e, "failed to load cache entry for deep link");
            None
        }
    };

    let Some((transport_ids, media_kind)) = entry else {
        bot.send_message(chat_id, "That file is no longer available.").await?;
        return Ok(());
    };

    for transport_id in &transport_ids {
        let file = InputFile::file_id(FileId(transport_id.clone()));
        let sent = match media_kind {
            MediaKind::Photo | MediaKind::Carousel => bot.send_photo(chat_id, file).await.map(|_| ()),
            MediaKind::Audio => bot.send_audio(chat_id, file).await.map(|_| ()),
            MediaKind::Video => bot.send_video(chat_id, file).await.map(|_| ()),
        };
        if let Err(e) = sent {
            warn!(cache_id, error = %e, "failed to resend cached transport id");
        }
    }

    Ok(())
}

/// The inline "Convert"/"Resend" button routes through the same callback
/// data shape the action menu encodes (`resend:<cache_id>`).
pub async fn handle_resend_callback(bot: &Bot, store: &Store, chat_id: ChatId, data: &str) -> ResponseResult<()> {
    if let Some(cache_id) = data.strip_prefix("resend:").and_then(|s| s.parse().ok()) {
        open_conversion_menu(bot, store, chat_id, cache_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_deep_link() {
        assert_eq!(parse_deep_link("file_42"), Some(42));
    }

    #[test]
    fn rejects_a_missing_prefix_or_non_numeric_suffix() {
        assert_eq!(parse_deep_link("42"), None);
        assert_eq!(parse_deep_link("file_abc"), None);
    }
}
