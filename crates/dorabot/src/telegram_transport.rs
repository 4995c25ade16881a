//! Teloxide-backed [`Transport`] implementation (§6): the only module in
//! this crate that speaks the chat platform's wire format directly. The
//! engine only ever sees the narrow trait.

use std::path::Path;

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, InputMedia, InputMediaAudio,
    InputMediaPhoto, InputMediaVideo, MessageId,
};
use tokio::fs::File;

use doracore::error::{EngineError, EngineResult};
use doracore::transport::{OutboundItem, SentMessage, Transport};
use doracore::types::MediaKind;

pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_single(&self, chat_id: i64, item: &OutboundItem) -> EngineResult<SentMessage> {
        let chat = ChatId(chat_id);
        let file = InputFile::file(&item.path);

        let message = match item.kind {
            MediaKind::Photo => {
                let mut req = self.bot.send_photo(chat, file);
                if let Some(caption) = &item.caption {
                    req = req.caption(caption.clone());
                }
                req.await?
            }
            MediaKind::Video | MediaKind::Carousel => {
                let mut req = self.bot.send_video(chat, file);
                if let Some(caption) = &item.caption {
                    req = req.caption(caption.clone());
                }
                if let Some(w) = item.width {
                    req = req.width(w);
                }
                if let Some(h) = item.height {
                    req = req.height(h);
                }
                if let Some(d) = item.duration_secs {
                    req = req.duration(d);
                }
                if let Some(thumb) = &item.thumbnail {
                    req = req.thumbnail(InputFile::file(thumb));
                }
                req.await?
            }
            MediaKind::Audio => {
                let mut req = self.bot.send_audio(chat, file);
                if let Some(caption) = &item.caption {
                    req = req.caption(caption.clone());
                }
                if let Some(d) = item.duration_secs {
                    req = req.duration(d);
                }
                if let Some(performer) = &item.performer {
                    req = req.performer(performer.clone());
                }
                if let Some(title) = &item.title {
                    req = req.title(title.clone());
                }
                if let Some(thumb) = &item.thumbnail {
                    req = req.thumbnail(InputFile::file(thumb));
                }
                req.await?
            }
        };

        harvest(message)
    }

    async fn send_media_group(&self, chat_id: i64, items: &[OutboundItem]) -> EngineResult<Vec<SentMessage>> {
        let chat = ChatId(chat_id);
        let media: Vec<InputMedia> = items.iter().map(to_input_media).collect();
        let messages = self.bot.send_media_group(chat, media).await?;
        messages.into_iter().map(harvest).collect()
    }

    async fn attach_action_menu(&self, chat_id: i64, message_id: i64, cache_id: i64) -> EngineResult<()> {
        let url = format!("https://t.me/share/url?url=start%3Dfile_{cache_id}");
        let parsed = url::Url::parse(&url)?;
        let markup = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url("Convert".to_string(), parsed)]]);

        self.bot
            .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id as i32))
            .reply_markup(markup)
            .await?;
        Ok(())
    }

    async fn attach_callback_button(
        &self,
        chat_id: i64,
        message_id: i64,
        label: &str,
        callback_data: &str,
    ) -> EngineResult<()> {
        let markup =
            InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(label.to_string(), callback_data.to_string())]]);

        self.bot
            .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id as i32))
            .reply_markup(markup)
            .await?;
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> EngineResult<i64> {
        let message = self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(message.id.0 as i64)
    }

    async fn download_to(&self, file_id: &str, dest: &Path) -> EngineResult<()> {
        let file = self.bot.get_file(FileId(file_id.to_string())).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut out = File::create(dest).await?;
        self.bot
            .download_file(&file.path, &mut out)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(())
    }
}

fn to_input_media(item: &OutboundItem) -> InputMedia {
    let file = InputFile::file(&item.path);
    match item.kind {
        MediaKind::Photo => {
            let mut media = InputMediaPhoto::new(file);
            if let Some(caption) = &item.caption {
                media = media.caption(caption.clone());
            }
            InputMedia::Photo(media)
        }
        MediaKind::Audio => {
            let mut media = InputMediaAudio::new(file);
            if let Some(caption) = &item.caption {
                media = media.caption(caption.clone());
            }
            if let Some(performer) = &item.performer {
                media = media.performer(performer.clone());
            }
            if let Some(title) = &item.title {
                media = media.title(title.clone());
            }
            InputMedia::Audio(media)
        }
        MediaKind::Video | MediaKind::Carousel => {
            let mut media = InputMediaVideo::new(file);
            if let Some(caption) = &item.caption {
                media = media.caption(caption.clone());
            }
            if let Some(w) = item.width {
                media = media.width(w);
            }
            if let Some(h) = item.height {
                media = media.height(h);
            }
            if let Some(d) = item.duration_secs {
                media = media.duration(d);
            }
            InputMedia::Video(media)
        }
    }
}

/// Harvest the transport-assigned file id off whatever media type Telegram
/// actually stored the message as (§4.H transport-id harvest).
fn harvest(message: Message) -> EngineResult<SentMessage> {
    let file_id = message
        .photo()
        .and_then(|sizes| sizes.last())
        .map(|p| p.file.id.clone())
        .or_else(|| message.video().map(|v| v.file.id.clone()))
        .or_else(|| message.audio().map(|a| a.file.id.clone()))
        .or_else(|| message.document().map(|d| d.file.id.clone()))
        .ok_or_else(|| EngineError::Transport("sent message carries no file".to_string()))?;

    Ok(SentMessage { message_id: message.id.0 as i64, file_id })
}
