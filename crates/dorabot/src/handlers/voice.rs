//! Voice/video-note ingestion (§4.I step 0): only buffers the message into
//! the aggregator — the payload is downloaded at flush time, not here.

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;

use doracore::types::VoiceNote;

use super::{HandlerDeps, HandlerError};

pub fn handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.voice().is_some() || msg.video_note().is_some())
        .endpoint(move |msg: Message| {
            let deps = deps.clone();
            async move {
                let Some(user) = msg.from.as_ref() else {
                    return Ok(());
                };

                let Some((file_id, unique_id, extension)) = voice_payload(&msg) else {
                    return Ok(());
                };

                let path = deps.engine.config.download_dir.join("voice").join(format!("{unique_id}.{extension}"));

                deps.engine.voice_batch.push(VoiceNote {
                    message_id: msg.id.0 as i64,
                    chat_id: msg.chat.id.0,
                    user_id: user.id.0 as i64,
                    source_unique_id: unique_id,
                    transport_file_id: file_id,
                    path,
                    received_at: chrono::Utc::now(),
                });

                Ok(())
            }
        })
}

fn voice_payload(msg: &Message) -> Option<(String, String, &'static str)> {
    if let Some(voice) = msg.voice() {
        return Some((voice.file.id.clone(), voice.file.unique_id.clone(), "ogg"));
    }
    if let Some(note) = msg.video_note() {
        return Some((note.file.id.clone(), note.file.unique_id.clone(), "mp4"));
    }
    None
}
