//! URL-in-text message path: any private or group message carrying a
//! supported link runs the full pipeline under the message deadline (§4.G,
//! §5).

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::warn;

use doracore::canon;
use doracore::pipeline::{PipelineOutcome, MESSAGE_DEADLINE};
use doracore::types::DownloadRequest;

use super::{HandlerDeps, HandlerError};

pub fn handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().filter(|msg: Message| extract_url(&msg).is_some()).endpoint(move |bot: Bot, msg: Message| {
        let deps = deps.clone();
        async move {
            let Some(raw_url) = extract_url(&msg) else {
                return Ok(());
            };
            let Some(user) = msg.from.as_ref() else {
                return Ok(());
            };

            let request = DownloadRequest {
                canonical_url: canon::canonicalize(&raw_url),
                raw_url,
                chat_id: msg.chat.id.0,
                user_id: user.id.0 as i64,
            };

            deps.activity.mark_busy();
            let outcome = deps.engine.pipeline.run(request, MESSAGE_DEADLINE).await;
            deps.activity.mark_idle_one();

            match outcome {
                Ok(PipelineOutcome::Delivered(_)) => {}
                Ok(PipelineOutcome::UnsupportedHost) => {}
                Ok(PipelineOutcome::Deferred) => {
                    bot.send_message(msg.chat.id, "Still working on that one, hang tight.").await?;
                }
                Ok(PipelineOutcome::RateLimited(remaining)) => {
                    bot.send_message(msg.chat.id, format!("Slow down — try again in {}s.", remaining.as_secs()))
                        .await?;
                }
                Err(e) => {
                    warn!(chat_id = msg.chat.id.0, error = %e, "pipeline failed for a message url");
                    bot.send_message(msg.chat.id, format!("\u{274c} {e}")).await?;
                }
            }

            Ok(())
        }
    })
}

fn extract_url(msg: &Message) -> Option<String> {
    let text = msg.text()?;
    text.split_whitespace().find(|word| canon::is_supported_host(word)).map(str::to_string)
}
