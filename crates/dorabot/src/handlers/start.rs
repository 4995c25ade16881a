//! `/start` and `/help`, including the `file_<id>` deep-link conversion menu
//! (§1.2 supplemented feature), grounded in the teacher's `Command` /
//! `BotCommands` derive pattern.

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::menu;
use crate::summary_action;

use super::{HandlerDeps, HandlerError};

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Send a link and I'll fetch it:")]
pub enum Command {
    #[command(description = "welcome message, or open a file_<id> deep link", parse_with = "split")]
    Start(String),
    #[command(description = "list supported sources")]
    Help,
}

pub fn handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().filter_command::<Command>().endpoint(move |bot: Bot, msg: Message, cmd: Command| {
        let deps = deps.clone();
        async move {
            match cmd {
                Command::Start(payload) => {
                    if let Some(cache_id) = menu::parse_deep_link(payload.trim()) {
                        menu::open_conversion_menu(&bot, &deps.engine.store, msg.chat.id, cache_id).await?;
                    } else {
                        bot.send_message(
                            msg.chat.id,
                            "Send an Instagram, TikTok, YouTube, or SoundCloud link and I'll fetch it.",
                        )
                        .await?;
                    }
                }
                Command::Help => {
                    bot.send_message(msg.chat.id, "Supported sources: Instagram, TikTok, YouTube, SoundCloud.")
                        .await?;
                }
            }
            Ok(())
        }
    })
}

/// The inline "Convert" button's callback query routes to the same
/// conversion menu a `/start` deep link would open.
pub fn callback_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(move |bot: Bot, query: CallbackQuery| {
        let deps = deps.clone();
        async move {
            if let (Some(data), Some(message)) = (&query.data, &query.message) {
                let chat_id = message.chat().id;
                if data.starts_with("summary:") {
                    summary_action::handle_summary_callback(&bot, &deps.engine.store, &deps.engine.summary, chat_id, data)
                        .await?;
                } else {
                    menu::handle_resend_callback(&bot, &deps.engine.store, chat_id, data).await?;
                }
            }
            bot.answer_callback_query(&query.id).await?;
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_descriptions_render() {
        assert!(Command::descriptions().to_string().contains("start"));
    }
}
