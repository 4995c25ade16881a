//! Voice-batch "Summarize" callback (§4.I step 7): reads every transcript the
//! payload names, concatenates them, and dispatches to the summary oracle.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::warn;

use doracore::oracle::SummaryOracle;
use doracore::storage::Store;

const PREFIX: &str = "summary:";

pub async fn handle_summary_callback(
    bot: &Bot,
    store: &Store,
    summary: &Arc<dyn SummaryOracle>,
    chat_id: ChatId,
    data: &str,
) -> ResponseResult<()> {
    let Some(ids) = data.strip_prefix(PREFIX) else {
        return Ok(());
    };

    let mut transcripts = Vec::new();
    for id in ids.split(',').filter(|id| !id.is_empty()) {
        match store.get_transcription(id).await {
            Ok(Some(transcription)) => transcripts.push(transcription.text),
            Ok(None) => warn!(source_unique_id = id, "transcription missing for summary callback"),
            Err(e) => warn!(source_unique_id = id, error = %e, "failed to load transcription for summary"),
        }
    }

    if transcripts.is_empty() {
        bot.send_message(chat_id, "No transcripts available to summarize.").await?;
        return Ok(());
    }

    let combined = transcripts.join("\n\n");
    match summary.summarize(&combined).await {
        Ok(text) => {
            bot.send_message(chat_id, text).await?;
        }
        Err(e) => {
            warn!(error = %e, "summary oracle failed");
            bot.send_message(chat_id, format!("\u{274c} {e}")).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_the_summary_prefix() {
        assert_eq!("summary:uid1,uid2".strip_prefix(PREFIX), Some("uid1,uid2"));
        assert_eq!("resend:42".strip_prefix(PREFIX), None);
    }
}
