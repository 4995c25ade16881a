//! Inline-query path: answers within the 10s inline deadline (§4.G, §5),
//! surfacing the harvested transport id directly as a cached result rather
//! than re-uploading.

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InlineQueryResult, InlineQueryResultCachedAudio, InlineQueryResultCachedPhoto, InlineQueryResultCachedVideo,
};
use tracing::warn;

use doracore::canon;
use doracore::pipeline::{PipelineOutcome, INLINE_DEADLINE};
use doracore::types::{DownloadRequest, FetchOutcome, MediaKind};

use super::{HandlerDeps, HandlerError};

pub fn handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_inline_query().endpoint(move |bot: Bot, query: InlineQuery| {
        let deps = deps.clone();
        async move {
            let raw_url = query.query.trim().to_string();
            if !canon::is_supported_host(&raw_url) {
                bot.answer_inline_query(&query.id, Vec::<InlineQueryResult>::new()).await?;
                return Ok(());
            }

            let request = DownloadRequest {
                canonical_url: canon::canonicalize(&raw_url),
                raw_url,
                chat_id: query.from.id.0 as i64,
                user_id: query.from.id.0 as i64,
            };

            deps.activity.touch();
            let outcome = deps.engine.pipeline.run(request, INLINE_DEADLINE).await;

            let results = match outcome {
                Ok(PipelineOutcome::Delivered(fetch)) => result_for(&query.id, &fetch).into_iter().collect(),
                Ok(_) => Vec::new(),
                Err(e) => {
                    warn!(error = %e, "pipeline failed for an inline query");
                    Vec::new()
                }
            };

            if let Err(e) = bot.answer_inline_query(&query.id, results).await {
                warn!(error = %e, "failed to answer inline query");
            }

            Ok(())
        }
    })
}

fn result_for(query_id: &str, fetch: &FetchOutcome) -> Option<InlineQueryResult> {
    let file_id = fetch.transport_ids.first()?.clone();
    let id = format!("{query_id}-0");

    Some(match fetch.media_kind {
        MediaKind::Photo | MediaKind::Carousel => {
            InlineQueryResult::CachedPhoto(InlineQueryResultCachedPhoto::new(id, FileId(file_id)))
        }
        MediaKind::Video => {
            InlineQueryResult::CachedVideo(InlineQueryResultCachedVideo::new(id, FileId(file_id), "video"))
        }
        MediaKind::Audio => InlineQueryResult::CachedAudio(InlineQueryResultCachedAudio::new(id, FileId(file_id))),
    })
}
