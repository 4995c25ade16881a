//! Voice batch aggregator (component I, §4.I).
//!
//! Buffers a user's incoming voice/video-note messages, debounces arrivals,
//! and on flush downloads, converts, and transcribes them in original
//! send-order before delivering one combined transcript.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::warn;

use crate::error::EngineResult;
use crate::governor::Governor;
use crate::oracle::SttOracle;
use crate::storage::Store;
use crate::transcode::Transcoder;
use crate::transport::Transport;
use crate::types::VoiceNote;

const DEBOUNCE: Duration = Duration::from_millis(500);
const MAX_BATCH_SIZE: usize = 50;
const MAX_CONCURRENT_TRANSCRIPTIONS: usize = 16;
const SEND_RETRIES: u32 = 3;
const RETRY_BACKOFFS: [Duration; 3] = [Duration::from_secs(5), Duration::from_secs(10), Duration::from_secs(15)];
const HIGH_PASS_HZ: u32 = 80;

struct BatchState {
    notes: Vec<VoiceNote>,
    generation: u64,
}

/// One transcribed segment, in original (message id) order.
struct Segment {
    note: VoiceNote,
    text: String,
}

pub struct VoiceBatchAggregator {
    buffers: DashMap<i64, BatchState>,
    store: Store,
    transcoder: Arc<Transcoder>,
    governor: Arc<Governor>,
    transport: Arc<dyn Transport>,
    stt: Arc<dyn SttOracle>,
}

impl VoiceBatchAggregator {
    pub fn new(
        store: Store,
        transcoder: Arc<Transcoder>,
        governor: Arc<Governor>,
        transport: Arc<dyn Transport>,
        stt: Arc<dyn SttOracle>,
    ) -> Arc<Self> {
        Arc::new(Self { buffers: DashMap::new(), store, transcoder, governor, transport, stt })
    }

    /// Buffer `note`, resetting the per-user debounce timer. Flushes
    /// immediately if the buffer has reached the 50-message cap.
    pub fn push(self: &Arc<Self>, note: VoiceNote) {
        let user_id = note.user_id;
        let (generation, hit_cap) = {
            let mut entry = self.buffers.entry(user_id).or_insert_with(|| BatchState { notes: Vec::new(), generation: 0 });
            entry.notes.push(note);
            entry.generation += 1;
            (entry.generation, entry.notes.len() >= MAX_BATCH_SIZE)
        };

        let this = self.clone();
        if hit_cap {
            tokio::spawn(async move { this.flush_if_current(user_id, generation).await });
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(DEBOUNCE).await;
                this.flush_if_current(user_id, generation).await;
            });
        }
    }

    /// Flush only if no later arrival has bumped the generation since this
    /// task was scheduled — a later arrival's own timer will flush instead.
    async fn flush_if_current(&self, user_id: i64, generation: u64) {
        let notes = match self.buffers.get(&user_id) {
            Some(state) if state.generation == generation => {
                drop(state);
                match self.buffers.remove(&user_id) {
                    Some((_, state)) => state.notes,
                    None => return,
                }
            }
            _ => return,
        };

        if notes.is_empty() {
            return;
        }

        if let Err(e) = self.flush(notes).await {
            warn!(user_id, error = %e, "voice batch flush failed");
        }
    }

    /// §4.I steps 1-7: download, convert, transcribe, concatenate, persist,
    /// deliver, attach the summary action.
    async fn flush(&self, mut notes: Vec<VoiceNote>) -> EngineResult<()> {
        notes.sort_by_key(|n| n.message_id);
        let chat_id = notes[0].chat_id;
        let user_id = notes[0].user_id;

        let mut downloaded = Vec::with_capacity(notes.len());
        for note in notes {
            match self.transport.download_to(&note.transport_file_id, &note.path).await {
                Ok(()) => downloaded.push(note),
                Err(e) => warn!(message_id = note.message_id, error = %e, "failed to download voice payload"),
            }
        }

        let segments = self.transcribe_all(downloaded).await;

        let non_empty: Vec<&Segment> = segments.iter().filter(|s| !s.text.trim().is_empty()).collect();
        for segment in &non_empty {
            if let Err(e) = self.store.save_transcription(&segment.note.source_unique_id, user_id, &segment.text).await
            {
                warn!(source_unique_id = segment.note.source_unique_id, error = %e, "failed to persist transcription");
            }
        }

        let combined = concatenate_with_headers(&non_empty);
        let last_message_id = self.deliver(chat_id, &combined).await;

        let source_ids: Vec<String> = non_empty.iter().map(|s| s.note.source_unique_id.clone()).collect();
        if let (Some(message_id), false) = (last_message_id, source_ids.is_empty()) {
            self.attach_summary_action(chat_id, message_id, &source_ids).await;
        }

        Ok(())
    }

    /// Convert each payload to 16kHz mono PCM WAV, then transcribe through a
    /// bounded pool of size `min(n, 16)` (§4.I step 2-3). Empty transcripts
    /// are retained so the caller can exclude them explicitly.
    async fn transcribe_all(&self, notes: Vec<VoiceNote>) -> Vec<Segment> {
        let pool_size = notes.len().min(MAX_CONCURRENT_TRANSCRIPTIONS).max(1);
        let semaphore = Arc::new(tokio::sync::Semaphore::new(pool_size));

        let tasks: Vec<_> = notes
            .into_iter()
            .map(|note| {
                let semaphore = semaphore.clone();
                let stt = self.stt.clone();
                let transcoder = self.transcoder.clone();
                let governor = self.governor.clone();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    let text = transcribe_one(&transcoder, &governor, &stt, &note).await.unwrap_or_default();
                    Segment { note, text }
                }
            })
            .collect();

        futures_util::future::join_all(tasks).await
    }

    /// Send the combined transcript, splitting on word boundaries if it
    /// exceeds the transport's ceiling, retrying failed sends up to three
    /// times with backoff, then falling back to plain text (§4.I step 6).
    /// Returns the id of the last message actually sent, so the summary
    /// button (step 7) can be attached to it.
    async fn deliver(&self, chat_id: i64, combined: &str) -> Option<i64> {
        if combined.trim().is_empty() {
            return None;
        }

        let mut last_message_id = None;
        for chunk in split_on_word_boundaries(combined, self.transport.max_text_chars()) {
            let mut attempt = 0;
            loop {
                match self.transport.send_text(chat_id, &chunk).await {
                    Ok(message_id) => {
                        last_message_id = Some(message_id);
                        break;
                    }
                    Err(e) if attempt < SEND_RETRIES => {
                        warn!(chat_id, attempt, error = %e, "transcript send failed, retrying");
                        tokio::time::sleep(RETRY_BACKOFFS[attempt as usize]).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        warn!(chat_id, error = %e, "transcript send exhausted retries, falling back to plain text");
                        last_message_id = self.transport.send_text(chat_id, &strip_markup(&chunk)).await.ok();
                        break;
                    }
                }
            }
        }
        last_message_id
    }

    /// Attach the "summary" action button (§4.I step 7): its callback
    /// payload is the comma-joined list of source unique ids, read back by
    /// the bot-side callback handler to fetch transcripts and dispatch to
    /// the summary oracle.
    async fn attach_summary_action(&self, chat_id: i64, message_id: i64, source_ids: &[String]) {
        let payload = format!("summary:{}", source_ids.join(","));
        if let Err(e) = self.transport.attach_callback_button(chat_id, message_id, "Summarize", &payload).await {
            warn!(chat_id, error = %e, "failed to attach summary action button");
        }
    }
}

async fn transcribe_one(
    transcoder: &Transcoder,
    governor: &Governor,
    stt: &Arc<dyn SttOracle>,
    note: &VoiceNote,
) -> EngineResult<String> {
    let wav_path = {
        let _permit = governor.acquire_conversion().await;
        to_transcription_wav(transcoder, &note.path).await?
    };

    let _permit = governor.acquire_transcription().await;
    stt.transcribe(&wav_path).await
}

async fn to_transcription_wav(transcoder: &Transcoder, path: &std::path::Path) -> EngineResult<PathBuf> {
    transcoder
        .to_mono_wav_for_transcription(path, HIGH_PASS_HZ)
        .await
        .ok_or_else(|| crate::error::EngineError::Transcode(format!("failed to convert {} to wav", path.display())))
}

fn concatenate_with_headers(segments: &[&Segment]) -> String {
    segments
        .iter()
        .enumerate()
        .map(|(i, segment)| format!("--- Message {} ---\n{}", i + 1, segment.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn split_on_word_boundaries(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate_len = current.chars().count() + word.chars().count() + 1;
        if candidate_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn strip_markup(text: &str) -> String {
    text.replace(['*', '_', '`'], "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_on_word_boundaries_respects_the_ceiling() {
        let text = "one two three four five six seven eight nine ten";
        let chunks = split_on_word_boundaries(text, 15);
        assert!(chunks.iter().all(|c| c.chars().count() <= 15));
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn split_on_word_boundaries_is_a_no_op_under_the_ceiling() {
        let text = "short text";
        assert_eq!(split_on_word_boundaries(text, 4096), vec![text.to_string()]);
    }

    #[test]
    fn concatenate_with_headers_preserves_order_and_labels() {
        let note = |id: i64| VoiceNote {
            message_id: id,
            chat_id: 1,
            user_id: 1,
            source_unique_id: format!("u{id}"),
            transport_file_id: format!("f{id}"),
            path: PathBuf::from("/tmp/x"),
            received_at: chrono::Utc::now(),
        };
        let s1 = Segment { note: note(1), text: "first".to_string() };
        let s2 = Segment { note: note(2), text: "second".to_string() };
        let combined = concatenate_with_headers(&[&s1, &s2]);
        assert!(combined.find("first").unwrap() < combined.find("second").unwrap());
        assert!(combined.contains("Message 1"));
        assert!(combined.contains("Message 2"));
    }
}
