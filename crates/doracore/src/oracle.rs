//! External speech-to-text and summary oracles (§4.I). The engine treats
//! both as opaque HTTP services behind a trait so tests can stub them;
//! `HttpSttOracle`/`HttpSummaryOracle` are the production adapters.

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult};

/// Transcribes one 16kHz mono PCM WAV file to text. Empty results are kept
/// (not errors) — the caller decides whether to exclude them downstream.
#[async_trait]
pub trait SttOracle: Send + Sync {
    async fn transcribe(&self, wav_path: &std::path::Path) -> EngineResult<String>;
}

/// Produces a condensed summary of one or more concatenated transcripts.
#[async_trait]
pub trait SummaryOracle: Send + Sync {
    async fn summarize(&self, text: &str) -> EngineResult<String>;
}

/// Speech-to-text over a generic "upload audio, get text back" HTTP endpoint
/// (an OpenAI-compatible `/audio/transcriptions` shape).
pub struct HttpSttOracle {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSttOracle {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self { client: reqwest::Client::new(), endpoint, api_key }
    }
}

#[async_trait]
impl SttOracle for HttpSttOracle {
    async fn transcribe(&self, wav_path: &std::path::Path) -> EngineResult<String> {
        let bytes = tokio::fs::read(wav_path).await?;
        let file_name = wav_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "audio.wav".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name).mime_str("audio/wav").map_err(|e| EngineError::Other(e.into()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Transport(format!("STT oracle returned {status}: {body}")));
        }

        #[derive(serde::Deserialize)]
        struct TranscriptionResponse {
            #[serde(default)]
            text: String,
        }

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed.text)
    }
}

/// Summary generation over an OpenAI-compatible chat-completions endpoint.
pub struct HttpSummaryOracle {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl HttpSummaryOracle {
    pub fn new(endpoint: String, api_key: String, model: String, system_prompt: String) -> Self {
        Self { client: reqwest::Client::new(), endpoint, api_key, model, system_prompt }
    }
}

#[async_trait]
impl SummaryOracle for HttpSummaryOracle {
    async fn summarize(&self, text: &str) -> EngineResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": text},
            ],
        });

        let response = self.client.post(&self.endpoint).bearer_auth(&self.api_key).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            return Err(EngineError::Transport(format!("summary oracle returned {status}: {error_body}")));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| EngineError::Transport("summary oracle returned no choices".to_string()))
    }
}

#[derive(serde::Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(serde::Deserialize)]
struct ChatMessage {
    content: String,
}
