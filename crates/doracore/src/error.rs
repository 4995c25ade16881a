//! Centralized error types for the engine.
//!
//! Mirrors the source system's `AppError`/`DownloadError` split: a broad
//! `EngineError` for anything that crosses a component boundary, and a
//! narrow, structured `ExtractError` for the extractor facade's fallback
//! ladder (§4.C / §9 redesign flag — keyword scraping is a classifier of
//! last resort, not the primary error shape).

use thiserror::Error;

/// Top-level error type returned by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("url parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("transcoding failed: {0}")]
    Transcode(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("file exceeds the transport's 50 MB ceiling")]
    PayloadTooLarge,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("other: {0}")]
    Other(#[from] anyhow::Error),
}

#[cfg(feature = "telegram")]
impl From<teloxide::RequestError> for EngineError {
    fn from(err: teloxide::RequestError) -> Self {
        EngineError::Transport(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Validation(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Validation(s.to_string())
    }
}

impl EngineError {
    /// Category label used for metrics grouping, mirroring `AppError::category`.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Database(_) | EngineError::DatabasePool(_) => "database",
            EngineError::Http(_) => "http",
            EngineError::Io(_) => "io",
            EngineError::Url(_) => "url_parsing",
            EngineError::Extract(_) => "extract",
            EngineError::Transcode(_) => "transcode",
            EngineError::Transport(_) => "transport",
            EngineError::PayloadTooLarge => "payload_too_large",
            EngineError::Validation(_) => "validation",
            EngineError::Config(_) => "config",
            EngineError::Other(_) => "other",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Structured outcome of a failed extraction attempt (§4.C, §9).
///
/// The extractor ladder switches on these variants directly; `Generic`
/// carries the raw stderr/exception text, which keyword scraping may
/// reclassify into one of the named variants as a fallback classifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("rate limited by the source platform")]
    RateLimited,
    #[error("authentication required")]
    AuthRequired,
    #[error("no downloadable formats found")]
    NoFormats,
    #[error("url points to a photo post, not a video")]
    PhotoRedirect,
    #[error("extraction timed out")]
    Timeout,
    #[error("bot detection triggered")]
    BotDetected,
    #[error("extractor failed: {0}")]
    Generic(String),
}

impl ExtractError {
    /// Reclassify a generic error by scraping known keywords out of the
    /// underlying extractor's error text. Only ever invoked on `Generic`
    /// payloads — structured variants never need reclassification.
    pub fn classify_from_text(text: &str) -> ExtractError {
        let lower = text.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests") {
            ExtractError::RateLimited
        } else if lower.contains("login")
            || lower.contains("private")
            || lower.contains("unavailable")
            || lower.contains("403")
            || lower.contains("401")
            || lower.contains("cookie")
            || lower.contains("session")
        {
            ExtractError::AuthRequired
        } else if lower.contains("no formats") || lower.contains("unsupported url") {
            ExtractError::NoFormats
        } else if lower.contains("redirect") && lower.contains("photo") {
            ExtractError::PhotoRedirect
        } else if lower.contains("timed out") || lower.contains("timeout") {
            ExtractError::Timeout
        } else if lower.contains("confirm you're not a bot") || lower.contains("bot detection") {
            ExtractError::BotDetected
        } else {
            ExtractError::Generic(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_required_from_keywords() {
        assert_eq!(
            ExtractError::classify_from_text("HTTP Error 401: Unauthorized"),
            ExtractError::AuthRequired
        );
    }

    #[test]
    fn classifies_unavailable_as_auth_required() {
        assert_eq!(
            ExtractError::classify_from_text("This video is unavailable"),
            ExtractError::AuthRequired
        );
    }

    #[test]
    fn classifies_bot_detection() {
        assert_eq!(
            ExtractError::classify_from_text("Sign in to confirm you're not a bot"),
            ExtractError::BotDetected
        );
    }

    #[test]
    fn falls_back_to_generic() {
        assert_eq!(
            ExtractError::classify_from_text("disk full"),
            ExtractError::Generic("disk full".to_string())
        );
    }

    #[test]
    fn engine_error_category_covers_extract() {
        let err = EngineError::Extract(ExtractError::Timeout);
        assert_eq!(err.category(), "extract");
    }
}
