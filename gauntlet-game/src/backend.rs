//! Text-generation backend interface.
//!
//! The engine treats the generative backend as an opaque capability with three
//! operations: a blocking completion, a token stream, and audio transcription.
//! Platform crates provide the concrete transport.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static QUOTA_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)(\b429\b|quota|rate[ _-]?limit|resource[ _-]?exhausted|too many requests)")
        .ok()
});

/// Failures surfaced by a [`TextBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Transport(String),
    #[error("Backend returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Backend stream interrupted: {0}")]
    Stream(String),
    #[error("Backend returned no text")]
    Empty,
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// True when the error description carries a rate-limit or quota signal.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        is_quota_message(&self.to_string())
    }
}

/// Pattern-match an error description for rate-limit/quota indicators.
#[must_use]
pub fn is_quota_message(message: &str) -> bool {
    QUOTA_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(message))
}

/// Incremental text fragments produced by a streamed completion.
pub type TokenStream<'a> = Box<dyn Iterator<Item = Result<String, BackendError>> + 'a>;

/// Generative text capability consumed by the engine.
pub trait TextBackend {
    /// Run a single blocking completion.
    ///
    /// # Errors
    ///
    /// Returns an error when the request fails or yields no text.
    fn complete(&self, prompt: &str) -> Result<String, BackendError>;

    /// Open a token stream for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream cannot be opened. Failures after the
    /// stream opened are reported as `Err` items of the iterator.
    fn stream<'a>(&'a self, prompt: &str) -> Result<TokenStream<'a>, BackendError>;

    /// Transcribe recorded audio into plain text.
    ///
    /// # Errors
    ///
    /// Returns an error when transcription fails.
    fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, BackendError>;
}

impl<T: TextBackend + ?Sized> TextBackend for &T {
    fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        (**self).complete(prompt)
    }

    fn stream<'a>(&'a self, prompt: &str) -> Result<TokenStream<'a>, BackendError> {
        (**self).stream(prompt)
    }

    fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, BackendError> {
        (**self).transcribe(audio, mime_type)
    }
}

/// Remove an optional Markdown code fence (with or without a `json` tag).
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split("```").next().unwrap_or(rest);
    let body = body.strip_prefix("json").unwrap_or(body);
    body.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tagged_and_bare_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn quota_detection_matches_common_signals() {
        let limited = BackendError::Status {
            status: 429,
            message: "RESOURCE_EXHAUSTED: slow down".into(),
        };
        assert!(limited.is_rate_limited());
        assert!(BackendError::Transport("Quota exceeded for model".into()).is_rate_limited());
        assert!(is_quota_message("rate limit hit"));
        assert!(!BackendError::Transport("connection reset".into()).is_rate_limited());
        assert!(!BackendError::Empty.is_rate_limited());
    }

    #[test]
    fn quota_pattern_compiles() {
        assert!(QUOTA_PATTERN.is_some());
        assert!(is_quota_message("HTTP 429 Too Many Requests"));
        assert!(!is_quota_message("status 4290"));
    }
}
