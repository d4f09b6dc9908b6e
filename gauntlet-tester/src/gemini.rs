//! Gemini REST transport for the engine's [`TextBackend`].
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use gauntlet_game::{BackendError, TextBackend, TokenStream};
use serde_json::{Value, json};
use std::io::{BufRead, BufReader};
use std::time::Duration;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const TRANSCRIBE_INSTRUCTION: &str = "Transcribe this audio accurately. Return only the spoken words as plain text.";

pub struct GeminiBackend {
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl GeminiBackend {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{API_BASE}/{}:{method}", self.model)
    }

    fn post(&self, url: &str, body: &Value) -> Result<reqwest::blocking::Response, BackendError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            message: api_error_message(&message),
        })
    }

    fn generate(&self, parts: Value) -> Result<String, BackendError> {
        let body = json!({ "contents": [{ "role": "user", "parts": parts }] });
        let response = self.post(&self.url("generateContent"), &body)?;
        let payload: Value = response
            .json()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let text = candidate_text(&payload);
        if text.trim().is_empty() {
            return Err(BackendError::Empty);
        }
        Ok(text)
    }
}

/// Concatenated text parts of the first candidate.
pub fn candidate_text(payload: &Value) -> String {
    payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// `status: message` from a Google API error body, or the raw body.
fn api_error_message(body: &str) -> String {
    let Ok(payload) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    let error = payload.get("error").unwrap_or(&payload);
    let status = error.get("status").and_then(Value::as_str).unwrap_or("");
    let message = error.get("message").and_then(Value::as_str).unwrap_or("");
    match (status, message) {
        ("", "") => body.trim().to_string(),
        ("", message) => message.to_string(),
        (status, message) => format!("{status}: {message}"),
    }
}

/// Parse one server-sent-events line into a text fragment.
pub fn sse_fragment(line: &str) -> Option<Result<String, BackendError>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let payload: Value = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(err) => return Some(Err(BackendError::Stream(err.to_string()))),
    };
    if let Some(error) = payload.get("error") {
        return Some(Err(BackendError::Stream(error.to_string())));
    }
    Some(Ok(candidate_text(&payload)))
}

impl TextBackend for GeminiBackend {
    fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        self.generate(json!([{ "text": prompt }]))
    }

    fn stream<'a>(&'a self, prompt: &str) -> Result<TokenStream<'a>, BackendError> {
        let body = json!({ "contents": [{ "role": "user", "parts": [{ "text": prompt }] }] });
        let url = format!("{}?alt=sse", self.url("streamGenerateContent"));
        let response = self.post(&url, &body)?;
        let lines = BufReader::new(response).lines();
        Ok(Box::new(lines.filter_map(|line| match line {
            Ok(line) => sse_fragment(&line),
            Err(err) => Some(Err(BackendError::Stream(err.to_string()))),
        })))
    }

    fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, BackendError> {
        let parts = json!([
            { "text": TRANSCRIBE_INSTRUCTION },
            { "inline_data": { "mime_type": mime_type, "data": STANDARD.encode(audio) } }
        ]);
        self.generate(parts).map(|text| text.trim().to_string())
    }
}
