//! Structured per-turn judgment with quota-aware retries.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::backend::{BackendError, TextBackend, strip_code_fence};
use crate::constants::{
    DAMAGE_MAJOR, DAMAGE_MINOR, DAMAGE_NONE, JUDGMENT_BACKOFF_MS, JUDGMENT_MAX_ATTEMPTS,
    POST_MORTEM_BACKOFF_MS, POST_MORTEM_MAX_ATTEMPTS,
};
use crate::numbers::coerce_i64;
use crate::prompts::{TurnContext, judgment_prompt};

pub const OVERLOAD_FEEDBACK: &str =
    "The investor panel is overloaded right now. No damage this round; try again in a moment.";

/// The referee's verdict for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnJudgment {
    pub damage: i32,
    pub level_passed: bool,
    pub feedback: String,
}

impl TurnJudgment {
    #[must_use]
    pub fn neutral(feedback: impl Into<String>) -> Self {
        Self {
            damage: DAMAGE_NONE,
            level_passed: false,
            feedback: feedback.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JudgmentError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object")]
    NotAnObject,
}

/// Fixed-backoff retry budget for quota-limited calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::judgment()
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn judgment() -> Self {
        Self {
            max_attempts: JUDGMENT_MAX_ATTEMPTS,
            backoff_ms: JUDGMENT_BACKOFF_MS,
        }
    }

    #[must_use]
    pub const fn post_mortem() -> Self {
        Self {
            max_attempts: POST_MORTEM_MAX_ATTEMPTS,
            backoff_ms: POST_MORTEM_BACKOFF_MS,
        }
    }

    /// Same attempt budget with no sleeping between attempts.
    #[must_use]
    pub const fn without_backoff(self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff_ms: 0,
        }
    }

    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub(crate) fn pause(&self) {
        if self.backoff_ms > 0 {
            std::thread::sleep(self.backoff());
        }
    }
}

/// Snap an integer damage value to the nearest allowed bucket.
#[must_use]
pub fn snap_damage(raw: i64) -> i32 {
    if raw < i64::from(DAMAGE_MINOR) {
        DAMAGE_MAJOR
    } else if raw < 0 {
        DAMAGE_MINOR
    } else {
        DAMAGE_NONE
    }
}

fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

/// Parse and clamp a raw judgment response.
///
/// # Errors
///
/// Returns an error when the text is not a JSON object after fence stripping.
pub fn parse_judgment(raw: &str) -> Result<TurnJudgment, JudgmentError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))?;
    let Value::Object(map) = value else {
        return Err(JudgmentError::NotAnObject);
    };

    let damage = map.get("damage").and_then(coerce_i64).unwrap_or(0);
    let level_passed = map.get("level_passed").is_some_and(coerce_bool);
    let feedback = match map.get("feedback") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    Ok(TurnJudgment {
        damage: snap_damage(damage),
        level_passed,
        feedback,
    })
}

/// Requests verdicts from the backend. Never fails.
#[derive(Debug, Clone)]
pub struct JudgmentService<B> {
    backend: B,
    policy: RetryPolicy,
}

impl<B: TextBackend> JudgmentService<B> {
    pub const fn new(backend: B, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn judge(&self, ctx: &TurnContext<'_>, user_text: &str) -> TurnJudgment {
        self.judge_prompt(&judgment_prompt(ctx, user_text))
    }

    /// Run a prebuilt judgment prompt through the retry policy.
    pub fn judge_prompt(&self, prompt: &str) -> TurnJudgment {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.backend.complete(prompt) {
                Ok(raw) => {
                    return parse_judgment(&raw).unwrap_or_else(|err| {
                        log::warn!("Discarding malformed judgment: {err}");
                        TurnJudgment::neutral(format!("Judgment error: {err}"))
                    });
                }
                Err(err) if err.is_rate_limited() => {
                    log::debug!("Judgment rate limited (attempt {attempt}/{attempts}): {err}");
                    if attempt < attempts {
                        self.policy.pause();
                    }
                }
                Err(err) => return backend_failure(&err),
            }
        }
        log::warn!("Judgment retries exhausted");
        TurnJudgment::neutral(OVERLOAD_FEEDBACK)
    }
}

fn backend_failure(err: &BackendError) -> TurnJudgment {
    log::warn!("Judgment request failed: {err}");
    TurnJudgment::neutral(format!("Judgment error: {err}"))
}
