//! End-of-run coaching report: strict validation, one repair re-prompt per
//! attempt, and normalization to a fully-shaped report.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::backend::{TextBackend, strip_code_fence};
use crate::constants::{DEFAULT_SCORE, REPORT_LIST_LEN};
use crate::judgment::RetryPolicy;
use crate::numbers::{coerce_i64, saturate_i32};
use crate::personas::Theme;
use crate::prompts::{post_mortem_prompt, repair_prompt};
use crate::session::{ChatTurn, Outcome};

const SCORE_KEYS: [&str; 4] = [
    "confidence",
    "technical_clarity",
    "business_viability",
    "resilience_under_pressure",
];

const STRENGTH_FILLER: [&str; REPORT_LIST_LEN] = [
    "Stayed engaged through every investor challenge.",
    "Showed willingness to take on hard questions.",
    "Kept the pitch anchored to a real customer problem.",
];
const WEAKNESS_FILLER: [&str; REPORT_LIST_LEN] = [
    "Key claims needed more concrete evidence.",
    "Some answers drifted from the investor's core concern.",
    "Risk mitigation was not articulated clearly.",
];
const NEXT_ACTION_FILLER: [&str; REPORT_LIST_LEN] = [
    "Write a one-line value proposition without jargon.",
    "Back each major claim with a metric or customer proof point.",
    "Rehearse answers to the toughest technical and financial questions.",
];
pub const DEFAULT_SUMMARY: &str = "A detailed analysis was not available for this run. \
     Review the transcript and focus on clear, evidence-backed answers.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportScores {
    pub confidence: i32,
    pub technical_clarity: i32,
    pub business_viability: i32,
    pub resilience_under_pressure: i32,
}

impl Default for ReportScores {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_SCORE,
            technical_clarity: DEFAULT_SCORE,
            business_viability: DEFAULT_SCORE,
            resilience_under_pressure: DEFAULT_SCORE,
        }
    }
}

impl ReportScores {
    fn set(&mut self, key: &str, value: i32) {
        match key {
            "confidence" => self.confidence = value,
            "technical_clarity" => self.technical_clarity = value,
            "business_viability" => self.business_viability = value,
            "resilience_under_pressure" => self.resilience_under_pressure = value,
            _ => {}
        }
    }
}

/// Coaching report shown at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMortemReport {
    pub scores: ReportScores,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub next_actions: Vec<String>,
    pub summary: String,
}

impl Default for PostMortemReport {
    fn default() -> Self {
        Self {
            scores: ReportScores::default(),
            strengths: filler(&STRENGTH_FILLER),
            weaknesses: filler(&WEAKNESS_FILLER),
            next_actions: filler(&NEXT_ACTION_FILLER),
            summary: DEFAULT_SUMMARY.to_string(),
        }
    }
}

fn filler(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Why a candidate report failed strict validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportIssue {
    #[error("output is not valid JSON: {0}")]
    NotJson(String),
    #[error("output must be a JSON object")]
    NotAnObject,
    #[error("\"scores\" must be an object")]
    MissingScores,
    #[error("score \"{0}\" must be an integer between 0 and 100")]
    BadScore(&'static str),
    #[error("\"{0}\" must be a list of exactly 3 non-empty strings")]
    BadList(&'static str),
    #[error("\"summary\" must be a non-empty string")]
    MissingSummary,
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, ReportIssue> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|err| ReportIssue::NotJson(err.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ReportIssue::NotAnObject),
    }
}

fn strict_list(map: &Map<String, Value>, key: &'static str) -> Result<Vec<String>, ReportIssue> {
    let Some(Value::Array(items)) = map.get(key) else {
        return Err(ReportIssue::BadList(key));
    };
    if items.len() != REPORT_LIST_LEN {
        return Err(ReportIssue::BadList(key));
    }
    items
        .iter()
        .map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            _ => Err(ReportIssue::BadList(key)),
        })
        .collect()
}

/// Check a candidate against the exact report shape.
///
/// # Errors
///
/// Returns the first shape violation found.
pub fn validate_report(map: &Map<String, Value>) -> Result<PostMortemReport, ReportIssue> {
    let Some(Value::Object(raw_scores)) = map.get("scores") else {
        return Err(ReportIssue::MissingScores);
    };
    let mut scores = ReportScores::default();
    for key in SCORE_KEYS {
        let value = raw_scores
            .get(key)
            .and_then(Value::as_i64)
            .filter(|v| (0..=100).contains(v))
            .ok_or(ReportIssue::BadScore(key))?;
        scores.set(key, saturate_i32(value));
    }

    let strengths = strict_list(map, "strengths")?;
    let weaknesses = strict_list(map, "weaknesses")?;
    let next_actions = strict_list(map, "next_actions")?;
    let summary = match map.get("summary") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return Err(ReportIssue::MissingSummary),
    };

    Ok(PostMortemReport {
        scores,
        strengths,
        weaknesses,
        next_actions,
        summary,
    })
}

fn loose_list(value: Option<&Value>, fill: &[&str]) -> Vec<String> {
    let mut items: Vec<String> = match value {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .take(REPORT_LIST_LEN)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };
    for candidate in fill {
        if items.len() >= REPORT_LIST_LEN {
            break;
        }
        if !items.iter().any(|existing| existing == candidate) {
            items.push((*candidate).to_string());
        }
    }
    items
}

/// Coerce any JSON object into a fully-shaped report.
///
/// Scores may live under `scores` or at the top level; missing scores take the
/// default, present ones are clamped. Lists are truncated or padded to three.
#[must_use]
pub fn normalize_report(map: &Map<String, Value>) -> PostMortemReport {
    let score_source = match map.get("scores") {
        Some(Value::Object(inner)) => inner,
        _ => map,
    };
    let mut scores = ReportScores::default();
    for key in SCORE_KEYS {
        if let Some(value) = score_source.get(key).and_then(coerce_i64) {
            scores.set(key, saturate_i32(value.clamp(0, 100)));
        }
    }

    let summary = match map.get("summary") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => DEFAULT_SUMMARY.to_string(),
    };

    PostMortemReport {
        scores,
        strengths: loose_list(map.get("strengths"), &STRENGTH_FILLER),
        weaknesses: loose_list(map.get("weaknesses"), &WEAKNESS_FILLER),
        next_actions: loose_list(map.get("next_actions"), &NEXT_ACTION_FILLER),
        summary,
    }
}

enum Attempt {
    Done(PostMortemReport),
    RateLimited,
}

/// Generates post-mortem reports. Never fails.
#[derive(Debug, Clone)]
pub struct PostMortemService<B> {
    backend: B,
    policy: RetryPolicy,
}

impl<B: TextBackend> PostMortemService<B> {
    pub const fn new(backend: B, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn analyze(
        &self,
        transcript: &[ChatTurn],
        theme: &Theme,
        outcome: Outcome,
        document_context: &str,
    ) -> PostMortemReport {
        let prompt = post_mortem_prompt(transcript, theme, outcome, document_context);
        let mut candidate: Option<Map<String, Value>> = None;
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.attempt(&prompt, &mut candidate) {
                Attempt::Done(report) => return report,
                Attempt::RateLimited => {
                    log::debug!("Post-mortem rate limited (attempt {attempt}/{attempts})");
                    if attempt < attempts {
                        self.policy.pause();
                    }
                }
            }
        }

        log::warn!("Post-mortem retries exhausted; using normalized fallback");
        candidate.map_or_else(PostMortemReport::default, |map| normalize_report(&map))
    }

    fn attempt(&self, prompt: &str, candidate: &mut Option<Map<String, Value>>) -> Attempt {
        let raw = match self.backend.complete(prompt) {
            Ok(raw) => raw,
            Err(err) if err.is_rate_limited() => return Attempt::RateLimited,
            Err(err) => {
                log::warn!("Post-mortem request failed: {err}");
                return Attempt::Done(fallback(candidate.take()));
            }
        };

        let issue = match parse_object(&raw) {
            Ok(map) => match validate_report(&map) {
                Ok(report) => return Attempt::Done(report),
                Err(issue) => {
                    *candidate = Some(map);
                    issue
                }
            },
            Err(issue) => issue,
        };

        log::debug!("Post-mortem failed validation ({issue}); requesting repair");
        match self.backend.complete(&repair_prompt(&raw, &issue.to_string())) {
            Ok(fixed) => match parse_object(&fixed) {
                Ok(map) => match validate_report(&map) {
                    Ok(report) => Attempt::Done(report),
                    Err(issue) => {
                        log::warn!("Repaired post-mortem still invalid: {issue}");
                        Attempt::Done(normalize_report(&map))
                    }
                },
                Err(_) => Attempt::Done(fallback(candidate.take())),
            },
            Err(err) if err.is_rate_limited() => Attempt::RateLimited,
            Err(err) => {
                log::warn!("Post-mortem repair failed: {err}");
                Attempt::Done(fallback(candidate.take()))
            }
        }
    }
}

fn fallback(candidate: Option<Map<String, Value>>) -> PostMortemReport {
    candidate.map_or_else(PostMortemReport::default, |map| normalize_report(&map))
}
