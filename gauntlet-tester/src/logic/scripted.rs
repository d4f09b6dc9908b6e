use gauntlet_game::{BackendError, TextBackend, TokenStream};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use std::cell::{Cell, RefCell};

const VALID_REPORT: &str = r#"```json
{
  "scores": {"confidence": 72, "technical_clarity": 64, "business_viability": 58, "resilience_under_pressure": 81},
  "strengths": ["Kept composure", "Concrete customer story", "Knew unit economics"],
  "weaknesses": ["Moat is thin", "Hiring plan is vague", "Pricing untested"],
  "next_actions": ["Run a paid pilot", "Map the top competitors", "Write the hiring plan"],
  "summary": "A steady run with a clear story. Tighten the moat before the next raise."
}
```"#;

const MALFORMED_REPORT: &str = r#"{"scores": {"confidence": "high"}, "strengths": ["Only one"]}"#;

const REPLIES: [&str; 6] = [
    "Interesting. ",
    "But who actually pays for this? ",
    "Walk me through the first ten customers. ",
    "And why now, dear? ",
    "What stops a bigger company from copying you? ",
    "Give me the number, not the story.",
];

/// Behaviour knobs for a [`ScriptedBackend`]. Rates are probabilities in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendProfile {
    pub pass_rate: f64,
    pub minor_rate: f64,
    pub major_rate: f64,
    pub stream_break_rate: f64,
    pub quota_rate: f64,
    pub malformed_report_rate: f64,
}

impl Default for BackendProfile {
    fn default() -> Self {
        Self {
            pass_rate: 0.45,
            minor_rate: 0.2,
            major_rate: 0.1,
            stream_break_rate: 0.0,
            quota_rate: 0.0,
            malformed_report_rate: 0.0,
        }
    }
}

impl BackendProfile {
    #[must_use]
    pub fn flawless() -> Self {
        Self {
            pass_rate: 1.0,
            minor_rate: 0.0,
            major_rate: 0.0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn hostile() -> Self {
        Self {
            pass_rate: 0.0,
            minor_rate: 0.0,
            major_rate: 1.0,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_stream_breaks(mut self, rate: f64) -> Self {
        self.stream_break_rate = rate;
        self
    }

    #[must_use]
    pub const fn with_quota(mut self, rate: f64) -> Self {
        self.quota_rate = rate;
        self
    }

    #[must_use]
    pub const fn with_malformed_reports(mut self, rate: f64) -> Self {
        self.malformed_report_rate = rate;
        self
    }
}

/// Call counters collected by a [`ScriptedBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub judgment_calls: usize,
    pub quota_errors: usize,
    pub streams_opened: usize,
    pub streams_broken: usize,
    pub continuations: usize,
    pub report_calls: usize,
    pub repair_calls: usize,
}

/// Deterministic stand-in for the generative backend, driven by a seeded RNG.
#[derive(Debug)]
pub struct ScriptedBackend {
    profile: BackendProfile,
    rng: RefCell<ChaCha8Rng>,
    stats: Cell<BackendStats>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new(profile: BackendProfile, seed: u64) -> Self {
        Self {
            profile,
            rng: RefCell::new(ChaCha8Rng::seed_from_u64(seed)),
            stats: Cell::new(BackendStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> BackendStats {
        self.stats.get()
    }

    fn bump(&self, update: impl FnOnce(&mut BackendStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    fn roll(&self, rate: f64) -> bool {
        rate > 0.0 && self.rng.borrow_mut().gen_bool(rate.min(1.0))
    }

    fn verdict(&self) -> String {
        let draw: f64 = self.rng.borrow_mut().r#gen();
        let p = self.profile;
        let (damage, passed, feedback) = if draw < p.pass_rate {
            (0, true, "That answer lands.")
        } else if draw < p.pass_rate + p.major_rate {
            (-20, false, "That sounded like a bluff.")
        } else if draw < p.pass_rate + p.major_rate + p.minor_rate {
            (-10, false, "Too vague.")
        } else {
            (0, false, "Keep going.")
        };
        json!({ "damage": damage, "level_passed": passed, "feedback": feedback }).to_string()
    }

    fn reply_fragments(&self) -> Vec<String> {
        let mut rng = self.rng.borrow_mut();
        let count = rng.gen_range(2..=4);
        (0..count)
            .map(|_| REPLIES[rng.gen_range(0..REPLIES.len())].to_string())
            .collect()
    }
}

impl TextBackend for ScriptedBackend {
    fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        if prompt.contains("required schema") {
            self.bump(|s| s.repair_calls += 1);
            return Ok(VALID_REPORT.to_string());
        }
        if prompt.contains("startup coach") {
            self.bump(|s| s.report_calls += 1);
            if self.roll(self.profile.malformed_report_rate) {
                return Ok(MALFORMED_REPORT.to_string());
            }
            return Ok(VALID_REPORT.to_string());
        }
        if prompt.contains("referee") {
            self.bump(|s| s.judgment_calls += 1);
            if self.roll(self.profile.quota_rate) {
                self.bump(|s| s.quota_errors += 1);
                return Err(BackendError::Status {
                    status: 429,
                    message: "RESOURCE_EXHAUSTED: quota exceeded".into(),
                });
            }
            return Ok(self.verdict());
        }
        self.bump(|s| s.continuations += 1);
        Ok("and that is where my doubts begin.".to_string())
    }

    fn stream<'a>(&'a self, _prompt: &str) -> Result<TokenStream<'a>, BackendError> {
        self.bump(|s| s.streams_opened += 1);
        let mut items: Vec<Result<String, BackendError>> =
            self.reply_fragments().into_iter().map(Ok).collect();
        if self.roll(self.profile.stream_break_rate) {
            self.bump(|s| s.streams_broken += 1);
            items.truncate(1);
            items.push(Err(BackendError::Stream("connection reset".into())));
        }
        Ok(Box::new(items.into_iter()))
    }

    fn transcribe(&self, audio: &[u8], _mime_type: &str) -> Result<String, BackendError> {
        if audio.is_empty() {
            return Err(BackendError::Empty);
        }
        Ok("We cut onboarding from weeks to minutes.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_script() {
        let a = ScriptedBackend::new(BackendProfile::default(), 7);
        let b = ScriptedBackend::new(BackendProfile::default(), 7);
        for _ in 0..5 {
            assert_eq!(
                a.complete("referee prompt").unwrap(),
                b.complete("referee prompt").unwrap()
            );
        }
        assert_eq!(a.stats().judgment_calls, 5);
    }

    #[test]
    fn quota_profile_rate_limits_judgments() {
        let backend = ScriptedBackend::new(BackendProfile::flawless().with_quota(1.0), 1);
        let err = backend.complete("You are the referee").unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(backend.stats().quota_errors, 1);
    }

    #[test]
    fn broken_streams_end_with_an_error() {
        let backend = ScriptedBackend::new(BackendProfile::default().with_stream_breaks(1.0), 3);
        let items: Vec<_> = backend.stream("pitch").unwrap().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert_eq!(backend.stats().streams_broken, 1);
    }
}
