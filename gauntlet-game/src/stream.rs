//! Pull-driven persona reply stream with one-shot recovery.
//!
//! [`ReplyStream`] yields text fragments as the backend produces them. If the
//! stream cannot be opened or breaks midway, it yields a short notice, asks
//! the backend once (non-streamed) to continue from the partial text, and
//! yields only the part of that continuation that was not already shown. A
//! second failure ends the stream with an apology. The iterator never errors.

use std::collections::VecDeque;
use std::mem;

use crate::backend::{BackendError, TextBackend, TokenStream};
use crate::constants::STITCH_SUFFIX_CHARS;
use crate::prompts::{TurnContext, recovery_prompt, reply_prompt};

pub const INTERRUPTION_NOTICE: &str =
    "\n\n*(Connection hiccup. Recovering the rest of the reply...)*\n\n";
pub const RECOVERY_APOLOGY: &str =
    "\n\n*(The line went dead before the investor finished. Please continue your pitch.)*";
pub const QUOTA_FILLER: &str = "\n\n*(The investor glances at a buzzing phone.) \"Sorry, back-to-back meetings today. Keep going, I'm listening.\"";
pub const SILENCE_NOTICE: &str = "*(The investor is silent. Please try again.)*";

/// The part of `recovered` that does not repeat `partial`.
///
/// Drops the whole partial when the continuation restates it. For partials
/// longer than the suffix window, also drops a restated trailing suffix.
#[must_use]
pub fn stitch_continuation<'r>(partial: &str, recovered: &'r str) -> &'r str {
    if let Some(rest) = recovered.strip_prefix(partial) {
        return rest;
    }
    let partial_chars = partial.chars().count();
    if partial_chars > STITCH_SUFFIX_CHARS {
        let skip = partial_chars - STITCH_SUFFIX_CHARS;
        let suffix = partial
            .char_indices()
            .nth(skip)
            .map_or("", |(idx, _)| &partial[idx..]);
        if let Some(rest) = recovered.strip_prefix(suffix) {
            return rest;
        }
    }
    recovered
}

enum Phase<'a> {
    Opening,
    Streaming(TokenStream<'a>),
    Recovering,
    Finished,
}

/// Lazy fragment sequence for one persona reply.
pub struct ReplyStream<'a, B: TextBackend + ?Sized> {
    backend: &'a B,
    prompt: String,
    phase: Phase<'a>,
    partial: String,
    queued: VecDeque<String>,
    recovered: bool,
}

impl<'a, B: TextBackend + ?Sized> ReplyStream<'a, B> {
    #[must_use]
    pub fn new(backend: &'a B, prompt: String) -> Self {
        Self {
            backend,
            prompt,
            phase: Phase::Opening,
            partial: String::new(),
            queued: VecDeque::new(),
            recovered: false,
        }
    }

    /// Model text emitted so far, excluding notices.
    #[must_use]
    pub fn partial(&self) -> &str {
        &self.partial
    }

    /// True once the recovery path has been taken.
    #[must_use]
    pub const fn recovered(&self) -> bool {
        self.recovered
    }

    fn interrupt(&mut self, err: &BackendError) {
        log::warn!("Reply stream interrupted after {} chars: {err}", self.partial.len());
        self.recovered = true;
        self.queued.push_back(INTERRUPTION_NOTICE.to_string());
        self.phase = Phase::Recovering;
    }

    fn recover(&mut self) {
        let prompt = recovery_prompt(&self.prompt, &self.partial);
        match self.backend.complete(&prompt) {
            Ok(text) => {
                let remainder = stitch_continuation(&self.partial, &text);
                if !remainder.trim().is_empty() {
                    self.partial.push_str(remainder);
                    self.queued.push_back(remainder.to_string());
                }
            }
            Err(err) => {
                log::warn!("Reply recovery failed: {err}");
                let closing = if err.is_rate_limited() {
                    QUOTA_FILLER
                } else {
                    RECOVERY_APOLOGY
                };
                self.queued.push_back(closing.to_string());
            }
        }
    }
}

impl<B: TextBackend + ?Sized> Iterator for ReplyStream<'_, B> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            if let Some(fragment) = self.queued.pop_front() {
                return Some(fragment);
            }
            match mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Opening => match self.backend.stream(&self.prompt) {
                    Ok(tokens) => self.phase = Phase::Streaming(tokens),
                    Err(err) => self.interrupt(&err),
                },
                Phase::Streaming(mut tokens) => match tokens.next() {
                    Some(Ok(fragment)) => {
                        self.phase = Phase::Streaming(tokens);
                        if !fragment.is_empty() {
                            self.partial.push_str(&fragment);
                            return Some(fragment);
                        }
                    }
                    Some(Err(err)) => self.interrupt(&err),
                    None => {}
                },
                Phase::Recovering => self.recover(),
                Phase::Finished => return None,
            }
        }
    }
}

/// Open a persona reply stream for one turn.
pub fn stream_reply<'a, B: TextBackend + ?Sized>(
    backend: &'a B,
    ctx: &TurnContext<'_>,
    user_text: &str,
) -> ReplyStream<'a, B> {
    ReplyStream::new(backend, reply_prompt(ctx, user_text))
}

/// Drain a reply stream, substituting the silence notice for a blank reply.
pub fn collect_reply<I, F>(fragments: I, mut on_fragment: F) -> String
where
    I: Iterator<Item = String>,
    F: FnMut(&str),
{
    let mut reply = String::new();
    for fragment in fragments {
        on_fragment(&fragment);
        reply.push_str(&fragment);
    }
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        SILENCE_NOTICE.to_string()
    } else {
        trimmed.to_string()
    }
}
