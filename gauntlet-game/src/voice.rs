//! Voice drafts: transcribed audio waiting to be edited and sent.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use crate::backend::TextBackend;

const DEFAULT_AUDIO_MIME: &str = "audio/wav";

pub const PROMPT_DRAFT_READY: &str = "Voice draft ready. Edit and send.";
pub const PROMPT_TRANSCRIPTION_FAILED: &str = "Transcription failed. Record again.";
pub const PROMPT_DRAFT_DISCARDED: &str = "Voice draft discarded.";

/// Voice capture state carried in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VoiceState {
    pub pending_voice_text: String,
    pub last_voice_transcript: String,
    pub voice_mic_locked: bool,
    pub voice_mode_active: bool,
    pub voice_recording: bool,
    pub voice_recorder_open: bool,
    pub voice_double_click_deadline: f64,
    pub voice_lock_prompt: String,
    pub voice_last_audio_hash: String,
    pub voice_audio_nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioOutcome {
    /// Empty audio or the same recording seen last time.
    Ignored,
    Drafted(String),
    Failed,
}

/// Hex SHA-256 of an audio clip.
#[must_use]
pub fn audio_digest(audio: &[u8]) -> String {
    let digest = Sha256::digest(audio);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

impl VoiceState {
    /// Transcribe a freshly recorded clip into the pending draft.
    pub fn accept_audio<B: TextBackend + ?Sized>(
        &mut self,
        backend: &B,
        audio: &[u8],
        mime_type: &str,
    ) -> AudioOutcome {
        if audio.is_empty() {
            return AudioOutcome::Ignored;
        }
        let digest = audio_digest(audio);
        if digest == self.voice_last_audio_hash {
            return AudioOutcome::Ignored;
        }
        self.voice_last_audio_hash = digest;

        let mime_type = if mime_type.trim().is_empty() {
            DEFAULT_AUDIO_MIME
        } else {
            mime_type
        };
        let transcript = match backend.transcribe(audio, mime_type) {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                log::warn!("Transcription failed: {err}");
                String::new()
            }
        };
        self.voice_audio_nonce = self.voice_audio_nonce.saturating_add(1);

        if transcript.is_empty() {
            self.voice_lock_prompt = PROMPT_TRANSCRIPTION_FAILED.to_string();
            return AudioOutcome::Failed;
        }
        self.last_voice_transcript.clone_from(&transcript);
        self.pending_voice_text.clone_from(&transcript);
        self.voice_lock_prompt = PROMPT_DRAFT_READY.to_string();
        if !self.voice_mic_locked {
            self.voice_recorder_open = false;
        }
        AudioOutcome::Drafted(transcript)
    }

    /// Take the (possibly edited) draft for submission.
    pub fn take_draft(&mut self, edited: Option<&str>) -> Option<String> {
        let draft = edited
            .map_or_else(|| self.pending_voice_text.clone(), str::to_string)
            .trim()
            .to_string();
        if draft.is_empty() {
            return None;
        }
        self.last_voice_transcript.clone_from(&draft);
        self.pending_voice_text.clear();
        if !self.voice_mic_locked {
            self.voice_recorder_open = false;
        }
        Some(draft)
    }

    pub fn discard_draft(&mut self) {
        self.pending_voice_text.clear();
        self.voice_lock_prompt = PROMPT_DRAFT_DISCARDED.to_string();
    }

    #[must_use]
    pub fn has_draft(&self) -> bool {
        !self.pending_voice_text.trim().is_empty()
    }
}
