//! Crash/reload recovery through a client-local key-value store.
//!
//! The session is written as a versioned JSON envelope under one well-known
//! key. Restores validate the envelope shape, then apply fields one at a time
//! so a single bad field does not discard the whole run.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

use crate::constants::{
    MAX_HEALTH, MIN_HEALTH, RESTORE_MAX_ATTEMPTS, SNAPSHOT_STORAGE_KEY, SNAPSHOT_VERSION,
};
use crate::numbers::coerce_i64;
use crate::perks::{ActivePerks, PerkPick};
use crate::personas::GameContent;
use crate::session::{ChatTurn, Session, TerminalState, TurnLogEntry};
use crate::voice::VoiceState;

/// Result of a single store read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRead {
    Value(String),
    Missing,
    /// The backing store has not finished loading yet.
    NotReady,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage read failed: {0}")]
    Read(String),
    #[error("Storage write failed: {0}")]
    Write(String),
}

/// Client-local string store.
pub trait SnapshotStore {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, key: &str) -> Result<StoreRead, StoreError>;

    /// Overwrite the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be removed.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    values: Rc<RefCell<HashMap<String, String>>>,
    not_ready_reads: Rc<RefCell<u32>>,
}

impl MemorySnapshotStore {
    /// Report `NotReady` for the next `reads` reads.
    #[must_use]
    pub fn warming_up(reads: u32) -> Self {
        let store = Self::default();
        *store.not_ready_reads.borrow_mut() = reads;
        store
    }

    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, key: &str) -> Result<StoreRead, StoreError> {
        let mut pending = self.not_ready_reads.borrow_mut();
        if *pending > 0 {
            *pending -= 1;
            return Ok(StoreRead::NotReady);
        }
        Ok(self
            .values
            .borrow()
            .get(key)
            .map_or(StoreRead::Missing, |v| StoreRead::Value(v.clone())))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.values.borrow_mut().remove(key);
        Ok(())
    }
}

/// UI-side state carried alongside the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxState {
    #[serde(flatten)]
    pub voice: VoiceState,
    pub previous_hp_for_ui: i32,
    pub victory_audio_played: bool,
}

impl Default for AuxState {
    fn default() -> Self {
        Self {
            voice: VoiceState::default(),
            previous_hp_for_ui: crate::constants::MAX_HEALTH,
            victory_audio_played: false,
        }
    }
}

/// Persisted projection of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub snapshot_version: u32,
    pub saved_at_epoch: i64,
    pub current_hp: i32,
    pub current_level: u8,
    pub chat_history: Vec<ChatTurn>,
    pub full_chat_history: Vec<ChatTurn>,
    pub game_over: bool,
    pub victory: bool,
    pub startup_theme: String,
    pub game_started: bool,
    pub awaiting_perk_selection: bool,
    pub pending_next_level: Option<u8>,
    pub active_perks: ActivePerks,
    pub perk_history: Vec<PerkPick>,
    pub player_handle: String,
    pub clan_name: String,
    pub turn_damage_log: Vec<TurnLogEntry>,
    pub max_level_reached: u8,
    pub final_valuation_usd: i64,
    #[serde(flatten)]
    pub aux: AuxState,
}

impl SessionSnapshot {
    #[must_use]
    pub fn capture(session: &Session, aux: &AuxState, saved_at_epoch: i64) -> Self {
        Self {
            snapshot_version: SNAPSHOT_VERSION,
            saved_at_epoch,
            current_hp: session.health,
            current_level: session.level,
            chat_history: session.history.clone(),
            full_chat_history: session.transcript.clone(),
            game_over: session.terminal == TerminalState::Defeated,
            victory: session.terminal == TerminalState::Victorious,
            startup_theme: session.theme.clone(),
            game_started: session.started,
            awaiting_perk_selection: session.awaiting_perk_selection,
            pending_next_level: session.pending_next_level,
            active_perks: session.active_perks,
            perk_history: session.perk_history.clone(),
            player_handle: session.player_handle.clone(),
            clan_name: session.clan_name.clone(),
            turn_damage_log: session.turn_log.clone(),
            max_level_reached: session.max_level_reached,
            final_valuation_usd: session.final_valuation_usd,
            aux: aux.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestoreOutcome {
    Restored,
    NoSnapshot,
    InvalidPayload,
    StorageUnavailable,
    /// The store was not ready; call again.
    Pending,
    SkippedActiveSession,
    AlreadyDecided,
}

impl RestoreOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restored => "restored",
            Self::NoSnapshot => "no-snapshot",
            Self::InvalidPayload => "invalid-payload",
            Self::StorageUnavailable => "storage-unavailable",
            Self::Pending => "pending",
            Self::SkippedActiveSession => "active-session-present",
            Self::AlreadyDecided => "already-decided",
        }
    }
}

impl fmt::Display for RestoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn validate_envelope(value: Value) -> Option<Map<String, Value>> {
    let Value::Object(map) = value else {
        return None;
    };
    if !map.contains_key("current_hp") {
        return None;
    }
    if !matches!(map.get("chat_history"), Some(Value::Array(_))) {
        return None;
    }
    let version = map.get("snapshot_version").and_then(coerce_i64)?;
    (version == i64::from(SNAPSHOT_VERSION)).then_some(map)
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Option<T> {
    let value = map.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            log::debug!("Skipping snapshot field {key}: {err}");
            None
        }
    }
}

/// Copy same-named envelope keys onto struct fields, skipping undecodable ones.
macro_rules! restore_fields {
    ($map:expr, $target:expr, $($name:ident),+ $(,)?) => {
        $(
            if let Some(value) = field($map, stringify!($name)) {
                $target.$name = value;
            }
        )+
    };
}

fn apply_envelope(
    map: &Map<String, Value>,
    content: &GameContent,
    session: &mut Session,
    aux: &mut AuxState,
) {
    if let Some(hp) = map.get("current_hp").and_then(coerce_i64) {
        let hp = hp.clamp(i64::from(MIN_HEALTH), i64::from(MAX_HEALTH));
        session.health = i32::try_from(hp).unwrap_or(MIN_HEALTH);
    }
    if let Some(v) = field(map, "current_level") {
        session.level = v;
    }
    if let Some(v) = field(map, "chat_history") {
        session.history = v;
    }
    if let Some(v) = field(map, "full_chat_history") {
        session.transcript = v;
    }
    let game_over: bool = field(map, "game_over").unwrap_or(false);
    let victory: bool = field(map, "victory").unwrap_or(false);
    session.terminal = if game_over {
        TerminalState::Defeated
    } else if victory {
        TerminalState::Victorious
    } else {
        TerminalState::InProgress
    };
    if let Some(theme) = field::<String>(map, "startup_theme") {
        session.theme = content.theme_or_default(&theme).name.clone();
    }
    if let Some(v) = field(map, "game_started") {
        session.started = v;
    }
    if let Some(v) = field(map, "awaiting_perk_selection") {
        session.awaiting_perk_selection = v;
    }
    if let Some(v) = field(map, "pending_next_level") {
        session.pending_next_level = v;
    }
    if let Some(v) = field(map, "active_perks") {
        session.active_perks = v;
    }
    if let Some(v) = field(map, "perk_history") {
        session.perk_history = v;
    }
    if let Some(v) = field(map, "player_handle") {
        session.player_handle = v;
    }
    if let Some(v) = field(map, "clan_name") {
        session.clan_name = v;
    }
    if let Some(v) = field(map, "turn_damage_log") {
        session.turn_log = v;
    }
    if let Some(v) = field(map, "max_level_reached") {
        session.max_level_reached = v;
    }
    if let Some(v) = field(map, "final_valuation_usd") {
        session.final_valuation_usd = v;
    }
    restore_fields!(map, aux, previous_hp_for_ui, victory_audio_played);
    restore_fields!(
        map,
        aux.voice,
        pending_voice_text,
        last_voice_transcript,
        voice_mic_locked,
        voice_mode_active,
        voice_recording,
        voice_recorder_open,
        voice_double_click_deadline,
        voice_lock_prompt,
        voice_last_audio_hash,
        voice_audio_nonce,
    );

    session.reset_transients();
    if session.history.is_empty() && !session.is_terminal() && !session.awaiting_perk_selection {
        session.ensure_intro(content);
    }
}

/// Save/restore/clear against an optional client-local store.
#[derive(Debug)]
pub struct SnapshotRecovery<S> {
    store: Option<S>,
    max_attempts: u32,
    attempts: u32,
    decided: Option<RestoreOutcome>,
}

impl<S: SnapshotStore> SnapshotRecovery<S> {
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self {
            store: Some(store),
            max_attempts: RESTORE_MAX_ATTEMPTS,
            attempts: 0,
            decided: None,
        }
    }

    /// Recovery with no backing store; every operation is a no-op.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            store: None,
            max_attempts: RESTORE_MAX_ATTEMPTS,
            attempts: 0,
            decided: None,
        }
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.store.is_some()
    }

    #[must_use]
    pub const fn store(&self) -> Option<&S> {
        self.store.as_ref()
    }

    /// Terminal decision reached by [`Self::restore`], if any.
    #[must_use]
    pub const fn decision(&self) -> Option<RestoreOutcome> {
        self.decided
    }

    /// Write the current session. Returns `false` when nothing was saved.
    pub fn save(&self, session: &Session, aux: &AuxState) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let snapshot = SessionSnapshot::capture(session, aux, chrono::Utc::now().timestamp());
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("Snapshot serialization failed: {err}");
                return false;
            }
        };
        match store.set(SNAPSHOT_STORAGE_KEY, &payload) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Snapshot save failed: {err}");
                false
            }
        }
    }

    pub fn clear(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.delete(SNAPSHOT_STORAGE_KEY) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("Snapshot clear failed: {err}");
                false
            }
        }
    }

    /// Allow a new restore decision, e.g. after a restart.
    pub fn rearm(&mut self) {
        self.attempts = 0;
        self.decided = None;
    }

    fn decide(&mut self, outcome: RestoreOutcome) -> RestoreOutcome {
        log::debug!("Snapshot restore decided: {outcome}");
        self.decided = Some(outcome);
        outcome
    }

    /// One restore step. Returns [`RestoreOutcome::Pending`] while the store
    /// is not ready and read attempts remain.
    pub fn restore(
        &mut self,
        content: &GameContent,
        session: &mut Session,
        aux: &mut AuxState,
    ) -> RestoreOutcome {
        if self.decided.is_some() {
            return RestoreOutcome::AlreadyDecided;
        }
        if session.is_live() {
            return self.decide(RestoreOutcome::SkippedActiveSession);
        }
        let Some(store) = &self.store else {
            return self.decide(RestoreOutcome::StorageUnavailable);
        };

        let read = store.get(SNAPSHOT_STORAGE_KEY);
        self.attempts += 1;
        let raw = match read {
            Ok(StoreRead::Value(raw)) => raw,
            Ok(StoreRead::Missing) => return self.decide(RestoreOutcome::NoSnapshot),
            Ok(StoreRead::NotReady) => {
                if self.attempts >= self.max_attempts {
                    return self.decide(RestoreOutcome::NoSnapshot);
                }
                return RestoreOutcome::Pending;
            }
            Err(err) => {
                log::warn!("Snapshot read failed: {err}");
                return self.decide(RestoreOutcome::StorageUnavailable);
            }
        };

        if matches!(raw.trim(), "" | "null" | "None") {
            return self.decide(RestoreOutcome::NoSnapshot);
        }
        let Some(map) = serde_json::from_str::<Value>(&raw)
            .ok()
            .and_then(validate_envelope)
        else {
            return self.decide(RestoreOutcome::InvalidPayload);
        };

        apply_envelope(&map, content, session, aux);
        self.decide(RestoreOutcome::Restored)
    }

    /// Drive [`Self::restore`] until it reaches a decision.
    pub fn restore_until_decided(
        &mut self,
        content: &GameContent,
        session: &mut Session,
        aux: &mut AuxState,
    ) -> RestoreOutcome {
        loop {
            match self.restore(content, session, aux) {
                RestoreOutcome::Pending => {}
                outcome => return outcome,
            }
        }
    }
}
