//! Run-scoped session state and the event-driven state machine over it.
//!
//! Every mutation goes through [`Session::apply`]: an [`Event`] is checked
//! against the current state and turn phase, applied, and answered with the
//! [`Effect`]s the driver has to carry out (stream a reply, request a
//! judgment, persist or clear the snapshot, generate a post-mortem).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::constants::{DEFAULT_THEME, FINAL_LEVEL, FIRST_LEVEL, MAX_HEALTH, MIN_HEALTH};
use crate::judgment::TurnJudgment;
use crate::perks::{ActivePerks, PerkKind, PerkPick};
use crate::personas::{GameContent, Persona};
use crate::postmortem::PostMortemReport;
use crate::retrieval::cap_document;
use crate::stream::SILENCE_NOTICE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
    System,
}

impl Speaker {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
            Self::System => "system",
        }
    }
}

/// One line of conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(rename = "role")]
    pub speaker: Speaker,
    #[serde(rename = "content")]
    pub text: String,
}

impl ChatTurn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnLogEntry {
    pub turn: u32,
    pub level: u8,
    pub raw_damage: i32,
    pub effective_damage: i32,
    pub hp_after: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    #[default]
    InProgress,
    Defeated,
    Victorious,
}

impl TerminalState {
    #[must_use]
    pub const fn outcome(self) -> Option<Outcome> {
        match self {
            Self::InProgress => None,
            Self::Defeated => Some(Outcome::GameOver),
            Self::Victorious => Some(Outcome::Victory),
        }
    }
}

/// Terminal tag used for post-mortems and run records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Victory,
    GameOver,
}

impl Outcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Victory => "victory",
            Self::GameOver => "game_over",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    AwaitingReply,
    AwaitingJudgment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Submit(String),
    ReplyFinished(String),
    JudgmentReady(TurnJudgment),
    ChoosePerk(PerkKind),
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StreamReply { user_text: String },
    RequestJudgment { user_text: String },
    PersistSnapshot,
    ClearSnapshot,
    GeneratePostMortem(Outcome),
    /// Short user-facing message (damage taken, perk notes, level complete).
    Notify(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("The run is over; restart to play again")]
    RunOver,
    #[error("Choose a perk before continuing")]
    AwaitingPerk,
    #[error("No perk selection is pending")]
    NoPerkPending,
    #[error("Event not valid during {0:?}")]
    WrongPhase(TurnPhase),
    #[error("Submission is empty")]
    EmptyInput,
    #[error("Theme cannot change during a live run")]
    RunInProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedReport {
    pub outcome: Outcome,
    pub report: PostMortemReport,
}

/// The single mutable run.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub(crate) health: i32,
    pub(crate) level: u8,
    pub(crate) history: Vec<ChatTurn>,
    pub(crate) transcript: Vec<ChatTurn>,
    pub(crate) active_perks: ActivePerks,
    pub(crate) perk_history: Vec<PerkPick>,
    pub(crate) turn_log: Vec<TurnLogEntry>,
    pub(crate) terminal: TerminalState,
    pub(crate) awaiting_perk_selection: bool,
    pub(crate) pending_next_level: Option<u8>,
    pub(crate) max_level_reached: u8,
    pub(crate) theme: String,
    pub(crate) started: bool,
    pub(crate) player_handle: String,
    pub(crate) clan_name: String,
    pub(crate) final_valuation_usd: i64,
    pub(crate) result_persisted: bool,
    post_mortem: Option<CachedReport>,
    document_text: String,
    phase: TurnPhase,
    pending_user_text: Option<String>,
    pending_reply: Option<String>,
}

impl Session {
    /// Fresh run at level 1 with the level intro already in the history.
    #[must_use]
    pub fn new(content: &GameContent, theme: &str) -> Self {
        let mut session = Self {
            health: MAX_HEALTH,
            level: FIRST_LEVEL,
            history: Vec::new(),
            transcript: Vec::new(),
            active_perks: ActivePerks::default(),
            perk_history: Vec::new(),
            turn_log: Vec::new(),
            terminal: TerminalState::InProgress,
            awaiting_perk_selection: false,
            pending_next_level: None,
            max_level_reached: FIRST_LEVEL,
            theme: content.theme_or_default(theme).name.clone(),
            started: false,
            player_handle: String::new(),
            clan_name: String::new(),
            final_valuation_usd: 0,
            result_persisted: false,
            post_mortem: None,
            document_text: String::new(),
            phase: TurnPhase::Idle,
            pending_user_text: None,
            pending_reply: None,
        };
        session.ensure_intro(content);
        session
    }

    #[must_use]
    pub fn with_default_theme(content: &GameContent) -> Self {
        Self::new(content, DEFAULT_THEME)
    }

    #[must_use]
    pub const fn health(&self) -> i32 {
        self.health
    }

    #[must_use]
    pub const fn level(&self) -> u8 {
        self.level
    }

    #[must_use]
    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    #[must_use]
    pub fn transcript(&self) -> &[ChatTurn] {
        &self.transcript
    }

    #[must_use]
    pub const fn active_perks(&self) -> &ActivePerks {
        &self.active_perks
    }

    #[must_use]
    pub fn perk_history(&self) -> &[PerkPick] {
        &self.perk_history
    }

    #[must_use]
    pub fn turn_log(&self) -> &[TurnLogEntry] {
        &self.turn_log
    }

    #[must_use]
    pub const fn terminal(&self) -> TerminalState {
        self.terminal
    }

    #[must_use]
    pub const fn awaiting_perk_selection(&self) -> bool {
        self.awaiting_perk_selection
    }

    #[must_use]
    pub const fn pending_next_level(&self) -> Option<u8> {
        self.pending_next_level
    }

    #[must_use]
    pub const fn max_level_reached(&self) -> u8 {
        self.max_level_reached
    }

    #[must_use]
    pub fn theme(&self) -> &str {
        &self.theme
    }

    #[must_use]
    pub const fn started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub fn player_handle(&self) -> &str {
        &self.player_handle
    }

    #[must_use]
    pub fn clan_name(&self) -> &str {
        &self.clan_name
    }

    #[must_use]
    pub const fn final_valuation_usd(&self) -> i64 {
        self.final_valuation_usd
    }

    #[must_use]
    pub const fn result_persisted(&self) -> bool {
        self.result_persisted
    }

    #[must_use]
    pub fn document_text(&self) -> &str {
        &self.document_text
    }

    #[must_use]
    pub fn has_document(&self) -> bool {
        !self.document_text.trim().is_empty()
    }

    #[must_use]
    pub const fn phase(&self) -> TurnPhase {
        self.phase
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self.terminal, TerminalState::InProgress)
    }

    /// A run the player is actively engaged in; restores never overwrite it.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.started || self.history.iter().any(|t| t.speaker == Speaker::User)
    }

    pub fn set_identity(&mut self, player_handle: &str, clan_name: &str) {
        self.player_handle = player_handle.trim().to_string();
        self.clan_name = clan_name.trim().to_string();
    }

    /// Switch the startup theme before the first submission.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RunInProgress`] once the run has started.
    pub fn set_theme(&mut self, content: &GameContent, theme: &str) -> Result<(), SessionError> {
        if self.started && !self.is_terminal() {
            return Err(SessionError::RunInProgress);
        }
        self.theme = content.theme_or_default(theme).name.clone();
        if !self.started {
            self.history.clear();
            self.transcript.clear();
            self.ensure_intro(content);
        }
        Ok(())
    }

    /// Attach (or clear, with an empty string) the uploaded founder document.
    pub fn set_document(&mut self, text: &str) {
        self.document_text = cap_document(text).to_string();
    }

    /// History handed to the judge: the level history plus the pending reply.
    #[must_use]
    pub fn judgment_history(&self) -> Vec<ChatTurn> {
        let mut turns = self.history.clone();
        if let Some(reply) = &self.pending_reply {
            turns.push(ChatTurn::new(Speaker::Ai, reply.clone()));
        }
        turns
    }

    #[must_use]
    pub fn cached_report(&self, outcome: Outcome) -> Option<&PostMortemReport> {
        self.post_mortem
            .as_ref()
            .filter(|cached| cached.outcome == outcome)
            .map(|cached| &cached.report)
    }

    pub fn store_report(&mut self, outcome: Outcome, report: PostMortemReport) {
        self.post_mortem = Some(CachedReport { outcome, report });
    }

    /// Record the run valuation once, on victory only.
    pub fn record_valuation(&mut self, valuation_usd: i64) {
        if self.terminal == TerminalState::Victorious && self.final_valuation_usd <= 0 {
            self.final_valuation_usd = valuation_usd.max(0);
        }
    }

    pub fn mark_result_persisted(&mut self) {
        self.result_persisted = true;
    }

    fn persona<'c>(&self, content: &'c GameContent) -> Option<&'c Persona> {
        content.persona(self.level)
    }

    pub(crate) fn ensure_intro(&mut self, content: &GameContent) {
        if !self.history.is_empty() {
            return;
        }
        let role = self
            .persona(content)
            .map_or("The investor", |p| p.role.as_str());
        let deck_status = if self.has_document() {
            "Deck mode: enabled (cross-referencing your uploaded plan)."
        } else {
            "Deck mode: disabled (no uploaded document)."
        };
        let intro = ChatTurn::new(
            Speaker::Ai,
            format!(
                "*(Level {} Start)*\n\n**{role}** looks at you.\n\nTheme focus: **{}**\n\n{deck_status}",
                self.level, self.theme
            ),
        );
        self.history.push(intro.clone());
        self.transcript.push(intro);
    }

    fn push_turn(&mut self, turn: ChatTurn) {
        self.history.push(turn.clone());
        self.transcript.push(turn);
    }

    fn expect_phase(&self, phase: TurnPhase) -> Result<(), SessionError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(SessionError::WrongPhase(self.phase))
        }
    }

    /// Apply one event and return the effects to execute.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] when the event is not legal in the current
    /// state; the session is left unchanged.
    pub fn apply(
        &mut self,
        content: &GameContent,
        event: Event,
    ) -> Result<Vec<Effect>, SessionError> {
        match event {
            Event::Submit(text) => self.submit(&text),
            Event::ReplyFinished(reply) => self.finish_reply(&reply),
            Event::JudgmentReady(judgment) => self.resolve_judgment(&judgment),
            Event::ChoosePerk(perk) => self.choose_perk(content, perk),
            Event::Restart => Ok(self.restart(content)),
        }
    }

    fn submit(&mut self, text: &str) -> Result<Vec<Effect>, SessionError> {
        if self.is_terminal() {
            return Err(SessionError::RunOver);
        }
        if self.awaiting_perk_selection {
            return Err(SessionError::AwaitingPerk);
        }
        self.expect_phase(TurnPhase::Idle)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyInput);
        }

        self.started = true;
        self.push_turn(ChatTurn::new(Speaker::User, text));
        self.pending_user_text = Some(text.to_string());
        self.phase = TurnPhase::AwaitingReply;
        Ok(vec![Effect::StreamReply {
            user_text: text.to_string(),
        }])
    }

    fn finish_reply(&mut self, reply: &str) -> Result<Vec<Effect>, SessionError> {
        self.expect_phase(TurnPhase::AwaitingReply)?;
        let reply = reply.trim();
        let reply = if reply.is_empty() { SILENCE_NOTICE } else { reply };
        self.pending_reply = Some(reply.to_string());
        self.phase = TurnPhase::AwaitingJudgment;
        Ok(vec![Effect::RequestJudgment {
            user_text: self.pending_user_text.clone().unwrap_or_default(),
        }])
    }

    fn resolve_judgment(&mut self, judgment: &TurnJudgment) -> Result<Vec<Effect>, SessionError> {
        self.expect_phase(TurnPhase::AwaitingJudgment)?;
        let mut effects = Vec::new();

        let resolution = self.active_perks.resolve(judgment.damage);
        self.health = (self.health + resolution.effective_damage).clamp(MIN_HEALTH, MAX_HEALTH);
        let turn = u32::try_from(self.turn_log.len()).unwrap_or(u32::MAX).saturating_add(1);
        self.turn_log.push(TurnLogEntry {
            turn,
            level: self.level,
            raw_damage: resolution.raw_damage,
            effective_damage: resolution.effective_damage,
            hp_after: self.health,
        });
        log::debug!(
            "Turn {turn} L{}: raw {} effective {} hp {} ({})",
            self.level,
            resolution.raw_damage,
            resolution.effective_damage,
            self.health,
            judgment.feedback
        );

        if resolution.raw_damage < 0 {
            if resolution.effective_damage < 0 {
                effects.push(Effect::Notify(format!(
                    "Took {} damage this round (base: {}).",
                    resolution.effective_damage.unsigned_abs(),
                    resolution.raw_damage.unsigned_abs()
                )));
            } else {
                effects.push(Effect::Notify("No damage taken this round.".to_string()));
            }
        }
        effects.extend(resolution.notes.into_iter().map(Effect::Notify));

        let reply = self
            .pending_reply
            .take()
            .unwrap_or_else(|| SILENCE_NOTICE.to_string());
        self.push_turn(ChatTurn::new(Speaker::Ai, reply));
        self.pending_user_text = None;
        self.phase = TurnPhase::Idle;

        if self.health <= MIN_HEALTH {
            self.terminal = TerminalState::Defeated;
            effects.push(Effect::ClearSnapshot);
            effects.push(Effect::GeneratePostMortem(Outcome::GameOver));
        } else if judgment.level_passed && self.level >= FINAL_LEVEL {
            self.terminal = TerminalState::Victorious;
            self.max_level_reached = FINAL_LEVEL;
            effects.push(Effect::ClearSnapshot);
            effects.push(Effect::GeneratePostMortem(Outcome::Victory));
        } else if judgment.level_passed {
            let next = self.level + 1;
            self.awaiting_perk_selection = true;
            self.pending_next_level = Some(next);
            self.transcript.push(ChatTurn::new(
                Speaker::System,
                format!(
                    "Level {} passed. Perk selection shown before Level {next}.",
                    self.level
                ),
            ));
            effects.push(Effect::Notify(
                "Level complete. Choose a perk for the next room.".to_string(),
            ));
            effects.push(Effect::PersistSnapshot);
        } else {
            effects.push(Effect::PersistSnapshot);
        }
        Ok(effects)
    }

    fn choose_perk(
        &mut self,
        content: &GameContent,
        perk: PerkKind,
    ) -> Result<Vec<Effect>, SessionError> {
        if self.is_terminal() {
            return Err(SessionError::RunOver);
        }
        if !self.awaiting_perk_selection {
            return Err(SessionError::NoPerkPending);
        }
        let next_level = self
            .pending_next_level
            .unwrap_or(self.level + 1)
            .min(FINAL_LEVEL);

        self.active_perks.grant(perk);
        let (name, description) = content.perk(perk).map_or_else(
            || (perk.as_str().to_string(), String::new()),
            |info| (info.name.clone(), info.description.clone()),
        );
        self.perk_history.push(PerkPick {
            level: next_level,
            perk_key: perk,
            perk_name: name.clone(),
        });
        self.transcript.push(ChatTurn::new(
            Speaker::System,
            format!("Perk selected before Level {next_level}: {name} ({description})"),
        ));

        self.level = next_level;
        self.max_level_reached = self.max_level_reached.max(next_level);
        self.history.clear();
        self.awaiting_perk_selection = false;
        self.pending_next_level = None;
        self.ensure_intro(content);

        Ok(vec![
            Effect::Notify(format!("{name} locked in for Level {next_level}.")),
            Effect::PersistSnapshot,
        ])
    }

    /// Reset the run, keeping identity, theme and the uploaded document.
    fn restart(&mut self, content: &GameContent) -> Vec<Effect> {
        let mut fresh = Self::new(content, &self.theme);
        fresh.player_handle = std::mem::take(&mut self.player_handle);
        fresh.clan_name = std::mem::take(&mut self.clan_name);
        fresh.document_text = std::mem::take(&mut self.document_text);
        fresh.history.clear();
        fresh.transcript.clear();
        fresh.ensure_intro(content);
        *self = fresh;
        vec![Effect::ClearSnapshot]
    }

    /// Restore hooks used by snapshot recovery.
    pub(crate) fn reset_transients(&mut self) {
        self.phase = TurnPhase::Idle;
        self.pending_user_text = None;
        self.pending_reply = None;
        self.post_mortem = None;
        self.health = self.health.clamp(MIN_HEALTH, MAX_HEALTH);
        self.level = self.level.clamp(FIRST_LEVEL, FINAL_LEVEL);
        self.max_level_reached = self.max_level_reached.clamp(self.level, FINAL_LEVEL);
        self.active_perks = self.active_perks.sanitized();
        if self.health <= MIN_HEALTH && self.terminal == TerminalState::InProgress {
            self.terminal = TerminalState::Defeated;
        }
        if self.is_terminal() || self.level >= FINAL_LEVEL {
            self.awaiting_perk_selection = false;
        }
        self.pending_next_level = if self.awaiting_perk_selection {
            let next = self.pending_next_level.unwrap_or(self.level + 1);
            Some(next.clamp(self.level + 1, FINAL_LEVEL))
        } else {
            None
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content() -> GameContent {
        GameContent::bundled().unwrap()
    }

    fn judgment(damage: i32, level_passed: bool) -> TurnJudgment {
        TurnJudgment {
            damage,
            level_passed,
            feedback: String::new(),
        }
    }

    fn play_turn(session: &mut Session, content: &GameContent, j: TurnJudgment) -> Vec<Effect> {
        session
            .apply(content, Event::Submit("Our product saves nurses time.".into()))
            .unwrap();
        session
            .apply(content, Event::ReplyFinished("Tell me more.".into()))
            .unwrap();
        session.apply(content, Event::JudgmentReady(j)).unwrap()
    }

    #[test]
    fn new_session_starts_with_intro() {
        let content = content();
        let session = Session::new(&content, "Web3");
        assert_eq!(session.health(), 100);
        assert_eq!(session.level(), 1);
        assert_eq!(session.theme(), "Web3");
        assert_eq!(session.history().len(), 1);
        assert!(session.history()[0].text.starts_with("*(Level 1 Start)*"));
        assert!(!session.is_live());
    }

    #[test]
    fn submit_emits_stream_effect_and_advances_phase() {
        let content = content();
        let mut session = Session::with_default_theme(&content);
        let effects = session
            .apply(&content, Event::Submit("  Hi grandma  ".into()))
            .unwrap();
        assert_eq!(
            effects,
            vec![Effect::StreamReply {
                user_text: "Hi grandma".into()
            }]
        );
        assert_eq!(session.phase(), TurnPhase::AwaitingReply);
        assert!(session.is_live());
    }

    #[test]
    fn out_of_phase_events_are_rejected() {
        let content = content();
        let mut session = Session::with_default_theme(&content);
        assert_eq!(
            session.apply(&content, Event::JudgmentReady(judgment(0, false))),
            Err(SessionError::WrongPhase(TurnPhase::Idle))
        );
        session.apply(&content, Event::Submit("hello".into())).unwrap();
        assert_eq!(
            session.apply(&content, Event::Submit("again".into())),
            Err(SessionError::WrongPhase(TurnPhase::AwaitingReply))
        );
        assert_eq!(
            session.apply(&content, Event::Submit("   ".into())),
            Err(SessionError::WrongPhase(TurnPhase::AwaitingReply))
        );
    }

    #[test]
    fn empty_submission_is_rejected() {
        let content = content();
        let mut session = Session::with_default_theme(&content);
        assert_eq!(
            session.apply(&content, Event::Submit(" \n".into())),
            Err(SessionError::EmptyInput)
        );
        assert!(!session.started());
    }

    #[test]
    fn major_damage_without_perks() {
        let content = content();
        let mut session = Session::with_default_theme(&content);
        let effects = play_turn(&mut session, &content, judgment(-20, false));
        assert_eq!(session.health(), 80);
        let entry = session.turn_log()[0];
        assert_eq!(entry.effective_damage, -20);
        assert_eq!(entry.hp_after, 80);
        assert_eq!(
            effects,
            vec![
                Effect::Notify("Took 20 damage this round (base: 20).".into()),
                Effect::PersistSnapshot,
            ]
        );
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.history()[2].text, "Tell me more.");
    }

    #[test]
    fn shield_blocks_minor_damage() {
        let content = content();
        let mut session = Session::with_default_theme(&content);
        session.health = 80;
        session.active_perks.shield_charges = 1;
        let effects = play_turn(&mut session, &content, judgment(-10, false));
        assert_eq!(session.health(), 80);
        assert_eq!(session.active_perks().shield_charges, 0);
        assert_eq!(session.turn_log()[0].effective_damage, 0);
        let notes: Vec<_> = effects
            .iter()
            .filter(|e| matches!(e, Effect::Notify(n) if n.contains("Shield")))
            .collect();
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn zero_health_defeats_even_when_level_passed() {
        let content = content();
        let mut session = Session::with_default_theme(&content);
        session.health = 10;
        let effects = play_turn(&mut session, &content, judgment(-20, true));
        assert_eq!(session.health(), 0);
        assert_eq!(session.terminal(), TerminalState::Defeated);
        assert!(!session.awaiting_perk_selection());
        assert!(effects.contains(&Effect::GeneratePostMortem(Outcome::GameOver)));
        assert!(effects.contains(&Effect::ClearSnapshot));
        assert_eq!(
            session.apply(&content, Event::Submit("one more".into())),
            Err(SessionError::RunOver)
        );
    }

    #[test]
    fn final_level_pass_is_victory_without_perk_gate() {
        let content = content();
        let mut session = Session::with_default_theme(&content);
        session.level = 5;
        session.health = 40;
        let effects = play_turn(&mut session, &content, judgment(0, true));
        assert_eq!(session.terminal(), TerminalState::Victorious);
        assert!(!session.awaiting_perk_selection());
        assert_eq!(session.max_level_reached(), 5);
        assert!(effects.contains(&Effect::GeneratePostMortem(Outcome::Victory)));
    }

    #[test]
    fn level_pass_gates_on_perk_then_advances() {
        let content = content();
        let mut session = Session::with_default_theme(&content);
        play_turn(&mut session, &content, judgment(0, true));
        assert!(session.awaiting_perk_selection());
        assert_eq!(session.pending_next_level(), Some(2));
        assert_eq!(
            session.apply(&content, Event::Submit("skip ahead".into())),
            Err(SessionError::AwaitingPerk)
        );

        let effects = session
            .apply(&content, Event::ChoosePerk(PerkKind::TechShield))
            .unwrap();
        assert!(effects.contains(&Effect::PersistSnapshot));
        assert_eq!(session.level(), 2);
        assert_eq!(session.max_level_reached(), 2);
        assert_eq!(session.active_perks().shield_charges, 1);
        assert_eq!(session.history().len(), 1);
        assert!(session.history()[0].text.starts_with("*(Level 2 Start)*"));
        assert_eq!(session.perk_history()[0].level, 2);
        assert_eq!(
            session.perk_history()[0].perk_name,
            "Technical Cofounder Shield"
        );
        assert!(
            session
                .transcript()
                .iter()
                .any(|t| t.speaker == Speaker::System && t.text.starts_with("Perk selected"))
        );
        assert_eq!(
            session.apply(&content, Event::ChoosePerk(PerkKind::Charisma)),
            Err(SessionError::NoPerkPending)
        );
    }

    #[test]
    fn blank_reply_is_replaced_with_silence() {
        let content = content();
        let mut session = Session::with_default_theme(&content);
        session.apply(&content, Event::Submit("hi".into())).unwrap();
        session
            .apply(&content, Event::ReplyFinished("   ".into()))
            .unwrap();
        assert_eq!(
            session.judgment_history().last().map(|t| t.text.as_str()),
            Some(SILENCE_NOTICE)
        );
    }

    #[test]
    fn restart_keeps_identity_theme_and_document() {
        let content = content();
        let mut session = Session::new(&content, "FinTech");
        session.set_identity(" ada ", "Analytical Engines");
        session.set_document("Revenue grew 40%.");
        play_turn(&mut session, &content, judgment(-20, false));

        let effects = session.apply(&content, Event::Restart).unwrap();
        assert_eq!(effects, vec![Effect::ClearSnapshot]);
        assert_eq!(session.health(), 100);
        assert!(session.turn_log().is_empty());
        assert!(!session.started());
        assert_eq!(session.player_handle(), "ada");
        assert_eq!(session.clan_name(), "Analytical Engines");
        assert_eq!(session.theme(), "FinTech");
        assert!(session.has_document());
        assert!(session.history()[0].text.contains("Deck mode: enabled"));
    }

    #[test]
    fn report_cache_is_keyed_by_outcome() {
        let content = content();
        let mut session = Session::with_default_theme(&content);
        session.store_report(Outcome::GameOver, PostMortemReport::default());
        assert!(session.cached_report(Outcome::GameOver).is_some());
        assert!(session.cached_report(Outcome::Victory).is_none());
    }

    #[test]
    fn theme_is_locked_once_started() {
        let content = content();
        let mut session = Session::with_default_theme(&content);
        session.set_theme(&content, "ClimateTech").unwrap();
        assert!(session.history()[0].text.contains("ClimateTech"));
        session.apply(&content, Event::Submit("hi".into())).unwrap();
        assert_eq!(
            session.set_theme(&content, "Web3"),
            Err(SessionError::RunInProgress)
        );
    }

    #[test]
    fn speakers_serialize_as_plain_strings() {
        let turn = ChatTurn::new(Speaker::Ai, "hi");
        let json = serde_json::to_string(&turn).unwrap();
        assert_eq!(json, r#"{"role":"ai","content":"hi"}"#);
    }
}
