//! Effect driver: feeds player actions into the session state machine and
//! carries out the effects it asks for.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

use crate::backend::TextBackend;
use crate::constants::{CHUNK_CACHE_CAPACITY, DEFAULT_APP_URL};
use crate::judgment::{JudgmentService, RetryPolicy, TurnJudgment};
use crate::leaderboard::{ClanRow, PlayerRow, RunStore, submit_session};
use crate::perks::PerkKind;
use crate::personas::GameContent;
use crate::postmortem::{PostMortemReport, PostMortemService};
use crate::prompts::TurnContext;
use crate::result::{build_share_text, is_headline_valuation, session_valuation};
use crate::retrieval::{ChunkCache, RetrievalConfig};
use crate::session::{
    ChatTurn, Effect, Event, Outcome, Session, SessionError, Speaker, TerminalState,
};
use crate::snapshot::{AuxState, RestoreOutcome, SnapshotRecovery, SnapshotStore};
use crate::stream::{collect_reply, stream_reply};
use crate::voice::AudioOutcome;

/// Tunables for one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retrieval: RetrievalConfig,
    pub chunk_cache_capacity: usize,
    pub judgment_retry: RetryPolicy,
    pub post_mortem_retry: RetryPolicy,
    pub app_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            chunk_cache_capacity: CHUNK_CACHE_CAPACITY,
            judgment_retry: RetryPolicy::judgment(),
            post_mortem_retry: RetryPolicy::post_mortem(),
            app_url: DEFAULT_APP_URL.to_string(),
        }
    }
}

impl EngineConfig {
    /// Keep attempt budgets but never sleep; for simulations and tests.
    #[must_use]
    pub fn without_backoff(mut self) -> Self {
        self.judgment_retry = self.judgment_retry.without_backoff();
        self.post_mortem_retry = self.post_mortem_retry.without_backoff();
        self
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("No persona is configured for level {0}")]
    MissingPersona(u8),
}

/// What happened during one player action.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TurnReport {
    pub reply: String,
    pub judgment: Option<TurnJudgment>,
    pub notices: Vec<String>,
    pub terminal: TerminalState,
    pub health: i32,
    pub level: u8,
    pub snapshot_saved: bool,
    /// Set once per run when a victory clears the headline valuation.
    pub celebrate: bool,
}

/// One player's game: content, backend, stores and the live session.
pub struct GauntletEngine<B, S, R> {
    content: GameContent,
    backend: B,
    recovery: SnapshotRecovery<S>,
    runs: Option<R>,
    cache: ChunkCache,
    config: EngineConfig,
    session: Session,
    aux: AuxState,
}

impl<B, S, R> GauntletEngine<B, S, R>
where
    B: TextBackend,
    S: SnapshotStore,
    R: RunStore,
{
    #[must_use]
    pub fn new(
        content: GameContent,
        backend: B,
        recovery: SnapshotRecovery<S>,
        runs: Option<R>,
        config: EngineConfig,
    ) -> Self {
        let session = Session::with_default_theme(&content);
        let cache = ChunkCache::new(config.chunk_cache_capacity, config.retrieval.clone());
        Self {
            content,
            backend,
            recovery,
            runs,
            cache,
            config,
            session,
            aux: AuxState::default(),
        }
    }

    #[must_use]
    pub const fn content(&self) -> &GameContent {
        &self.content
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub const fn aux(&self) -> &AuxState {
        &self.aux
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn recovery(&self) -> &SnapshotRecovery<S> {
        &self.recovery
    }

    #[must_use]
    pub const fn run_store(&self) -> Option<&R> {
        self.runs.as_ref()
    }

    /// Bring back an interrupted run from the snapshot store, if any.
    pub fn restore(&mut self) -> RestoreOutcome {
        let outcome =
            self.recovery
                .restore_until_decided(&self.content, &mut self.session, &mut self.aux);
        log::info!("Local recovery: {outcome}");
        outcome
    }

    pub fn set_identity(&mut self, player_handle: &str, clan_name: &str) {
        self.session.set_identity(player_handle, clan_name);
    }

    /// # Errors
    ///
    /// Fails while a run is in progress.
    pub fn set_theme(&mut self, theme: &str) -> Result<(), EngineError> {
        self.session.set_theme(&self.content, theme)?;
        Ok(())
    }

    /// Attach the founder's document; the next turns cross-reference it.
    pub fn set_document(&mut self, text: &str) {
        self.session.set_document(text);
        if self.session.has_document() {
            self.cache.warm(self.session.document_text());
        }
    }

    /// Play one turn, passing reply fragments to `on_fragment` as they arrive.
    ///
    /// # Errors
    ///
    /// Returns an error when the submission is not legal right now (run over,
    /// perk pending, empty text).
    pub fn play_turn(
        &mut self,
        text: &str,
        mut on_fragment: impl FnMut(&str),
    ) -> Result<TurnReport, EngineError> {
        let effects = self.session.apply(&self.content, Event::Submit(text.to_string()))?;
        let document_context = self
            .cache
            .context_for(self.session.document_text(), text.trim());
        let mut report = TurnReport::default();
        self.drive(effects, &document_context, &mut report, &mut on_fragment)?;
        Ok(self.finish_report(report))
    }

    /// Submit the pending voice draft, optionally edited.
    ///
    /// # Errors
    ///
    /// Same as [`Self::play_turn`]; an empty draft is [`SessionError::EmptyInput`].
    pub fn submit_voice_draft(
        &mut self,
        edited: Option<&str>,
        on_fragment: impl FnMut(&str),
    ) -> Result<TurnReport, EngineError> {
        let Some(draft) = self.aux.voice.take_draft(edited) else {
            return Err(SessionError::EmptyInput.into());
        };
        self.play_turn(&draft, on_fragment)
    }

    /// Transcribe a recorded clip into the voice draft.
    pub fn accept_audio(&mut self, audio: &[u8], mime_type: &str) -> AudioOutcome {
        let outcome = self.aux.voice.accept_audio(&self.backend, audio, mime_type);
        if matches!(outcome, AudioOutcome::Drafted(_)) && self.session.started() {
            self.recovery.save(&self.session, &self.aux);
        }
        outcome
    }

    /// # Errors
    ///
    /// Fails when no perk choice is pending.
    pub fn choose_perk(&mut self, perk: PerkKind) -> Result<TurnReport, EngineError> {
        let effects = self.session.apply(&self.content, Event::ChoosePerk(perk))?;
        let mut report = TurnReport::default();
        self.drive(effects, "", &mut report, &mut |_: &str| {})?;
        Ok(self.finish_report(report))
    }

    /// Start over with the same identity, theme and document.
    ///
    /// # Errors
    ///
    /// Propagates state machine errors.
    pub fn restart(&mut self) -> Result<TurnReport, EngineError> {
        let effects = self.session.apply(&self.content, Event::Restart)?;
        self.aux = AuxState::default();
        self.recovery.rearm();
        let mut report = TurnReport::default();
        self.drive(effects, "", &mut report, &mut |_: &str| {})?;
        Ok(self.finish_report(report))
    }

    /// Post-mortem for the finished run, generating it if needed.
    pub fn post_mortem(&mut self) -> Option<PostMortemReport> {
        let outcome = self.session.terminal().outcome()?;
        Some(self.ensure_report(outcome))
    }

    #[must_use]
    pub fn share_text(&self) -> Option<String> {
        if !self.session.is_terminal() {
            return None;
        }
        Some(build_share_text(
            &self.session,
            self.session.final_valuation_usd(),
            &self.config.app_url,
        ))
    }

    /// Top players; empty when no run store is configured or it fails.
    #[must_use]
    pub fn player_leaderboard(&self, limit: usize) -> Vec<PlayerRow> {
        let Some(store) = &self.runs else {
            return Vec::new();
        };
        store.player_leaderboard(limit).unwrap_or_else(|err| {
            log::warn!("Player leaderboard unavailable: {err}");
            Vec::new()
        })
    }

    #[must_use]
    pub fn clan_leaderboard(&self, limit: usize) -> Vec<ClanRow> {
        let Some(store) = &self.runs else {
            return Vec::new();
        };
        store.clan_leaderboard(limit).unwrap_or_else(|err| {
            log::warn!("Clan leaderboard unavailable: {err}");
            Vec::new()
        })
    }

    fn finish_report(&self, mut report: TurnReport) -> TurnReport {
        report.terminal = self.session.terminal();
        report.health = self.session.health();
        report.level = self.session.level();
        report
    }

    fn drive(
        &mut self,
        effects: Vec<Effect>,
        document_context: &str,
        report: &mut TurnReport,
        on_fragment: &mut dyn FnMut(&str),
    ) -> Result<(), EngineError> {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::StreamReply { user_text } => {
                    let reply = self.stream_turn(&user_text, document_context, on_fragment)?;
                    report.reply.clone_from(&reply);
                    queue.extend(
                        self.session
                            .apply(&self.content, Event::ReplyFinished(reply))?,
                    );
                }
                Effect::RequestJudgment { user_text } => {
                    let judgment = self.judge_turn(&user_text, document_context)?;
                    report.judgment = Some(judgment.clone());
                    self.aux.previous_hp_for_ui = self.session.health();
                    queue.extend(
                        self.session
                            .apply(&self.content, Event::JudgmentReady(judgment))?,
                    );
                }
                Effect::PersistSnapshot => {
                    report.snapshot_saved = self.recovery.save(&self.session, &self.aux);
                }
                Effect::ClearSnapshot => {
                    self.recovery.clear();
                }
                Effect::GeneratePostMortem(outcome) => {
                    self.finish_run(outcome, report);
                }
                Effect::Notify(message) => report.notices.push(message),
            }
        }
        Ok(())
    }

    fn turn_context<'a>(
        &'a self,
        history: &'a [ChatTurn],
        document_context: &'a str,
    ) -> Result<TurnContext<'a>, EngineError> {
        let level = self.session.level();
        let persona = self
            .content
            .persona(level)
            .ok_or(EngineError::MissingPersona(level))?;
        Ok(TurnContext {
            persona,
            theme: self.content.theme_or_default(self.session.theme()),
            history,
            document_context,
        })
    }

    fn stream_turn(
        &self,
        user_text: &str,
        document_context: &str,
        on_fragment: &mut dyn FnMut(&str),
    ) -> Result<String, EngineError> {
        // The prompt carries the new input separately from the history.
        let history = match self.session.history().split_last() {
            Some((last, earlier)) if last.speaker == Speaker::User => earlier,
            _ => self.session.history(),
        };
        let ctx = self.turn_context(history, document_context)?;
        let fragments = stream_reply(&self.backend, &ctx, user_text);
        Ok(collect_reply(fragments, |fragment| on_fragment(fragment)))
    }

    fn judge_turn(
        &self,
        user_text: &str,
        document_context: &str,
    ) -> Result<TurnJudgment, EngineError> {
        let history = self.session.judgment_history();
        let ctx = self.turn_context(&history, document_context)?;
        let judge = JudgmentService::new(&self.backend, self.config.judgment_retry);
        Ok(judge.judge(&ctx, user_text))
    }

    fn ensure_report(&mut self, outcome: Outcome) -> PostMortemReport {
        if let Some(report) = self.session.cached_report(outcome) {
            return report.clone();
        }
        let query = self
            .session
            .transcript()
            .iter()
            .filter(|turn| turn.speaker == Speaker::User)
            .map(|turn| turn.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let document_context = self
            .cache
            .context_for(self.session.document_text(), &query);
        let theme = self.content.theme_or_default(self.session.theme());
        let service = PostMortemService::new(&self.backend, self.config.post_mortem_retry);
        let report = service.analyze(self.session.transcript(), theme, outcome, &document_context);
        self.session.store_report(outcome, report.clone());
        report
    }

    fn finish_run(&mut self, outcome: Outcome, report: &mut TurnReport) {
        let post_mortem = self.ensure_report(outcome);
        if outcome == Outcome::Victory {
            let valuation = session_valuation(&self.session, &post_mortem);
            self.session.record_valuation(valuation);
            let valuation = self.session.final_valuation_usd();
            if !self.aux.victory_audio_played && is_headline_valuation(valuation) {
                self.aux.victory_audio_played = true;
                report.celebrate = true;
            }
            log::info!("Run won with valuation {valuation}");
        } else {
            log::info!("Run lost at level {}", self.session.level());
        }

        if let Some(store) = &self.runs {
            if let Some(notice) = submit_session(store, &mut self.session) {
                report.notices.push(notice.to_string());
            }
        }
    }
}
