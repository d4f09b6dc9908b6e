use gauntlet_game::constants::SNAPSHOT_STORAGE_KEY;
use gauntlet_game::judgment::OVERLOAD_FEEDBACK;
use gauntlet_game::leaderboard::{NOTICE_MISSING_HANDLE, NOTICE_SUBMITTED};
use gauntlet_game::stream::INTERRUPTION_NOTICE;
use gauntlet_game::{
    BackendError, EngineConfig, EngineError, GameContent, GauntletEngine, MemoryRunStore,
    MemorySnapshotStore, PerkKind, RestoreOutcome, RunStore, SessionError, SnapshotRecovery,
    SnapshotStore, Speaker, TerminalState, TextBackend, TokenStream, compute_valuation,
};
use std::cell::RefCell;
use std::collections::VecDeque;

const PASS: &str = r#"{"damage": 0, "level_passed": true, "feedback": "Convincing."}"#;
const HOLD: &str = r#"{"damage": 0, "level_passed": false, "feedback": "Keep going."}"#;
const MAJOR: &str = r#"{"damage": -20, "level_passed": false, "feedback": "Bluffing."}"#;
const REPORT: &str = r#"```json
{
  "scores": {"confidence": 80, "technical_clarity": 70, "business_viability": 60, "resilience_under_pressure": 90},
  "strengths": ["Clear story", "Calm under fire", "Knew the numbers"],
  "weaknesses": ["Thin moat", "Vague hiring plan", "Pricing untested"],
  "next_actions": ["Run a pricing test", "Map competitors", "Hire a CTO"],
  "summary": "Strong, composed run."
}
```"#;

/// Backend that routes prompts by kind and replays queued answers.
#[derive(Default)]
struct Script {
    verdicts: RefCell<VecDeque<Result<String, BackendError>>>,
    streams: RefCell<VecDeque<Vec<Result<String, BackendError>>>>,
    continuation: RefCell<Option<String>>,
    prompts: RefCell<Vec<String>>,
}

impl Script {
    fn verdicts(items: &[&str]) -> Self {
        let script = Self::default();
        script
            .verdicts
            .borrow_mut()
            .extend(items.iter().map(|v| Ok((*v).to_string())));
        script
    }

    fn prompts_containing(&self, needle: &str) -> usize {
        self.prompts
            .borrow()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

impl TextBackend for Script {
    fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        if prompt.contains("startup coach") || prompt.contains("required schema") {
            return Ok(REPORT.to_string());
        }
        if prompt.contains("referee") {
            return self
                .verdicts
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(HOLD.to_string()));
        }
        self.continuation
            .borrow_mut()
            .take()
            .ok_or(BackendError::Empty)
    }

    fn stream<'a>(&'a self, prompt: &str) -> Result<TokenStream<'a>, BackendError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        let fragments = self
            .streams
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| vec![Ok("Interesting. ".into()), Ok("Tell me more.".into())]);
        Ok(Box::new(fragments.into_iter()))
    }

    fn transcribe(&self, _audio: &[u8], _mime_type: &str) -> Result<String, BackendError> {
        Ok("We cut onboarding from weeks to minutes.".to_string())
    }
}

type Engine<'s> = GauntletEngine<&'s Script, MemorySnapshotStore, MemoryRunStore>;

fn engine<'s>(
    backend: &'s Script,
    store: &MemorySnapshotStore,
    runs: Option<MemoryRunStore>,
) -> Engine<'s> {
    GauntletEngine::new(
        GameContent::bundled().unwrap(),
        backend,
        SnapshotRecovery::new(store.clone()),
        runs,
        EngineConfig::default().without_backoff(),
    )
}

#[test]
fn victory_run_scores_submits_and_clears_snapshot() {
    let backend = Script::verdicts(&[PASS, PASS, PASS, PASS, PASS]);
    let store = MemorySnapshotStore::default();
    let runs = MemoryRunStore::new();
    let mut game = engine(&backend, &store, Some(runs.clone()));
    game.set_identity("  Ada  ", "North Star");
    game.set_theme("FinTech").unwrap();

    let perks = [
        PerkKind::Charisma,
        PerkKind::TechShield,
        PerkKind::NoPerk,
        PerkKind::Charisma,
    ];
    for (idx, perk) in perks.into_iter().enumerate() {
        let report = game.play_turn("Our ledger reconciles in seconds.", |_| {}).unwrap();
        assert_eq!(report.level, u8::try_from(idx + 1).unwrap());
        assert!(game.session().awaiting_perk_selection());
        assert!(store.raw(SNAPSHOT_STORAGE_KEY).is_some());

        let err = game.play_turn("Still talking", |_| {}).unwrap_err();
        assert!(matches!(err, EngineError::Session(SessionError::AwaitingPerk)));

        let report = game.choose_perk(perk).unwrap();
        assert_eq!(report.level, u8::try_from(idx + 2).unwrap());
        assert!(report.notices.iter().any(|n| n.contains("locked in")));
        assert_eq!(game.session().history().len(), 1);
    }

    let report = game.play_turn("We will own cross-border payroll.", |_| {}).unwrap();
    assert_eq!(report.terminal, TerminalState::Victorious);
    assert!(report.notices.iter().any(|n| n == NOTICE_SUBMITTED));
    assert!(report.celebrate);
    assert!(store.raw(SNAPSHOT_STORAGE_KEY).is_none());

    let session = game.session();
    assert_eq!(session.max_level_reached(), 5);
    assert_eq!(session.perk_history().len(), 4);
    assert_eq!(session.turn_log().len(), 5);
    assert_eq!(session.final_valuation_usd(), 28_550_000);
    let post_mortem = game.post_mortem().unwrap();
    assert_eq!(
        compute_valuation(&post_mortem, 100, false, 4),
        game.session().final_valuation_usd()
    );
    assert_eq!(backend.prompts_containing("startup coach"), 1);

    let share = game.share_text().unwrap();
    let lines: Vec<&str> = share.lines().collect();
    assert_eq!(lines[0], "Founder's Gauntlet 🟩🟩🟩🟩🟩 🚀");
    assert_eq!(
        lines[1],
        "Ada | FinTech | Reached L5 | HP 100/100 | Valuation $28,550,000"
    );
    assert!(lines[2].starts_with("Play: "));

    let rows = runs.player_leaderboard(10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].player_handle, "Ada");
    assert_eq!(rows[0].clan_name, "North Star");
    assert_eq!(rows[0].best_run_valuation_usd, 28_550_000);
    assert_eq!(runs.runs()[0].level_reached, 5);

    let err = game.play_turn("One more thing", |_| {}).unwrap_err();
    assert!(matches!(err, EngineError::Session(SessionError::RunOver)));
    assert_eq!(runs.run_count(), 1);
}

#[test]
fn defeat_is_worth_nothing_and_asks_for_a_handle() {
    let backend = Script::verdicts(&[MAJOR, MAJOR, MAJOR, MAJOR, MAJOR]);
    let store = MemorySnapshotStore::default();
    let runs = MemoryRunStore::new();
    let mut game = engine(&backend, &store, Some(runs.clone()));

    let mut last = None;
    for _ in 0..5 {
        last = Some(game.play_turn("Synergy. Cloud. AI.", |_| {}).unwrap());
    }
    let report = last.unwrap();
    assert_eq!(report.health, 0);
    assert_eq!(report.terminal, TerminalState::Defeated);
    assert!(report.notices.iter().any(|n| n == NOTICE_MISSING_HANDLE));
    assert!(report.notices.iter().any(|n| n.contains("Took 20 damage")));
    assert_eq!(game.session().final_valuation_usd(), 0);
    assert_eq!(runs.run_count(), 0);
    assert!(store.raw(SNAPSHOT_STORAGE_KEY).is_none());

    let share = game.share_text().unwrap();
    assert!(share.starts_with("Founder's Gauntlet 🟥🟥🟥🟥🟥 💥"));
    assert!(share.contains("Anonymous Founder"));
    assert!(share.contains("Valuation $0"));
}

#[test]
fn perks_soften_the_next_hits() {
    let backend = Script::verdicts(&[PASS, MAJOR, PASS, MAJOR, MAJOR]);
    let store = MemorySnapshotStore::default();
    let mut game = engine(&backend, &store, None);

    game.play_turn("Think of it like a recipe card.", |_| {}).unwrap();
    game.choose_perk(PerkKind::TechShield).unwrap();
    let report = game.play_turn("Here is our benchmark.", |_| {}).unwrap();
    assert_eq!(report.health, 100);
    assert!(report.notices.iter().any(|n| n.contains("blocked all damage")));
    assert!(report.notices.iter().any(|n| n == "No damage taken this round."));

    game.play_turn("Here are the receipts.", |_| {}).unwrap();
    game.choose_perk(PerkKind::Charisma).unwrap();
    let report = game.play_turn("Margins are great.", |_| {}).unwrap();
    assert_eq!(report.health, 90);
    assert!(report.notices.iter().any(|n| n.contains("reduced damage from 20 to 10")));

    let report = game.play_turn("Trust me.", |_| {}).unwrap();
    assert_eq!(report.health, 70);

    let log = game.session().turn_log();
    let effective: Vec<i32> = log.iter().map(|e| e.effective_damage).collect();
    assert_eq!(effective, [0, 0, 0, -10, -20]);
    assert_eq!(log[4].hp_after, 70);
}

#[test]
fn interrupted_reply_is_recovered_and_stitched() {
    let backend = Script::verdicts(&[HOLD]);
    backend.streams.borrow_mut().push_back(vec![
        Ok("What is ".into()),
        Ok("a wee".into()),
        Err(BackendError::Stream("connection reset".into())),
    ]);
    *backend.continuation.borrow_mut() = Some("What is a wee-fee, dear?".into());
    let store = MemorySnapshotStore::default();
    let mut game = engine(&backend, &store, None);

    let mut shown = Vec::new();
    let report = game
        .play_turn("Our router app fixes your wifi.", |f| shown.push(f.to_string()))
        .unwrap();
    assert_eq!(shown[2], INTERRUPTION_NOTICE);
    assert_eq!(shown[3], "-fee, dear?");
    assert!(report.reply.starts_with("What is a wee"));
    assert!(report.reply.ends_with("-fee, dear?"));
    assert_eq!(report.reply.matches("What is").count(), 1);

    let last = game.session().history().last().unwrap();
    assert_eq!(last.speaker, Speaker::Ai);
    assert_eq!(last.text, report.reply);
}

#[test]
fn judgment_overload_costs_nothing() {
    let backend = Script::default();
    backend.verdicts.borrow_mut().extend([
        Err(BackendError::Status {
            status: 429,
            message: "RESOURCE_EXHAUSTED".into(),
        }),
        Err(BackendError::Transport("quota exceeded".into())),
        Err(BackendError::Transport("Too Many Requests".into())),
    ]);
    let store = MemorySnapshotStore::default();
    let mut game = engine(&backend, &store, None);

    let report = game.play_turn("Hello", |_| {}).unwrap();
    let judgment = report.judgment.unwrap();
    assert_eq!(judgment.feedback, OVERLOAD_FEEDBACK);
    assert_eq!(report.health, 100);
    assert_eq!(backend.prompts_containing("referee"), 3);
}

#[test]
fn interrupted_run_is_restored_into_a_fresh_engine() {
    let backend = Script::verdicts(&[MAJOR, PASS]);
    let store = MemorySnapshotStore::default();
    {
        let mut game = engine(&backend, &store, None);
        game.set_identity("grace", "");
        game.play_turn("First answer", |_| {}).unwrap();
        game.play_turn("Second answer", |_| {}).unwrap();
        game.choose_perk(PerkKind::Charisma).unwrap();
        assert!(game.accept_audio(b"clip", "audio/webm") != gauntlet_game::AudioOutcome::Failed);
    }

    let warm = MemorySnapshotStore::warming_up(2);
    warm.set(SNAPSHOT_STORAGE_KEY, &store.raw(SNAPSHOT_STORAGE_KEY).unwrap())
        .unwrap();
    let mut game = engine(&backend, &warm, None);
    assert_eq!(game.restore(), RestoreOutcome::Restored);
    assert_eq!(game.restore(), RestoreOutcome::AlreadyDecided);

    let session = game.session();
    assert_eq!(session.level(), 2);
    assert_eq!(session.health(), 80);
    assert_eq!(session.player_handle(), "grace");
    assert!(session.started());
    assert!(session.active_perks().multiplier_armed());
    assert_eq!(session.turn_log().len(), 2);
    assert!(game.aux().voice.has_draft());

    let report = game.submit_voice_draft(None, |_| {}).unwrap();
    assert_eq!(report.level, 2);
    assert!(
        game.session()
            .history()
            .iter()
            .any(|t| t.text == "We cut onboarding from weeks to minutes.")
    );
}

#[test]
fn restore_never_overwrites_a_live_run() {
    let backend = Script::default();
    let store = MemorySnapshotStore::default();
    {
        let mut game = engine(&backend, &store, None);
        game.play_turn("Saved run", |_| {}).unwrap();
    }
    let mut game = engine(&backend, &store, None);
    game.play_turn("Already playing", |_| {}).unwrap();
    assert_eq!(game.restore(), RestoreOutcome::SkippedActiveSession);
    assert!(
        game.session()
            .history()
            .iter()
            .any(|t| t.text == "Already playing")
    );
}

#[test]
fn restart_keeps_identity_theme_and_document() {
    let backend = Script::verdicts(&[MAJOR]);
    let store = MemorySnapshotStore::default();
    let mut game = engine(&backend, &store, None);
    game.set_identity("lin", "Orbit");
    game.set_theme("ClimateTech").unwrap();
    game.set_document("We capture methane at 40 dairy farms.\n\nPayback is 18 months.");
    game.play_turn("Methane capture pays back fast.", |_| {}).unwrap();
    assert!(game.set_theme("Web3").is_err());

    let reply_prompt = backend.prompts.borrow()[0].clone();
    assert!(reply_prompt.contains("Relevant excerpts from the founder's uploaded document:"));
    assert!(reply_prompt.contains("methane"));

    game.restart().unwrap();
    assert!(store.raw(SNAPSHOT_STORAGE_KEY).is_none());
    let session = game.session();
    assert_eq!(session.health(), 100);
    assert_eq!(session.level(), 1);
    assert!(!session.started());
    assert!(session.turn_log().is_empty());
    assert_eq!(session.player_handle(), "lin");
    assert_eq!(session.clan_name(), "Orbit");
    assert_eq!(session.theme(), "ClimateTech");
    assert!(session.has_document());
    assert!(session.history()[0].text.contains("Deck mode: enabled"));
}
