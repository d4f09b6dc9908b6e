use anyhow::Result;
use gauntlet_game::{
    ChatTurn, EngineConfig, GameContent, GauntletEngine, MemoryRunStore, MemorySnapshotStore,
    PerkKind, PostMortemReport, RestoreOutcome, SnapshotRecovery, TerminalState, TurnJudgment,
    TurnLogEntry,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

use super::scripted::{BackendProfile, BackendStats, ScriptedBackend};

pub const DEFAULT_MAX_TURNS: u32 = 40;

const PITCH_LINES: [&str; 8] = [
    "We reconcile supplier invoices automatically and charge per seat.",
    "Our first ten customers came from the pilot with three regional clinics.",
    "Gross margin is 78% today and improves with every integration.",
    "We have two patents pending on the matching engine.",
    "Churn is under 2% monthly because we sit inside the daily workflow.",
    "The market is 40 billion dollars and nobody owns the mid-market.",
    "Our CTO shipped the same system at a bank for six years.",
    "Payback on customer acquisition is nine months.",
];

const SAMPLE_DOCUMENT: &str = "Pitch deck. We sell invoice reconciliation to mid-market \
     distributors. Revenue grew 18% month over month for six months. Gross margin is 78%. \
     Customer acquisition payback is nine months. The team previously built payment rails \
     at a regional bank. We are raising 3 million dollars to hire four engineers.";

/// How the simulated founder picks perks after each passed level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerkStrategy {
    Charisma,
    Shield,
    Skip,
    Rotate,
    Random,
}

impl PerkStrategy {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Charisma => "charisma",
            Self::Shield => "shield",
            Self::Skip => "skip",
            Self::Rotate => "rotate",
            Self::Random => "random",
        }
    }

    fn pick(self, passed_levels: usize, rng: &mut ChaCha8Rng) -> PerkKind {
        match self {
            Self::Charisma => PerkKind::Charisma,
            Self::Shield => PerkKind::TechShield,
            Self::Skip => PerkKind::NoPerk,
            Self::Rotate => PerkKind::ALL[passed_levels % PerkKind::ALL.len()],
            Self::Random => PerkKind::ALL[rng.gen_range(0..PerkKind::ALL.len())],
        }
    }
}

/// Declarative plan for one simulated run.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub profile: BackendProfile,
    pub perks: PerkStrategy,
    pub theme: String,
    pub handle: String,
    pub clan: String,
    pub with_document: bool,
    pub max_turns: u32,
    /// Drop the engine after this many turns and restore into a new one.
    pub crash_after_turn: Option<u32>,
    pub expectations: Vec<SimulationExpectation>,
}

impl SimulationPlan {
    #[must_use]
    pub fn new(profile: BackendProfile, perks: PerkStrategy) -> Self {
        Self {
            profile,
            perks,
            theme: gauntlet_game::constants::DEFAULT_THEME.to_string(),
            handle: "sim-founder".to_string(),
            clan: String::new(),
            with_document: false,
            max_turns: DEFAULT_MAX_TURNS,
            crash_after_turn: None,
            expectations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_theme(mut self, theme: &str) -> Self {
        self.theme = theme.to_string();
        self
    }

    #[must_use]
    pub fn with_identity(mut self, handle: &str, clan: &str) -> Self {
        self.handle = handle.to_string();
        self.clan = clan.to_string();
        self
    }

    #[must_use]
    pub const fn with_document(mut self) -> Self {
        self.with_document = true;
        self
    }

    #[must_use]
    pub const fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    #[must_use]
    pub const fn with_crash_after(mut self, turn: u32) -> Self {
        self.crash_after_turn = Some(turn);
        self
    }

    #[must_use]
    pub fn with_expectation(mut self, expectation: impl Into<SimulationExpectation>) -> Self {
        self.expectations.push(expectation.into());
        self
    }
}

/// Assertion hook run after a simulation completes.
type SimulationExpectationFn =
    Arc<dyn Fn(&SimulationSummary) -> Result<()> + Send + Sync + 'static>;

#[derive(Clone)]
pub struct SimulationExpectation(SimulationExpectationFn);

impl std::fmt::Debug for SimulationExpectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationExpectation").finish()
    }
}

impl SimulationExpectation {
    /// # Errors
    ///
    /// Returns the expectation's failure.
    pub fn evaluate(&self, summary: &SimulationSummary) -> Result<()> {
        (self.0)(summary)
    }
}

impl<F> From<F> for SimulationExpectation
where
    F: Fn(&SimulationSummary) -> Result<()> + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Self(Arc::new(f))
    }
}

/// Engine state before and after a simulated crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashCheck {
    pub outcome: RestoreOutcome,
    pub before: (u8, i32, usize),
    pub after: (u8, i32, usize),
}

/// Everything observed during one simulated run.
#[derive(Debug, Clone)]
pub struct SimulationSummary {
    pub seed: u64,
    pub perks: PerkStrategy,
    pub terminal: TerminalState,
    pub health: i32,
    pub level: u8,
    pub max_level: u8,
    pub turns: u32,
    pub halted: bool,
    pub turn_log: Vec<TurnLogEntry>,
    pub judgments: Vec<TurnJudgment>,
    pub replies: Vec<String>,
    pub transcript: Vec<ChatTurn>,
    pub perks_chosen: Vec<PerkKind>,
    pub notices: Vec<String>,
    pub valuation: i64,
    pub celebrated: bool,
    pub share_text: Option<String>,
    pub report: Option<PostMortemReport>,
    pub crash: Option<CrashCheck>,
    pub snapshot_left: bool,
    pub runs_saved: usize,
    pub player_rows: usize,
    pub backend: BackendStats,
}

impl SimulationSummary {
    #[must_use]
    pub const fn game_ended(&self) -> bool {
        !matches!(self.terminal, TerminalState::InProgress)
    }
}

type SimEngine<'a> = GauntletEngine<&'a ScriptedBackend, MemorySnapshotStore, MemoryRunStore>;

/// Runs [`SimulationPlan`]s against the engine with a scripted backend.
#[derive(Debug, Clone)]
pub struct Simulator {
    content: GameContent,
    verbose: bool,
}

impl Simulator {
    #[must_use]
    pub const fn new(content: GameContent, verbose: bool) -> Self {
        Self { content, verbose }
    }

    fn engine<'a>(
        &self,
        backend: &'a ScriptedBackend,
        store: &MemorySnapshotStore,
        runs: &MemoryRunStore,
    ) -> SimEngine<'a> {
        GauntletEngine::new(
            self.content.clone(),
            backend,
            SnapshotRecovery::new(store.clone()),
            Some(runs.clone()),
            EngineConfig::default().without_backoff(),
        )
    }

    #[must_use]
    pub fn run_plan(&self, plan: &SimulationPlan, seed: u64) -> SimulationSummary {
        let backend = ScriptedBackend::new(plan.profile, seed);
        let mut rng = ChaCha8Rng::seed_from_u64(seed.rotate_left(17));
        let store = MemorySnapshotStore::default();
        let runs = MemoryRunStore::new();
        let mut engine = self.engine(&backend, &store, &runs);

        engine.set_identity(&plan.handle, &plan.clan);
        if let Err(err) = engine.set_theme(&plan.theme) {
            log::warn!("Could not set theme {}: {err}", plan.theme);
        }
        if plan.with_document {
            engine.set_document(SAMPLE_DOCUMENT);
        }

        let mut judgments = Vec::new();
        let mut replies = Vec::new();
        let mut perks_chosen = Vec::new();
        let mut notices = Vec::new();
        let mut celebrated = false;
        let mut crash = None;
        let mut turns = 0;

        while turns < plan.max_turns && !engine.session().is_terminal() {
            if engine.session().awaiting_perk_selection() {
                let perk = plan.perks.pick(perks_chosen.len(), &mut rng);
                perks_chosen.push(perk);
                match engine.choose_perk(perk) {
                    Ok(report) => notices.extend(report.notices),
                    Err(err) => {
                        log::warn!("Perk selection rejected: {err}");
                        break;
                    }
                }
                continue;
            }

            let line = PITCH_LINES[rng.gen_range(0..PITCH_LINES.len())];
            let report = match engine.play_turn(line, |_| {}) {
                Ok(report) => report,
                Err(err) => {
                    log::warn!("Turn rejected: {err}");
                    break;
                }
            };
            turns += 1;
            celebrated |= report.celebrate;
            replies.push(report.reply);
            judgments.extend(report.judgment);
            notices.extend(report.notices);

            if self.verbose {
                println!(
                    "    turn {turns}: level {} hp {} {:?}",
                    report.level, report.health, report.terminal
                );
            }

            if plan.crash_after_turn == Some(turns) && !engine.session().is_terminal() {
                let before = fingerprint(&engine);
                drop(engine);
                engine = self.engine(&backend, &store, &runs);
                let outcome = engine.restore();
                crash = Some(CrashCheck {
                    outcome,
                    before,
                    after: fingerprint(&engine),
                });
            }
        }

        let report = engine.post_mortem();
        let session = engine.session();
        SimulationSummary {
            seed,
            perks: plan.perks,
            terminal: session.terminal(),
            health: session.health(),
            level: session.level(),
            max_level: session.max_level_reached(),
            turns,
            halted: !session.is_terminal(),
            turn_log: session.turn_log().to_vec(),
            judgments,
            replies,
            transcript: session.transcript().to_vec(),
            perks_chosen,
            notices,
            valuation: session.final_valuation_usd(),
            celebrated,
            share_text: engine.share_text(),
            report,
            crash,
            snapshot_left: store
                .raw(gauntlet_game::constants::SNAPSHOT_STORAGE_KEY)
                .is_some(),
            runs_saved: runs.run_count(),
            player_rows: engine.player_leaderboard(10).len(),
            backend: backend.stats(),
        }
    }
}

fn fingerprint(engine: &SimEngine<'_>) -> (u8, i32, usize) {
    let session = engine.session();
    (session.level(), session.health(), session.transcript().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator() -> Simulator {
        Simulator::new(GameContent::bundled().unwrap(), false)
    }

    #[test]
    fn flawless_runs_win_in_five_turns() {
        let plan = SimulationPlan::new(BackendProfile::flawless(), PerkStrategy::Skip);
        let summary = simulator().run_plan(&plan, 42);
        assert_eq!(summary.terminal, TerminalState::Victorious);
        assert_eq!(summary.turns, 5);
        assert_eq!(summary.perks_chosen.len(), 4);
        assert!(summary.valuation > 0);
        assert!(!summary.snapshot_left);
        assert_eq!(summary.runs_saved, 1);
    }

    #[test]
    fn same_seed_replays_identically() {
        let plan = SimulationPlan::new(BackendProfile::default(), PerkStrategy::Random);
        let a = simulator().run_plan(&plan, 99);
        let b = simulator().run_plan(&plan, 99);
        assert_eq!(a.turn_log, b.turn_log);
        assert_eq!(a.replies, b.replies);
        assert_eq!(a.perks_chosen, b.perks_chosen);
    }

    #[test]
    fn crash_restores_the_same_run() {
        let plan = SimulationPlan::new(BackendProfile::flawless(), PerkStrategy::Shield)
            .with_crash_after(2);
        let summary = simulator().run_plan(&plan, 5);
        let crash = summary.crash.unwrap();
        assert_eq!(crash.outcome, RestoreOutcome::Restored);
        assert_eq!(crash.before, crash.after);
        assert_eq!(summary.terminal, TerminalState::Victorious);
    }
}
